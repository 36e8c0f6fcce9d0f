use crate::{
    address,
    addressing::AddressCalculator,
    bits::LANES_PER_WORD,
    config::{InputShape, UnloadConfig},
    device::DeviceProfile,
    error::Error,
    processor_map::{ProcessorMap, Walker},
};
use smallvec::SmallVec;

/// A single byte lane of a source word that holds a live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lane {
    /// Byte lane inside the source word (0..4).
    pub lane: usize,
    pub channel: usize,
    /// Channel-major offset in the output buffer.
    pub destination: usize,
    /// Distance of `destination` from the word's base destination.
    pub step: usize,
}

/// One 32-bit read from accelerator memory and the bytes it scatters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WordAccess {
    /// Index of the channel group in walk order.
    pub group: usize,
    /// Row-major spatial position.
    pub spatial: usize,
    /// Absolute source word address.
    pub source: address,
    /// Destination of the group's first channel at this position.
    pub destination: usize,
    pub lanes: SmallVec<[Lane; LANES_PER_WORD]>,
}

/// Fully resolved unload of one layer.
///
/// Planning runs the processor map walk and all address arithmetic up front,
/// so every configuration error surfaces before generated code is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub shape: InputShape,
    pub words: Vec<WordAccess>,
    pub num_groups: usize,
    /// Number of times the processor map restarted.
    pub restarts: usize,
}

impl Plan {
    pub fn new(
        profile: &DeviceProfile,
        processor_map: ProcessorMap,
        shape: InputShape,
        config: &UnloadConfig,
    ) -> Result<Self, Error> {
        profile.validate()?;
        shape.validate()?;
        config.validate()?;
        processor_map.validate(profile)?;

        let calc = AddressCalculator::new(profile, shape, config);
        let mut walker = Walker::new(
            processor_map,
            profile.shared_processors,
            shape.channels,
            config.out_expand_thresh as usize,
        )?;

        let spatial_len = shape.spatial_len();
        let mut words = Vec::new();
        let mut num_groups = 0;
        for (group_idx, group) in walker.by_ref().enumerate() {
            num_groups += 1;
            for spatial in 0..spatial_len {
                let source = calc.source_address(group.proc, group.expand, spatial)?;
                let destination = calc.destination(group.channel, spatial);
                let lanes = (0..LANES_PER_WORD)
                    .filter(|&lane| group.is_lane_active(lane))
                    .zip(group.channel..shape.channels)
                    .map(|(lane, channel)| {
                        let lane_destination = calc.destination(channel, spatial);
                        Lane {
                            lane,
                            channel,
                            destination: lane_destination,
                            step: lane_destination - destination,
                        }
                    })
                    .collect();
                words.push(WordAccess {
                    group: group_idx,
                    spatial,
                    source,
                    destination,
                    lanes,
                });
            }
        }

        log::debug!(
            "planned unload of {} for {}: {} groups, {} words, {} restarts",
            shape,
            processor_map,
            num_groups,
            words.len(),
            walker.restarts()
        );

        Ok(Self {
            shape,
            words,
            num_groups,
            restarts: walker.restarts(),
        })
    }

    /// Number of bytes written to the output buffer.
    #[must_use]
    pub fn num_writes(&self) -> usize {
        self.words.iter().map(|word| word.lanes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::Plan;
    use crate::{
        config::{InputShape, UnloadConfig},
        device,
        error::Error,
        processor_map::ProcessorMap,
    };
    use color_eyre::eyre;
    use itertools::Itertools;
    use pretty_assertions::assert_eq as diff_assert_eq;

    #[test]
    fn plan_full_group() -> eyre::Result<()> {
        let shape = InputShape::new(4, 2, 2);
        let config = UnloadConfig::for_device(&device::AI85);
        let plan = Plan::new(&device::AI85, ProcessorMap::from(0xf), shape, &config)?;
        assert_eq!(plan.num_groups, 1);
        assert_eq!(plan.words.len(), 4);
        assert_eq!(plan.num_writes(), 16);

        let sources: Vec<_> = plan.words.iter().map(|word| word.source).collect();
        diff_assert_eq!(
            sources,
            vec![0x5030_0000, 0x5030_0004, 0x5030_0008, 0x5030_000c]
        );

        let word = &plan.words[3];
        let lanes: Vec<_> = word
            .lanes
            .iter()
            .map(|lane| (lane.lane, lane.channel, lane.destination, lane.step))
            .collect();
        diff_assert_eq!(
            lanes,
            vec![(0, 0, 3, 0), (1, 1, 7, 4), (2, 2, 11, 8), (3, 3, 15, 12)]
        );
        Ok(())
    }

    #[test]
    fn plan_writes_every_destination_once() -> eyre::Result<()> {
        for (map, shape) in [
            (0xf, InputShape::new(3, 3, 3)),
            (0b0101, InputShape::new(5, 2, 4)),
            (0xffff_0000, InputShape::new(16, 4, 4)),
            (0x0f0f, InputShape::new(11, 1, 7)),
        ] {
            let config = UnloadConfig::for_device(&device::AI85);
            let plan = Plan::new(&device::AI85, ProcessorMap::from(map), shape, &config)?;
            let destinations: Vec<_> = plan
                .words
                .iter()
                .flat_map(|word| word.lanes.iter().map(|lane| lane.destination))
                .sorted()
                .collect();
            diff_assert_eq!(
                destinations,
                (0..shape.len()).collect::<Vec<_>>(),
                "map={map:#x} shape={shape}"
            );
        }
        Ok(())
    }

    #[test]
    fn plan_clips_trailing_channels() -> eyre::Result<()> {
        let shape = InputShape::new(3, 1, 1);
        let config = UnloadConfig::for_device(&device::AI85);
        let plan = Plan::new(&device::AI85, ProcessorMap::from(0xf), shape, &config)?;
        assert_eq!(plan.words.len(), 1);
        let channels: Vec<_> = plan.words[0].lanes.iter().map(|lane| lane.channel).collect();
        diff_assert_eq!(channels, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn plan_sparse_lanes() -> eyre::Result<()> {
        // processors 1 and 3 of the first quad
        let shape = InputShape::new(2, 1, 2);
        let config = UnloadConfig::for_device(&device::AI85);
        let plan = Plan::new(&device::AI85, ProcessorMap::from(0b1010), shape, &config)?;
        let lanes: Vec<_> = plan
            .words
            .iter()
            .map(|word| {
                word.lanes
                    .iter()
                    .map(|lane| (lane.lane, lane.destination))
                    .collect::<Vec<_>>()
            })
            .collect();
        diff_assert_eq!(lanes, vec![vec![(1, 0), (3, 2)], vec![(1, 1), (3, 3)]]);
        Ok(())
    }

    #[test]
    fn plan_rejects_invalid_configuration() {
        let profile = &device::AI85;
        let config = UnloadConfig::for_device(profile);
        let map = ProcessorMap::from(0xf);

        assert!(matches!(
            Plan::new(profile, map, InputShape::new(0, 1, 1), &config),
            Err(Error::InvalidShape { .. })
        ));
        assert!(matches!(
            Plan::new(profile, map, InputShape::new(4, usize::MAX / 2, 3), &config),
            Err(Error::ShapeTooLarge { .. })
        ));
        assert!(matches!(
            Plan::new(profile, ProcessorMap::ZERO, InputShape::new(4, 1, 1), &config),
            Err(Error::EmptyProcessorMap)
        ));

        let mut bad = config.clone();
        bad.out_expand_thresh = 0;
        assert!(matches!(
            Plan::new(profile, map, InputShape::new(4, 1, 1), &bad),
            Err(Error::InvalidExpandThreshold)
        ));
    }

    #[test]
    fn plan_rejects_wide_activations() {
        let profile = device::DeviceProfile {
            activation_bits: 16,
            ..device::AI85.clone()
        };
        let config = UnloadConfig::for_device(&profile);
        assert!(matches!(
            Plan::new(&profile, ProcessorMap::from(0xf), InputShape::new(4, 1, 1), &config),
            Err(Error::UnsupportedActivationWidth(16))
        ));
    }

    #[test]
    fn plan_fails_fast_past_last_processor() {
        // a single active processor quad walked far beyond the 64 processors of the device
        let config = UnloadConfig::for_device(&device::AI85);
        let result = Plan::new(
            &device::AI85,
            ProcessorMap::from(0x1),
            InputShape::new(32, 1, 1),
            &config,
        );
        assert!(matches!(
            result,
            Err(Error::ProcessorOutOfRange { proc: 64, max: 64 })
        ));
    }
}
