use crate::{bits, device::DeviceProfile, error::Error};
use bitvec::{field::BitField, BitArr};
use serde::{Deserialize, Serialize};

pub type Inner = BitArr!(for 64, in u64);

/// Number of processors (and therefore channels) covered by one channel group step.
pub const GROUP_WIDTH: u32 = bits::LANES_PER_WORD as u32;

const GROUP_MASK: u64 = (1 << GROUP_WIDTH) - 1;

/// Processor activity map.
///
/// Bitmask where a 1 at position i means that processor i holds output data.
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
#[repr(transparent)]
pub struct ProcessorMap(Inner);

impl ProcessorMap {
    /// Map with all processors inactive
    pub const ZERO: Self = ProcessorMap(Inner::ZERO);

    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0.load()
    }

    /// Index of the first active processor.
    #[must_use]
    pub fn first_processor(&self) -> Option<usize> {
        self.0.first_one()
    }

    /// Index of the last active processor.
    #[must_use]
    pub fn last_processor(&self) -> Option<usize> {
        self.0.last_one()
    }

    #[must_use]
    pub fn num_active(&self) -> usize {
        self.0.count_ones()
    }

    #[must_use]
    pub fn is_active(&self, proc: usize) -> bool {
        self.0.get(proc).is_some_and(|bit| *bit)
    }

    /// Check that the map is usable on `profile`.
    pub fn validate(&self, profile: &DeviceProfile) -> Result<(), Error> {
        let max = profile.max_processors();
        match self.last_processor() {
            None => Err(Error::EmptyProcessorMap),
            Some(last) if last >= max as usize => Err(Error::ProcessorMapTooWide {
                map: self.as_u64(),
                max,
            }),
            Some(_) => Ok(()),
        }
    }
}

impl From<u64> for ProcessorMap {
    fn from(value: u64) -> Self {
        let mut map = Inner::ZERO;
        map.store(value);
        Self(map)
    }
}

impl std::fmt::Display for ProcessorMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.as_u64())
    }
}

impl Serialize for ProcessorMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.as_u64())
    }
}

struct Visitor;

impl<'de> serde::de::Visitor<'de> for Visitor {
    type Value = ProcessorMap;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a 64-bit processor mask (integer or hex string)")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(ProcessorMap::from(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        u64::try_from(value)
            .map(ProcessorMap::from)
            .map_err(|_| E::custom(format!("negative processor map {value}")))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        let value = value.trim();
        let parsed = match value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
            None => value.replace('_', "").parse(),
        };
        parsed
            .map(ProcessorMap::from)
            .map_err(|err| E::custom(format!("bad processor map {value:?}: {err}")))
    }
}

impl<'de> Deserialize<'de> for ProcessorMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(Visitor)
    }
}

/// One step of the processor map walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelGroup {
    /// First channel delivered by this group.
    pub channel: usize,
    /// Active processors of the group, one bit per byte lane.
    pub lanes: u8,
    /// Index of the processor replica set (channel / expansion threshold).
    pub expand: usize,
    /// First processor of the group, aligned to the shared memory granularity.
    pub proc: u32,
}

impl ChannelGroup {
    /// Number of live channels in this group.
    #[must_use]
    pub fn num_channels(&self) -> u32 {
        bits::popcount(u64::from(self.lanes))
    }

    #[must_use]
    pub fn is_lane_active(&self, lane: usize) -> bool {
        self.lanes & (1 << lane) != 0
    }
}

/// Cursor over the channel groups of a processor map.
///
/// The active sub-map is rotated right by one group per step and restarts
/// from the initial map once it is exhausted, so the layout repeats every
/// time the processors of the map have been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Walker {
    initial: u64,
    current: u64,
    start: u32,
    proc_offset: u32,
    shared: u32,
    channel: usize,
    channels: usize,
    expand_thresh: usize,
    restarts: usize,
}

impl Walker {
    pub fn new(
        map: ProcessorMap,
        shared_processors: u32,
        channels: usize,
        expand_thresh: usize,
    ) -> Result<Self, Error> {
        let first = map.first_processor().ok_or(Error::EmptyProcessorMap)?;
        if expand_thresh == 0 {
            return Err(Error::InvalidExpandThreshold);
        }
        let start = bits::align_down(first as u32, shared_processors);
        let initial = map.as_u64() >> start;
        Ok(Self {
            initial,
            current: initial,
            start,
            proc_offset: start,
            shared: shared_processors,
            channel: 0,
            channels,
            expand_thresh,
            restarts: 0,
        })
    }

    /// Current channel.
    #[must_use]
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Active processors of the current group.
    #[must_use]
    pub fn lanes(&self) -> u8 {
        (self.current & GROUP_MASK) as u8
    }

    /// Number of times the sub-map restarted from the initial map.
    #[must_use]
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.channel >= self.channels
    }

    /// Move to the next channel group.
    ///
    /// Returns the number of channels consumed by the group that was left.
    pub fn advance(&mut self) -> u32 {
        let consumed = bits::popcount(self.current & GROUP_MASK);
        self.channel += consumed as usize;
        self.proc_offset += GROUP_WIDTH;
        self.current >>= GROUP_WIDTH;
        if self.current == 0 {
            self.current = self.initial;
            self.restarts += 1;
        }
        consumed
    }
}

impl Iterator for Walker {
    type Item = ChannelGroup;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_done() {
            return None;
        }
        if self.channel % self.expand_thresh == 0 {
            self.proc_offset = self.start;
        }
        let group = ChannelGroup {
            channel: self.channel,
            lanes: self.lanes(),
            expand: self.channel / self.expand_thresh,
            proc: bits::align_down(self.proc_offset, self.shared),
        };
        log::trace!(
            "channel group: channel={} lanes={:04b} expand={} proc={}",
            group.channel,
            group.lanes,
            group.expand,
            group.proc
        );
        self.advance();
        Some(group)
    }
}
