//! Address calculation for the interleaved channel layout.
//!
//! Every processor owns a memory instance inside its group's data memory.
//! The word holding the activations of processor `proc` at spatial position
//! `spatial` lives at
//!
//! ```text
//! instance = (proc % P) * INSTANCE | (proc / P) * GROUP / 4
//! out_offset + (instance + spatial * out_expand + expand) * 4
//! ```
//!
//! where `P` is the number of processors per group.

use crate::{
    address,
    config::{InputShape, Pooling, UnloadConfig},
    device::DeviceProfile,
    error::Error,
};

/// Source address corrections of a device generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingStrategy {
    /// Plain interleaved layout.
    Standard,
    /// Legacy devices pack 4x4 pooled (stride 4) outputs with 8 bytes of
    /// padding after every 4 positions.
    LegacyPooled,
}

impl AddressingStrategy {
    #[must_use]
    pub fn select(config: &UnloadConfig) -> Self {
        match config.pool {
            Some(Pooling { size: 4, stride: 4 }) if config.legacy => Self::LegacyPooled,
            _ => Self::Standard,
        }
    }

    /// Byte correction added to the source offset at spatial position `spatial`.
    #[must_use]
    #[inline]
    pub fn correction(self, spatial: usize) -> u64 {
        match self {
            Self::Standard => 0,
            Self::LegacyPooled => (spatial as u64 / 4) * 8 + 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddressCalculator<'a> {
    profile: &'a DeviceProfile,
    shape: InputShape,
    base: u64,
    out_offset: u64,
    out_expand: u64,
    strategy: AddressingStrategy,
}

impl<'a> AddressCalculator<'a> {
    #[must_use]
    pub fn new(profile: &'a DeviceProfile, shape: InputShape, config: &UnloadConfig) -> Self {
        let strategy = AddressingStrategy::select(config);
        log::debug!("{} addressing with {:?} strategy", profile.device, strategy);
        Self {
            profile,
            shape,
            base: u64::from(config.apb_base) + u64::from(profile.sram_base),
            out_offset: u64::from(config.out_offset),
            out_expand: u64::from(config.out_expand),
            strategy,
        }
    }

    #[must_use]
    pub fn strategy(&self) -> AddressingStrategy {
        self.strategy
    }

    /// Byte offset of a source word relative to the data memory base.
    pub fn source_offset(&self, proc: u32, expand: usize, spatial: usize) -> Result<u64, Error> {
        let max = self.profile.max_processors();
        if proc >= max {
            return Err(Error::ProcessorOutOfRange { proc, max });
        }
        let per_group = self.profile.processors_per_group;
        let instance = u64::from(proc % per_group) * u64::from(self.profile.instance_size);
        let group = u64::from(proc / per_group) * u64::from(self.profile.group_offset) / 4;

        let overflow = || Error::AddressOverflow {
            proc,
            offset: spatial,
        };
        let word = (spatial as u64)
            .checked_mul(self.out_expand)
            .and_then(|pos| (instance | group).checked_add(pos))
            .and_then(|word| word.checked_add(expand as u64))
            .ok_or_else(overflow)?;
        word.checked_mul(4)
            .and_then(|bytes| bytes.checked_add(self.out_offset))
            .and_then(|bytes| bytes.checked_add(self.strategy.correction(spatial)))
            .ok_or_else(overflow)
    }

    /// Absolute source word address as seen by the target CPU.
    pub fn source_address(
        &self,
        proc: u32,
        expand: usize,
        spatial: usize,
    ) -> Result<address, Error> {
        let offset = self.source_offset(proc, expand, spatial)?;
        let absolute = self
            .base
            .checked_add(offset)
            .and_then(|absolute| address::try_from(absolute).ok())
            .ok_or(Error::AddressOverflow {
                proc,
                offset: spatial,
            })?;
        if absolute % 4 != 0 {
            return Err(Error::UnalignedAddress(absolute));
        }
        Ok(absolute)
    }

    /// Channel-major destination offset of `channel` at spatial position `spatial`.
    #[must_use]
    #[inline]
    pub fn destination(&self, channel: usize, spatial: usize) -> usize {
        let (row, col) = (spatial / self.shape.width, spatial % self.shape.width);
        self.shape.offset(channel, row, col)
    }
}
