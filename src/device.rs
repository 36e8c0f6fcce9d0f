//! Device profile registry.
//!
//! Each accelerator generation lays out its data memory slightly differently.
//! A [`DeviceProfile`] collects the constants the address calculator needs and
//! is selected once from a [`Device`] identifier before generation starts.

use crate::{address, bits, error::Error};
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Device {
    #[strum(to_string = "ai84", serialize = "84")]
    AI84,
    #[strum(to_string = "ai85", serialize = "85")]
    AI85,
}

impl Device {
    /// Resolve a device identifier such as `ai84`, `AI85` or `85`.
    pub fn from_id(id: &str) -> Result<Self, Error> {
        id.trim()
            .parse()
            .map_err(|_| Error::UnknownDevice(id.to_string()))
    }

    #[must_use]
    pub fn profile(self) -> &'static DeviceProfile {
        match self {
            Self::AI84 => &AI84,
            Self::AI85 => &AI85,
        }
    }
}

impl Serialize for Device {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let name: &'static str = self.into();
        serializer.serialize_str(name)
    }
}

struct DeviceVisitor;

impl<'de> serde::de::Visitor<'de> for DeviceVisitor {
    type Value = Device;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a device identifier (ai84, ai85, 84 or 85)")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Device::from_id(value).map_err(E::custom)
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_str(&value.to_string())
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.visit_str(&value.to_string())
    }
}

impl<'de> Deserialize<'de> for Device {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(DeviceVisitor)
    }
}

/// Addressing constants of one accelerator generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceProfile {
    pub device: Device,
    /// Default peripheral bus base address.
    pub apb_base: address,
    /// Offset of the data SRAM relative to the APB base.
    pub sram_base: address,
    /// Byte stride between processor groups.
    pub group_offset: u32,
    /// Word stride between the memory instances of two processors in a group.
    pub instance_size: u32,
    /// Number of processors in one group.
    pub processors_per_group: u32,
    pub num_groups: u32,
    /// Number of processors sharing one data memory.
    pub shared_processors: u32,
    /// Width of an output activation in bits.
    pub activation_bits: u32,
    /// Whether the device has the 4x4 pooling packing quirk.
    pub legacy: bool,
}

impl DeviceProfile {
    /// Total number of processors.
    #[must_use]
    pub fn max_processors(&self) -> u32 {
        self.processors_per_group * self.num_groups
    }

    /// Number of activations packed into one 32-bit word.
    #[must_use]
    pub fn lanes_per_word(&self) -> usize {
        32usize.checked_div(self.activation_bits as usize).unwrap_or(0)
    }

    /// The generated code extracts one byte lane per activation.
    pub fn validate(&self) -> Result<(), Error> {
        if self.activation_bits != bits::LANE_BITS
            || self.lanes_per_word() != bits::LANES_PER_WORD
        {
            return Err(Error::UnsupportedActivationWidth(self.activation_bits));
        }
        Ok(())
    }
}

pub static AI84: DeviceProfile = DeviceProfile {
    device: Device::AI84,
    apb_base: 0x5010_0000,
    sram_base: 0x0001_0000,
    group_offset: 0x0010_0000,
    instance_size: 1024,
    processors_per_group: 16,
    num_groups: 4,
    shared_processors: 4,
    activation_bits: 8,
    legacy: true,
};

pub static AI85: DeviceProfile = DeviceProfile {
    device: Device::AI85,
    apb_base: 0x5000_0000,
    sram_base: 0x0030_0000,
    group_offset: 0x0040_0000,
    instance_size: 2048,
    processors_per_group: 16,
    num_groups: 4,
    shared_processors: 4,
    activation_bits: 8,
    legacy: false,
};

#[cfg(test)]
mod tests {
    use super::Device;
    use crate::{bits, error::Error};
    use strum::IntoEnumIterator;

    #[test]
    fn parse_device_ids() -> Result<(), Error> {
        assert_eq!(Device::from_id("ai84")?, Device::AI84);
        assert_eq!(Device::from_id("AI84")?, Device::AI84);
        assert_eq!(Device::from_id("84")?, Device::AI84);
        assert_eq!(Device::from_id(" ai85 ")?, Device::AI85);
        assert_eq!(Device::from_id("85")?, Device::AI85);
        assert!(matches!(
            Device::from_id("ai87"),
            Err(Error::UnknownDevice(id)) if id == "ai87"
        ));
        assert!(Device::from_id("").is_err());
        Ok(())
    }

    #[test]
    fn display_roundtrips_through_parse() -> Result<(), Error> {
        for device in Device::iter() {
            assert_eq!(Device::from_id(&device.to_string())?, device);
        }
        Ok(())
    }

    #[test]
    fn profiles_are_consistent() {
        for device in Device::iter() {
            let profile = device.profile();
            assert_eq!(profile.device, device);
            assert_eq!(profile.lanes_per_word(), bits::LANES_PER_WORD);
            assert!(profile.validate().is_ok());
            assert!(profile.shared_processors.is_power_of_two());
            assert_eq!(profile.processors_per_group % profile.shared_processors, 0);
            assert_eq!(profile.group_offset % 4, 0);
            assert!(profile.max_processors() <= 64);
        }
        assert!(Device::AI84.profile().legacy);
        assert!(!Device::AI85.profile().legacy);
    }

    #[test]
    fn reject_unsupported_activation_width() {
        for activation_bits in [0, 4, 16, 32] {
            let profile = super::DeviceProfile {
                activation_bits,
                ..super::AI85.clone()
            };
            assert!(matches!(
                profile.validate(),
                Err(Error::UnsupportedActivationWidth(width)) if width == activation_bits
            ));
        }
    }

    #[test]
    fn deserialize_device() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(serde_yaml::from_str::<Device>("ai85")?, Device::AI85);
        assert_eq!(serde_yaml::from_str::<Device>("84")?, Device::AI84);
        assert_eq!(serde_json::from_str::<Device>("85")?, Device::AI85);
        assert_eq!(serde_json::from_str::<Device>(r#""AI84""#)?, Device::AI84);
        assert!(serde_json::from_str::<Device>(r#""ai99""#).is_err());
        assert_eq!(serde_json::to_string(&Device::AI84)?, r#""ai84""#);
        Ok(())
    }
}
