use crate::{
    address,
    device::{Device, DeviceProfile},
    error::Error,
    processor_map::ProcessorMap,
};
use serde::{Deserialize, Serialize};

/// Default number of channels handled per expansion step.
pub const DEFAULT_OUT_EXPAND_THRESH: u32 = 64;

/// Shape `(channels, height, width)` of the output tensor to unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    #[must_use]
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Number of spatial positions per channel.
    #[must_use]
    pub fn spatial_len(&self) -> usize {
        self.height * self.width
    }

    /// Total number of activations, i.e. the size of the output buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels * self.spatial_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Channel-major offset of `(channel, row, col)`.
    #[must_use]
    pub fn offset(&self, channel: usize, row: usize, col: usize) -> usize {
        channel * self.spatial_len() + row * self.width + col
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.channels == 0 || self.height == 0 || self.width == 0 {
            return Err(Error::InvalidShape {
                channels: self.channels,
                height: self.height,
                width: self.width,
            });
        }
        // offsets are emitted into a `uint32_t`
        let len = self
            .channels
            .checked_mul(self.height)
            .and_then(|len| len.checked_mul(self.width))
            .filter(|&len| u32::try_from(len).is_ok());
        if len.is_none() {
            return Err(Error::ShapeTooLarge {
                channels: self.channels,
                height: self.height,
                width: self.width,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.channels, self.height, self.width)
    }
}

impl std::str::FromStr for InputShape {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let dims: Vec<&str> = value
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split([',', 'x'])
            .map(str::trim)
            .collect();
        let [channels, height, width] = dims.as_slice() else {
            return Err(format!("expected C,H,W but got {value:?}"));
        };
        let parse = |dim: &str| {
            dim.parse::<usize>()
                .map_err(|err| format!("bad dimension {dim:?} in {value:?}: {err}"))
        };
        Ok(Self::new(parse(*channels)?, parse(*height)?, parse(*width)?))
    }
}

/// Pooling applied by the layer producing the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pooling {
    pub size: u32,
    #[serde(default = "default_pool_stride")]
    pub stride: u32,
}

fn default_pool_stride() -> u32 {
    1
}

impl Pooling {
    #[must_use]
    pub fn new(size: u32, stride: u32) -> Self {
        Self { size, stride }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.size == 0 || self.stride == 0 {
            return Err(Error::InvalidPooling {
                size: self.size,
                stride: self.stride,
            });
        }
        Ok(())
    }
}

/// Runtime parameters of one unload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnloadConfig {
    /// Peripheral bus base address.
    pub apb_base: address,
    /// Byte offset of the layer output inside the data memory.
    pub out_offset: address,
    /// Channel expansion factor.
    pub out_expand: u32,
    /// Number of channels per expansion step.
    pub out_expand_thresh: u32,
    pub pool: Option<Pooling>,
    /// Enables the addressing quirks of the first device generation.
    pub legacy: bool,
}

impl UnloadConfig {
    /// Defaults for `profile`: no offset, no expansion and no pooling.
    #[must_use]
    pub fn for_device(profile: &DeviceProfile) -> Self {
        Self {
            apb_base: profile.apb_base,
            out_offset: 0,
            out_expand: 1,
            out_expand_thresh: DEFAULT_OUT_EXPAND_THRESH,
            pool: None,
            legacy: profile.legacy,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.out_expand_thresh == 0 {
            return Err(Error::InvalidExpandThreshold);
        }
        if self.out_expand == 0 {
            return Err(Error::InvalidExpandFactor);
        }
        if let Some(pool) = &self.pool {
            pool.validate()?;
        }
        Ok(())
    }
}

fn default_out_expand() -> u32 {
    1
}

fn default_out_expand_thresh() -> u32 {
    DEFAULT_OUT_EXPAND_THRESH
}

/// Description of one network layer output, as read from a layer file.
///
/// Addressing parameters left unset fall back to the device defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub device: Device,
    pub processor_map: ProcessorMap,
    pub shape: InputShape,
    #[serde(default)]
    pub apb_base: Option<address>,
    #[serde(default)]
    pub out_offset: address,
    #[serde(default = "default_out_expand")]
    pub out_expand: u32,
    #[serde(default = "default_out_expand_thresh")]
    pub out_expand_thresh: u32,
    #[serde(default)]
    pub pool: Option<Pooling>,
    #[serde(default)]
    pub legacy: Option<bool>,
}

impl Layer {
    #[must_use]
    pub fn new(device: Device, processor_map: ProcessorMap, shape: InputShape) -> Self {
        Self {
            device,
            processor_map,
            shape,
            apb_base: None,
            out_offset: 0,
            out_expand: default_out_expand(),
            out_expand_thresh: default_out_expand_thresh(),
            pool: None,
            legacy: None,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn profile(&self) -> &'static DeviceProfile {
        self.device.profile()
    }

    /// Resolve the unload parameters against the device profile.
    #[must_use]
    pub fn unload_config(&self) -> UnloadConfig {
        let profile = self.profile();
        UnloadConfig {
            apb_base: self.apb_base.unwrap_or(profile.apb_base),
            out_offset: self.out_offset,
            out_expand: self.out_expand,
            out_expand_thresh: self.out_expand_thresh,
            pool: self.pool,
            legacy: self.legacy.unwrap_or(profile.legacy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{InputShape, Layer, Pooling, UnloadConfig};
    use crate::{device, device::Device, error::Error, processor_map::ProcessorMap};
    use color_eyre::eyre;
    use pretty_assertions::assert_eq as diff_assert_eq;

    #[test]
    fn shape_offsets() {
        let shape = InputShape::new(3, 2, 5);
        assert_eq!(shape.spatial_len(), 10);
        assert_eq!(shape.len(), 30);
        assert_eq!(shape.offset(0, 0, 0), 0);
        assert_eq!(shape.offset(0, 1, 0), 5);
        assert_eq!(shape.offset(2, 1, 4), 29);
        assert_eq!(shape.to_string(), "(3, 2, 5)");
    }

    #[test]
    fn parse_shape() -> eyre::Result<()> {
        let parse = |value: &str| value.parse::<InputShape>().map_err(eyre::Report::msg);
        diff_assert_eq!(parse("4,2,2")?, InputShape::new(4, 2, 2));
        diff_assert_eq!(parse("(64, 8, 8)")?, InputShape::new(64, 8, 8));
        diff_assert_eq!(parse("16x4x4")?, InputShape::new(16, 4, 4));
        assert!("4,2".parse::<InputShape>().is_err());
        assert!("4,a,2".parse::<InputShape>().is_err());
        Ok(())
    }

    #[test]
    fn validate_shape() {
        assert!(InputShape::new(1, 1, 1).validate().is_ok());
        for shape in [
            InputShape::new(0, 2, 2),
            InputShape::new(4, 0, 2),
            InputShape::new(4, 2, 0),
        ] {
            assert!(matches!(shape.validate(), Err(Error::InvalidShape { .. })));
        }
    }

    #[test]
    fn validate_shape_size() {
        assert!(InputShape::new(1, 0xffff, 0x1_0001).validate().is_ok());
        for shape in [
            InputShape::new(4, usize::MAX, 2),
            InputShape::new(2, 1 << 16, 1 << 16),
            InputShape::new(1, 1 << 16, 1 << 16),
        ] {
            assert!(matches!(shape.validate(), Err(Error::ShapeTooLarge { .. })));
        }
    }

    #[test]
    fn validate_unload_config() {
        let mut config = UnloadConfig::for_device(&device::AI85);
        assert!(config.validate().is_ok());

        config.out_expand_thresh = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidExpandThreshold)));

        config.out_expand_thresh = 64;
        config.out_expand = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidExpandFactor)));

        config.out_expand = 1;
        config.pool = Some(Pooling::new(2, 0));
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidPooling { size: 2, stride: 0 })
        ));
    }

    #[test]
    fn device_defaults() {
        let ai84 = UnloadConfig::for_device(&device::AI84);
        assert_eq!(ai84.apb_base, 0x5010_0000);
        assert!(ai84.legacy);
        let ai85 = UnloadConfig::for_device(&device::AI85);
        assert_eq!(ai85.apb_base, 0x5000_0000);
        assert!(!ai85.legacy);
        assert_eq!(ai85.out_expand, 1);
        assert_eq!(ai85.out_expand_thresh, 64);
    }

    #[test]
    fn parse_minimal_layer() -> eyre::Result<()> {
        let layer = Layer::from_yaml(
            r#"
device: ai85
processor_map: 0xf
shape: { channels: 4, height: 2, width: 2 }
"#,
        )?;
        diff_assert_eq!(
            layer,
            Layer::new(Device::AI85, ProcessorMap::from(0xf), InputShape::new(4, 2, 2))
        );
        diff_assert_eq!(layer.unload_config(), UnloadConfig::for_device(&device::AI85));
        Ok(())
    }

    #[test]
    fn parse_full_layer() -> eyre::Result<()> {
        let layer = Layer::from_yaml(
            r#"
device: 84
processor_map: "0xffff"
shape:
  channels: 16
  height: 8
  width: 8
apb_base: 0x50200000
out_offset: 0x2000
out_expand: 2
out_expand_thresh: 8
pool:
  size: 4
  stride: 4
legacy: false
"#,
        )?;
        diff_assert_eq!(
            layer.unload_config(),
            UnloadConfig {
                apb_base: 0x5020_0000,
                out_offset: 0x2000,
                out_expand: 2,
                out_expand_thresh: 8,
                pool: Some(Pooling::new(4, 4)),
                legacy: false,
            }
        );
        Ok(())
    }

    #[test]
    fn parse_json_layer() -> eyre::Result<()> {
        let layer = Layer::from_json(
            r#"{
                "device": "ai84",
                "processor_map": 255,
                "shape": { "channels": 8, "height": 4, "width": 4 },
                "pool": { "size": 2 }
            }"#,
        )?;
        let config = layer.unload_config();
        assert_eq!(config.pool, Some(Pooling::new(2, 1)));
        assert!(config.legacy);
        assert_eq!(layer.processor_map.num_active(), 8);
        Ok(())
    }

    #[test]
    fn reject_unknown_device() {
        let err = Layer::from_yaml(
            r#"
device: ai99
processor_map: 1
shape: { channels: 1, height: 1, width: 1 }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ai99"), "{err}");
    }
}
