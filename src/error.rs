use crate::address;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown device {0:?} (expected one of ai84, ai85)")]
    UnknownDevice(String),

    #[error("invalid input shape ({channels}, {height}, {width}): all dimensions must be non-zero")]
    InvalidShape {
        channels: usize,
        height: usize,
        width: usize,
    },

    #[error("input shape ({channels}, {height}, {width}) does not fit a 32-bit output offset")]
    ShapeTooLarge {
        channels: usize,
        height: usize,
        width: usize,
    },

    #[error("unsupported activation width of {0} bits (expected 8)")]
    UnsupportedActivationWidth(u32),

    #[error("channel expansion threshold must be non-zero")]
    InvalidExpandThreshold,

    #[error("channel expansion factor must be non-zero")]
    InvalidExpandFactor,

    #[error("invalid pooling configuration (size={size}, stride={stride})")]
    InvalidPooling { size: u32, stride: u32 },

    #[error("processor map is empty")]
    EmptyProcessorMap,

    #[error("processor map {map:#018x} uses processors beyond the {max} available")]
    ProcessorMapTooWide { map: u64, max: u32 },

    #[error("processor {proc} is out of range (device has {max} processors)")]
    ProcessorOutOfRange { proc: u32, max: u32 },

    #[error("address of processor {proc} at spatial offset {offset} exceeds 32 bits")]
    AddressOverflow { proc: u32, offset: usize },

    #[error("source address {0:#010x} is not word aligned")]
    UnalignedAddress(address),

    #[error("failed to write unload code")]
    Sink(#[from] std::io::Error),
}

impl Error {
    /// Configuration errors are reported before any output is produced.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Sink(_))
    }
}
