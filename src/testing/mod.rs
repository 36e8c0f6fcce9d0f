use crate::{address, replay::Memory};

static LOGGER: std::sync::Once = std::sync::Once::new();

pub fn init_logging() {
    LOGGER.call_once(|| {
        env_logger::builder().is_test(true).init();
    });
}

/// Memory where every word holds a distinct, address-derived value.
#[must_use]
pub fn scrambled_memory() -> Memory {
    Memory::from_fn(|addr: address| addr.wrapping_mul(0x9e37_79b9) ^ (addr >> 7))
}

/// Sink that fails once `capacity` bytes have been written.
#[derive(Debug)]
pub struct FailingSink {
    capacity: usize,
    written: usize,
}

impl FailingSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            written: 0,
        }
    }

    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

impl std::io::Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let remaining = self.capacity - self.written;
        if remaining == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sink is full",
            ));
        }
        let n = remaining.min(buf.len());
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
