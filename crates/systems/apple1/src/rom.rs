//! ROM images: the Woz monitor page and the 4K Integer BASIC
//!
//! Images are validated once against their window sizes and never change afterwards.

use thiserror::Error;

/// $FF00-$FFFF. Only $FF00-$FFFB is decoded from the image; the reset vector is
/// synthesized and $FFFE/$FFFF are open bus.
pub const MONITOR_ROM_SIZE: usize = 0x100;

/// $E000-$EFFF
pub const BASIC_ROM_SIZE: usize = 0x1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RomError {
    #[error("{window} ROM must be {expected} bytes, got {actual}")]
    InvalidSize {
        window: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone)]
pub struct RomImages {
    monitor: Box<[u8]>,
    basic: Box<[u8]>,
}

impl RomImages {
    pub fn new(monitor: Vec<u8>, basic: Vec<u8>) -> Result<Self, RomError> {
        Ok(Self {
            monitor: Self::checked("Monitor", monitor, MONITOR_ROM_SIZE)?,
            basic: Self::checked("BASIC", basic, BASIC_ROM_SIZE)?,
        })
    }

    /// Zero-filled images, for machines that run only from RAM
    pub fn blank() -> Self {
        Self {
            monitor: vec![0; MONITOR_ROM_SIZE].into_boxed_slice(),
            basic: vec![0; BASIC_ROM_SIZE].into_boxed_slice(),
        }
    }

    fn checked(
        window: &'static str,
        image: Vec<u8>,
        expected: usize,
    ) -> Result<Box<[u8]>, RomError> {
        if image.len() != expected {
            return Err(RomError::InvalidSize {
                window,
                expected,
                actual: image.len(),
            });
        }
        Ok(image.into_boxed_slice())
    }

    pub fn monitor(&self) -> &[u8] {
        &self.monitor
    }

    pub fn basic(&self) -> &[u8] {
        &self.basic
    }
}
