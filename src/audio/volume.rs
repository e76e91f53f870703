//! Volume scaling
//!
//! The scaling law is `output = trunc(sample * volume)`: the product is
//! computed in f64 and converted back to i16 by truncation toward zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ConfigError;

/// A volume scalar validated to lie in `[0.0, 1.0]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume(f64);

impl Volume {
    pub const FULL: Volume = Volume(1.0);
    pub const MUTE: Volume = Volume(0.0);

    pub fn new(value: f64) -> Result<Self, ConfigError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::VolumeOutOfRange(value))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::FULL
    }
}

impl TryFrom<f64> for Volume {
    type Error = ConfigError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Volume::new(value)
    }
}

/// Scale one sample, truncating toward zero
#[inline]
pub fn scale_sample(sample: i16, volume: f64) -> i16 {
    (sample as f64 * volume) as i16
}

/// Volume cell written by the control listener and read on the audio path.
///
/// Stores the f64 bit pattern in an atomic, so readers never block.
#[derive(Debug, Clone)]
pub struct SharedVolume {
    bits: Arc<AtomicU64>,
}

impl SharedVolume {
    pub fn new(volume: Volume) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(volume.get().to_bits())),
        }
    }

    pub fn load(&self) -> Volume {
        Volume(f64::from_bits(self.bits.load(Ordering::Relaxed)))
    }

    pub fn store(&self, volume: Volume) {
        self.bits.store(volume.get().to_bits(), Ordering::Relaxed);
    }
}

impl Default for SharedVolume {
    fn default() -> Self {
        Self::new(Volume::FULL)
    }
}
