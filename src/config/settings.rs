//! Log reassembly settings
//!
//! The firmware stamps every log record with a rolling 16-bit tick. These
//! settings control how the download engine turns that rolling counter back
//! into an ordered stream.
//!
//! # Windows
//!
//! - **Reorder window**: how far behind the newest tick a record may arrive and
//!   still be accepted as a late record. Complete values are held back by this
//!   many ticks so late arrivals can be slotted in before delivery.
//! - **Sibling window**: how many newer ticks may pass before a wide value that
//!   is still missing one of its log ids is discarded. The default is one full
//!   tick-counter period.

use crate::error::{Result, SensorError};
use serde::{Deserialize, Serialize};

/// One full period of the 16-bit tick counter
pub const TICK_PERIOD: u32 = 1 << 16;

/// Extended tick of wire tick 0 in the epoch of a readout's first record
pub const TICK_ORIGIN: u64 = TICK_PERIOD as u64;

/// Firmware tick duration in seconds (48 / 32768)
pub const TICK_SECONDS: f64 = 48.0 / 32768.0;

/// Log reassembly configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Maximum backwards jump (in ticks) still treated as a late record
    pub reorder_window: u16,

    /// Ticks after which an incomplete wide value is discarded
    pub sibling_window: u32,

    /// Number of progress notifications requested for a full readout
    pub progress_updates: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            reorder_window: 16,
            sibling_window: TICK_PERIOD,
            progress_updates: 64,
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<()> {
        if u32::from(self.reorder_window) >= TICK_PERIOD / 2 {
            return Err(SensorError::Config(format!(
                "log.reorder_window must be below {}",
                TICK_PERIOD / 2
            )));
        }
        if self.sibling_window == 0 {
            return Err(SensorError::Config(
                "log.sibling_window must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows() {
        let config = LogConfig::default();
        assert_eq!(config.sibling_window, 65536);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reorder_window_must_stay_below_half_period() {
        let config = LogConfig {
            reorder_window: 0x8000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
