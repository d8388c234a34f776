//! Accelerometer (BMI160) configuration, data signal and step detector

use serde::{Deserialize, Serialize};

use crate::backend::registry::{ModuleRegistry, ACCEL_IMPL_BMI160};
use crate::error::Result;
use crate::protocol::command::Command;
use crate::protocol::constants::MODULE_ACCELEROMETER;
use crate::protocol::signal::{DataAttributes, Signal, SignalTag, ValueKind};

pub const REG_POWER_MODE: u8 = 0x01;
pub const REG_DATA_INTERRUPT_ENABLE: u8 = 0x02;
pub const REG_DATA_CONFIG: u8 = 0x03;
pub const REG_DATA: u8 = 0x04;
pub const REG_STEP_INTERRUPT_ENABLE: u8 = 0x17;
pub const REG_STEP_CONFIG: u8 = 0x18;
pub const REG_STEP_INTERRUPT: u8 = 0x19;
pub const REG_STEP_COUNTER: u8 = 0x1A;

/// Bit in the second step config byte enabling the hardware counter
const STEP_COUNTER_ENABLE: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Range {
    #[default]
    G2,
    G4,
    G8,
    G16,
}

impl Range {
    fn bits(self) -> u8 {
        match self {
            Range::G2 => 0x03,
            Range::G4 => 0x05,
            Range::G8 => 0x08,
            Range::G16 => 0x0C,
        }
    }

    /// LSB per g
    pub fn scale(self) -> f32 {
        match self {
            Range::G2 => 16384.0,
            Range::G4 => 8192.0,
            Range::G8 => 4096.0,
            Range::G16 => 2048.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputRate {
    Hz12_5,
    Hz25,
    Hz50,
    #[default]
    Hz100,
    Hz200,
    Hz400,
    Hz800,
    Hz1600,
}

impl OutputRate {
    fn bits(self) -> u8 {
        match self {
            OutputRate::Hz12_5 => 5,
            OutputRate::Hz25 => 6,
            OutputRate::Hz50 => 7,
            OutputRate::Hz100 => 8,
            OutputRate::Hz200 => 9,
            OutputRate::Hz400 => 10,
            OutputRate::Hz800 => 11,
            OutputRate::Hz1600 => 12,
        }
    }
}

/// `[0x03, 0x03, odr | bwp, range]`
pub fn configure(rate: OutputRate, range: Range) -> Command {
    Command::new(
        MODULE_ACCELEROMETER,
        REG_DATA_CONFIG,
        vec![0x20 | rate.bits(), range.bits()],
    )
}

pub fn start() -> Command {
    Command::new(MODULE_ACCELEROMETER, REG_POWER_MODE, vec![1])
}

pub fn stop() -> Command {
    Command::new(MODULE_ACCELEROMETER, REG_POWER_MODE, vec![0])
}

pub fn enable_data() -> Command {
    Command::new(MODULE_ACCELEROMETER, REG_DATA_INTERRUPT_ENABLE, vec![1, 0])
}

pub fn disable_data() -> Command {
    Command::new(MODULE_ACCELEROMETER, REG_DATA_INTERRUPT_ENABLE, vec![0, 1])
}

/// Acceleration in g for the configured range
pub fn acceleration(range: Range) -> Signal {
    Signal::new(
        "acceleration",
        SignalTag::new(MODULE_ACCELEROMETER, REG_DATA),
        DataAttributes::new(6, true),
        ValueKind::Vector,
        range.scale(),
    )
}

/// Step detector sensitivity preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StepMode {
    #[default]
    Normal,
    Sensitive,
    Robust,
}

impl StepMode {
    fn bytes(self) -> [u8; 2] {
        match self {
            StepMode::Normal => [0x15, 0x03],
            StepMode::Sensitive => [0x2D, 0x00],
            StepMode::Robust => [0x1D, 0x07],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepDetectorConfig {
    pub mode: StepMode,
    /// Enable the hardware step counter alongside the detector
    pub counter: bool,
}

impl StepDetectorConfig {
    pub fn new(mode: StepMode, counter: bool) -> Self {
        Self { mode, counter }
    }

    /// `[0x03, 0x18, b0, b1]`, b1 gains 0x08 when the counter is enabled
    pub fn command(&self) -> Command {
        let [b0, mut b1] = self.mode.bytes();
        if self.counter {
            b1 |= STEP_COUNTER_ENABLE;
        }
        Command::new(MODULE_ACCELEROMETER, REG_STEP_CONFIG, vec![b0, b1])
    }
}

/// The step detector and counter exist only on the BMI160
pub fn require_step_detector(registry: &ModuleRegistry) -> Result<()> {
    registry
        .require_implementation(MODULE_ACCELEROMETER, ACCEL_IMPL_BMI160, "step detector")
        .map(|_| ())
}

pub fn enable_step_detector() -> Command {
    Command::new(MODULE_ACCELEROMETER, REG_STEP_INTERRUPT_ENABLE, vec![1, 0])
}

pub fn disable_step_detector() -> Command {
    Command::new(MODULE_ACCELEROMETER, REG_STEP_INTERRUPT_ENABLE, vec![0, 1])
}

/// One notification per detected step
pub fn step_detected() -> Signal {
    Signal::new(
        "step",
        SignalTag::new(MODULE_ACCELEROMETER, REG_STEP_INTERRUPT),
        DataAttributes::new(1, false),
        ValueKind::Unsigned,
        1.0,
    )
}

/// Read the hardware step counter
pub fn read_step_counter() -> Command {
    Command::read(MODULE_ACCELEROMETER, REG_STEP_COUNTER, Vec::new())
}

/// Response to [`read_step_counter`]
pub fn step_count() -> Signal {
    Signal::new(
        "step-count",
        SignalTag::new(MODULE_ACCELEROMETER, REG_STEP_COUNTER | 0x80),
        DataAttributes::new(2, false),
        ValueKind::Unsigned,
        1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registry::ModuleInfo;

    #[test]
    fn test_step_detector_golden_bytes() {
        let detector = StepDetectorConfig::new(StepMode::Normal, false).command();
        assert_eq!(detector.encode(), vec![0x03, 0x18, 0x15, 0x03]);

        let counter = StepDetectorConfig::new(StepMode::Normal, true).command();
        assert_eq!(counter.encode(), vec![0x03, 0x18, 0x15, 0x0B]);
    }

    #[test]
    fn test_step_modes() {
        assert_eq!(
            StepDetectorConfig::new(StepMode::Sensitive, false).command().payload,
            vec![0x2D, 0x00]
        );
        assert_eq!(
            StepDetectorConfig::new(StepMode::Robust, true).command().payload,
            vec![0x1D, 0x0F]
        );
    }

    #[test]
    fn test_step_detector_requires_bmi160() {
        let mut registry = ModuleRegistry::new();
        registry.insert(ModuleInfo::present(MODULE_ACCELEROMETER, 3, 0));
        assert!(require_step_detector(&registry).unwrap_err().is_unsupported());

        registry.insert(ModuleInfo::present(MODULE_ACCELEROMETER, ACCEL_IMPL_BMI160, 0));
        assert!(require_step_detector(&registry).is_ok());
    }

    #[test]
    fn test_configure_bytes() {
        assert_eq!(
            configure(OutputRate::Hz100, Range::G4).encode(),
            vec![0x03, 0x03, 0x28, 0x05]
        );
        assert_eq!(read_step_counter().encode(), vec![0x03, 0x9A]);
    }
}
