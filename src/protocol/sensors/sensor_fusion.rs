//! Sensor fusion output

use serde::{Deserialize, Serialize};

use crate::protocol::command::Command;
use crate::protocol::constants::MODULE_SENSOR_FUSION;
use crate::protocol::signal::{DataAttributes, Signal, SignalTag, ValueKind};

pub const REG_ENABLE: u8 = 0x01;
pub const REG_MODE: u8 = 0x02;
pub const REG_OUTPUT_ENABLE: u8 = 0x03;
pub const REG_QUATERNION: u8 = 0x07;

/// Output mask bit for the quaternion stream
const OUTPUT_QUATERNION: u8 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FusionMode {
    #[default]
    Ndof = 1,
    ImuPlus = 2,
    Compass = 3,
    M4g = 4,
}

pub fn configure(mode: FusionMode) -> Command {
    Command::new(MODULE_SENSOR_FUSION, REG_MODE, vec![mode as u8, 0x00])
}

pub fn enable_quaternion() -> Command {
    Command::new(MODULE_SENSOR_FUSION, REG_OUTPUT_ENABLE, vec![OUTPUT_QUATERNION, 0x00])
}

pub fn start() -> Command {
    Command::new(MODULE_SENSOR_FUSION, REG_ENABLE, vec![1])
}

pub fn stop() -> Command {
    Command::new(MODULE_SENSOR_FUSION, REG_ENABLE, vec![0])
}

/// Orientation quaternion, four little-endian f32 (w, x, y, z)
pub fn quaternion() -> Signal {
    Signal::new(
        "quaternion",
        SignalTag::new(MODULE_SENSOR_FUSION, REG_QUATERNION),
        DataAttributes::new(16, true),
        ValueKind::Quaternion,
        1.0,
    )
}
