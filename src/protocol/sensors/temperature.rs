//! Temperature channels
//!
//! Temperature is only produced on request: every read of a channel answers
//! with `[0x04, 0x81, channel, value i16]` in eighths of a degree.

use crate::protocol::command::Command;
use crate::protocol::constants::MODULE_TEMPERATURE;
use crate::protocol::signal::{DataAttributes, Signal, SignalTag, ValueKind};

pub const REG_VALUE: u8 = 0x01;

pub fn read(channel: u8) -> Command {
    Command::read(MODULE_TEMPERATURE, REG_VALUE, vec![channel])
}

/// Temperature in degrees Celsius
pub fn channel(channel: u8) -> Signal {
    Signal::new(
        format!("temperature[{}]", channel),
        SignalTag::indexed(MODULE_TEMPERATURE, REG_VALUE | 0x80, channel),
        DataAttributes::new(2, true),
        ValueKind::Signed,
        8.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataValue;

    #[test]
    fn test_read_command() {
        assert_eq!(read(1).encode(), vec![0x04, 0x81, 0x01]);
    }

    #[test]
    fn test_decode_celsius() {
        let value = channel(0).decode(&200i16.to_le_bytes()).unwrap();
        assert_eq!(value, DataValue::Float(25.0));
    }
}
