//! Push button

use crate::protocol::constants::MODULE_SWITCH;
use crate::protocol::signal::{DataAttributes, Signal, SignalTag, ValueKind};

pub const REG_STATE: u8 = 0x01;

/// 1 while pressed, 0 when released
pub fn state() -> Signal {
    Signal::new(
        "switch",
        SignalTag::new(MODULE_SWITCH, REG_STATE),
        DataAttributes::new(1, false),
        ValueKind::Unsigned,
        1.0,
    )
}
