//! LED patterns

use serde::{Deserialize, Serialize};

use crate::protocol::command::Command;
use crate::protocol::constants::MODULE_LED;

pub const REG_PLAY: u8 = 0x01;
pub const REG_STOP: u8 = 0x02;
pub const REG_PATTERN: u8 = 0x03;

/// Repeat count meaning "until stopped"
pub const REPEAT_INDEFINITELY: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Green = 0,
    Red = 1,
    Blue = 2,
}

/// Flash pattern timings in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub high_intensity: u8,
    pub low_intensity: u8,
    pub rise_time: u16,
    pub high_time: u16,
    pub fall_time: u16,
    pub pulse_duration: u16,
    pub delay: u16,
    pub repeat: u8,
}

impl Pattern {
    pub fn blink(repeat: u8) -> Self {
        Self {
            high_intensity: 31,
            low_intensity: 0,
            rise_time: 0,
            high_time: 50,
            fall_time: 0,
            pulse_duration: 500,
            delay: 0,
            repeat,
        }
    }

    pub fn solid(repeat: u8) -> Self {
        Self {
            high_intensity: 31,
            low_intensity: 31,
            rise_time: 0,
            high_time: 500,
            fall_time: 0,
            pulse_duration: 1000,
            delay: 0,
            repeat,
        }
    }

    /// `[0x02, 0x03, color, 0x02, high, low, rise, high_time, fall, pulse, delay, repeat]`
    pub fn command(&self, color: Color) -> Command {
        let mut payload = vec![color as u8, 0x02, self.high_intensity, self.low_intensity];
        for v in [
            self.rise_time,
            self.high_time,
            self.fall_time,
            self.pulse_duration,
            self.delay,
        ] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.push(self.repeat);
        Command::new(MODULE_LED, REG_PATTERN, payload)
    }
}

pub fn play() -> Command {
    Command::new(MODULE_LED, REG_PLAY, vec![1])
}

/// Stop playback, optionally clearing every programmed pattern
pub fn stop(clear: bool) -> Command {
    Command::new(MODULE_LED, REG_STOP, vec![u8::from(clear)])
}
