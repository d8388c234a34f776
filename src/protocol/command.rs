//! Command and packet framing.
//!
//! Outbound commands and inbound packets share one layout:
//!
//! ```text
//! +--------+----------+-------------------+
//! | module | register | payload[0..n]     |
//! +--------+----------+-------------------+
//! ```
//!
//! Integers inside payloads are little-endian unless a builder documents
//! otherwise.

use serde::{Deserialize, Serialize};

use super::constants::*;
use crate::error::{Result, SensorError};

/// An outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    pub module: u8,
    pub register: u8,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(module: u8, register: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            module,
            register,
            payload: payload.into(),
        }
    }

    /// A read request for a register (sets the read bit).
    pub fn read(module: u8, register: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(module, register | READ_BIT, payload)
    }

    /// Module info read used during discovery.
    pub fn module_info(module: u8) -> Self {
        Self::read(module, REG_MODULE_INFO, Vec::new())
    }

    pub fn is_read(&self) -> bool {
        self.register & READ_BIT != 0
    }

    pub fn len(&self) -> usize {
        2 + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encode the command for transmission.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        buf.push(self.module);
        buf.push(self.register);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a command previously produced by [`Command::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(SensorError::ProtocolMismatch(format!(
                "command too short: expected at least 2 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self::new(bytes[0], bytes[1], &bytes[2..]))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:02X} {:02X}", self.module, self.register)?;
        for b in &self.payload {
            write!(f, " {:02X}", b)?;
        }
        write!(f, "]")
    }
}

/// A borrowed view of an inbound notification or read response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    pub module: u8,
    pub register: u8,
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(SensorError::ProtocolMismatch(format!(
                "packet too short: expected at least 2 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            module: bytes[0],
            register: bytes[1],
            payload: &bytes[2..],
        })
    }

    pub fn is_read(&self) -> bool {
        self.register & READ_BIT != 0
    }

    /// First payload byte, used as a sub-identifier (processor id, channel, ...)
    pub fn index(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// Correlation key pairing a command with its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    pub module: u8,
    pub register: u8,
    /// When set, the first payload byte of the response must match
    pub index: Option<u8>,
}

impl ResponseKey {
    pub fn new(module: u8, register: u8) -> Self {
        Self {
            module,
            register,
            index: None,
        }
    }

    pub fn indexed(module: u8, register: u8, index: u8) -> Self {
        Self {
            module,
            register,
            index: Some(index),
        }
    }

    /// Key for the response to a command echoing its own header
    pub fn echo(command: &Command) -> Self {
        Self::new(command.module, command.register)
    }

    pub fn matches(&self, packet: &Packet<'_>) -> bool {
        self.module == packet.module
            && self.register == packet.register
            && self.index.map_or(true, |idx| packet.index() == Some(idx))
    }
}

impl std::fmt::Display for ResponseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(idx) => write!(f, "[{:02X} {:02X} {:02X}]", self.module, self.register, idx),
            None => write!(f, "[{:02X} {:02X}]", self.module, self.register),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encode_decode() {
        let cmd = Command::new(MODULE_LED, 0x01, vec![0x01]);
        let bytes = cmd.encode();
        assert_eq!(bytes, vec![0x02, 0x01, 0x01]);
        assert_eq!(Command::decode(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_read_sets_bit() {
        let cmd = Command::module_info(MODULE_BAROMETER);
        assert_eq!(cmd.encode(), vec![0x12, 0x80]);
        assert!(cmd.is_read());
    }

    #[test]
    fn test_short_packet_rejected() {
        assert!(Packet::parse(&[0x09]).is_err());
        assert!(Command::decode(&[]).is_err());
    }

    #[test]
    fn test_response_key_matching() {
        let bytes = [0x04, 0x81, 0x01, 0xA0, 0x00];
        let packet = Packet::parse(&bytes).unwrap();
        assert!(ResponseKey::indexed(0x04, 0x81, 0x01).matches(&packet));
        assert!(!ResponseKey::indexed(0x04, 0x81, 0x00).matches(&packet));
        assert!(ResponseKey::new(0x04, 0x81).matches(&packet));
        assert!(!ResponseKey::new(0x04, 0x01).matches(&packet));
    }

    #[test]
    fn test_display() {
        let cmd = Command::new(0x09, 0x06, vec![0x03]);
        assert_eq!(cmd.to_string(), "[09 06 03]");
    }
}
