//! Typed data signals
//!
//! A [`Signal`] describes where a value comes from on the wire and how its
//! bytes decode. Root signals are produced by sensor modules; derived signals
//! are produced by data processors and carry the processor's notify tag.

use serde::{Deserialize, Serialize};

use super::constants::*;
use crate::error::{Result, SensorError};
use crate::types::{DataValue, Quaternion, Vector3};

/// Wire identity of a signal: module, register and optional sub-identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalTag {
    pub module: u8,
    pub register: u8,
    pub index: Option<u8>,
}

impl SignalTag {
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

    /// Output tag of a data processor
    pub fn processor(id: u8) -> Self {
        Self::indexed(MODULE_DATA_PROCESSOR, DP_NOTIFY, id)
    }

    /// Sub-identifier byte used when the tag is a processor or logger input
    pub fn index_byte(&self) -> u8 {
        self.index.unwrap_or(NO_INDEX)
    }

    pub fn is_processor(&self) -> bool {
        self.module == MODULE_DATA_PROCESSOR && self.register == DP_NOTIFY
    }
}

impl std::fmt::Display for SignalTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(idx) => write!(f, "{:02X}:{:02X}:{:02X}", self.module, self.register, idx),
            None => write!(f, "{:02X}:{:02X}", self.module, self.register),
        }
    }
}

/// How the bytes of one sample decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Unsigned,
    Signed,
    Float,
    /// Three signed 16-bit axes
    Vector,
    /// Four little-endian f32 components (w, x, y, z)
    Quaternion,
    Bytes,
}

/// Layout of a signal's bytes inside a notification payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAttributes {
    /// Bytes per sample
    pub length: u8,
    /// Byte offset of the sample within the source payload
    pub offset: u8,
    pub signed: bool,
    /// Samples carried per notification (packer output)
    pub copies: u8,
}

impl DataAttributes {
    pub fn new(length: u8, signed: bool) -> Self {
        Self {
            length,
            offset: 0,
            signed,
            copies: 1,
        }
    }

    /// Packed size of one notification
    pub fn total_len(&self) -> usize {
        self.length as usize * self.copies as usize
    }

    /// `((len - 1) << 5) | offset`, the source byte used by processor and logger creation
    pub fn source_byte(&self) -> u8 {
        (self.length.saturating_sub(1) << 5) | (self.offset & 0x1F)
    }

    pub fn is_scalar(&self) -> bool {
        self.length >= 1 && self.length <= 4
    }
}

/// A typed, named data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub tag: SignalTag,
    pub attributes: DataAttributes,
    pub kind: ValueKind,
    /// Firmware units per user unit; 1.0 means the raw value is the user value
    pub scale: f32,
}

impl Signal {
    pub fn new(
        name: impl Into<String>,
        tag: SignalTag,
        attributes: DataAttributes,
        kind: ValueKind,
        scale: f32,
    ) -> Self {
        Self {
            name: name.into(),
            tag,
            attributes,
            kind,
            scale,
        }
    }

    /// Select one component of a multi-axis signal
    pub fn component(&self, axis: u8) -> Result<Signal> {
        if self.kind != ValueKind::Vector {
            return Err(SensorError::InvalidConfig(format!(
                "signal '{}' has no components",
                self.name
            )));
        }
        if axis > 2 {
            return Err(SensorError::InvalidConfig(format!(
                "component {} out of range for '{}'",
                axis, self.name
            )));
        }
        let mut attributes = self.attributes;
        attributes.length = 2;
        attributes.offset = self.attributes.offset + axis * 2;
        attributes.signed = true;
        Ok(Signal {
            name: format!("{}[{}]", self.name, axis),
            tag: self.tag,
            attributes,
            kind: ValueKind::Signed,
            scale: self.scale,
        })
    }

    /// Number of 4-byte log ids needed to persist one sample
    pub fn log_slots(&self) -> usize {
        (self.attributes.length as usize).div_ceil(LOG_RECORD_PAYLOAD)
    }

    /// Convert a user-unit value into the firmware's integer representation
    pub fn to_firmware(&self, value: f32) -> i32 {
        (value * self.scale).round() as i32
    }

    /// Decode one sample (exactly `attributes.length` bytes)
    pub fn decode(&self, bytes: &[u8]) -> Result<DataValue> {
        let len = self.attributes.length as usize;
        if bytes.len() < len {
            return Err(SensorError::ProtocolMismatch(format!(
                "{}: expected {} bytes, got {}",
                self.name,
                len,
                bytes.len()
            )));
        }
        let bytes = &bytes[..len];

        let value = match self.kind {
            ValueKind::Unsigned => {
                let raw = read_unsigned(bytes);
                if self.scale == 1.0 {
                    DataValue::UInt(raw)
                } else {
                    DataValue::Float(raw as f32 / self.scale)
                }
            }
            ValueKind::Signed => {
                let raw = read_signed(bytes);
                if self.scale == 1.0 {
                    DataValue::Int(raw)
                } else {
                    DataValue::Float(raw as f32 / self.scale)
                }
            }
            ValueKind::Float => {
                if len != 4 {
                    return Err(SensorError::ProtocolMismatch(format!(
                        "{}: float sample must be 4 bytes",
                        self.name
                    )));
                }
                DataValue::Float(read_f32(bytes))
            }
            ValueKind::Vector => {
                if len != 6 {
                    return Err(SensorError::ProtocolMismatch(format!(
                        "{}: vector sample must be 6 bytes",
                        self.name
                    )));
                }
                let axis = |i: usize| i16::from_le_bytes([bytes[i], bytes[i + 1]]) as f32 / self.scale;
                DataValue::Vector(Vector3::new(axis(0), axis(2), axis(4)))
            }
            ValueKind::Quaternion => {
                if len != 16 {
                    return Err(SensorError::ProtocolMismatch(format!(
                        "{}: quaternion sample must be 16 bytes",
                        self.name
                    )));
                }
                DataValue::Quaternion(Quaternion {
                    w: read_f32(&bytes[0..4]),
                    x: read_f32(&bytes[4..8]),
                    y: read_f32(&bytes[8..12]),
                    z: read_f32(&bytes[12..16]),
                })
            }
            ValueKind::Bytes => DataValue::Bytes(bytes.to_vec()),
        };
        Ok(value)
    }

    /// Decode every packed copy in a notification payload
    pub fn decode_all(&self, payload: &[u8]) -> Result<Vec<DataValue>> {
        let len = self.attributes.length as usize;
        if len == 0 {
            return Ok(vec![DataValue::Bytes(Vec::new())]);
        }
        let copies = self.attributes.copies.max(1) as usize;
        if payload.len() < len * copies {
            return Err(SensorError::ProtocolMismatch(format!(
                "{}: expected {} packed bytes, got {}",
                self.name,
                len * copies,
                payload.len()
            )));
        }
        payload
            .chunks_exact(len)
            .take(copies)
            .map(|chunk| self.decode(chunk))
            .collect()
    }
}

fn read_unsigned(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)))
}

fn read_signed(bytes: &[u8]) -> i32 {
    let width = bytes.len().min(4);
    let raw = read_unsigned(bytes);
    if width == 0 || width == 4 {
        return raw as i32;
    }
    let shift = 32 - 8 * width as u32;
    ((raw << shift) as i32) >> shift
}

fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accel() -> Signal {
        Signal::new(
            "acceleration",
            SignalTag::new(MODULE_ACCELEROMETER, 0x04),
            DataAttributes::new(6, true),
            ValueKind::Vector,
            16384.0,
        )
    }

    #[test]
    fn test_vector_decode() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0x00, 0x00];
        let value = accel().decode(&bytes).unwrap();
        assert_eq!(value, DataValue::Vector(Vector3::new(1.0, -1.0, 0.0)));
    }

    #[test]
    fn test_component_selection() {
        let y = accel().component(1).unwrap();
        assert_eq!(y.attributes.offset, 2);
        assert_eq!(y.attributes.length, 2);
        assert_eq!(y.attributes.source_byte(), 0x22);
        assert_eq!(y.decode(&[0x00, 0x20]).unwrap(), DataValue::Float(0.5));
        assert!(accel().component(3).is_err());
    }

    #[test]
    fn test_signed_sign_extension() {
        let sig = Signal::new(
            "delta",
            SignalTag::processor(0),
            DataAttributes::new(1, true),
            ValueKind::Signed,
            1.0,
        );
        assert_eq!(sig.decode(&[0xFF]).unwrap(), DataValue::Int(-1));
    }

    #[test]
    fn test_packed_decode() {
        let mut attributes = DataAttributes::new(2, false);
        attributes.copies = 3;
        let sig = Signal::new("packed", SignalTag::processor(4), attributes, ValueKind::Unsigned, 1.0);
        let values = sig.decode_all(&[1, 0, 2, 0, 3, 0]).unwrap();
        assert_eq!(
            values,
            vec![DataValue::UInt(1), DataValue::UInt(2), DataValue::UInt(3)]
        );
        assert!(sig.decode_all(&[1, 0]).is_err());
    }

    #[test]
    fn test_log_slots_and_firmware_scale() {
        let quat = Signal::new(
            "quaternion",
            SignalTag::new(MODULE_SENSOR_FUSION, 0x07),
            DataAttributes::new(16, false),
            ValueKind::Quaternion,
            1.0,
        );
        assert_eq!(quat.log_slots(), 4);
        assert_eq!(accel().to_firmware(0.5), 8192);
    }
}
