//! Data processor configurations
//!
//! Every firmware processor kind has a fixed-layout configuration whose first
//! byte is the kind tag. [`ProcessorConfig`] is the closed set of kinds this
//! crate can create, edit, serialize and restore.
//!
//! # Layouts
//!
//! | Kind | Bytes |
//! |------|-------|
//! | passthrough | `[0x01, mode, count u16]` |
//! | accumulator / counter | `[0x02, (out-1) \| (in-1)<<2 \| mode<<4]` |
//! | average | `[0x03, (out-1) \| (in-1)<<2, size]` |
//! | comparator | `[0x06, signed, op, 0x00, reference i32]` |
//! | time limiter | `[0x08, (len-1) \| mode<<3, period u32]` |
//! | math | `[0x09, (out-1) \| (in-1)<<2 \| signed<<4, op, rhs i32]` |
//! | pulse | `[0x0B, len-1, 0x00, output, threshold i32, width u16]` |
//! | delta | `[0x0C, (len-1) \| signed<<2 \| mode<<3, magnitude u32]` |
//! | packer | `[0x10, len-1, count-1]` |

use serde::{Deserialize, Serialize};

use super::constants::MAX_NOTIFY_PAYLOAD;
use super::signal::{DataAttributes, Signal, SignalTag, ValueKind};
use crate::error::{Result, SensorError};

pub const TAG_PASSTHROUGH: u8 = 0x01;
pub const TAG_ACCUMULATOR: u8 = 0x02;
pub const TAG_AVERAGE: u8 = 0x03;
pub const TAG_COMPARATOR: u8 = 0x06;
pub const TAG_TIME: u8 = 0x08;
pub const TAG_MATH: u8 = 0x09;
pub const TAG_PULSE: u8 = 0x0B;
pub const TAG_DELTA: u8 = 0x0C;
pub const TAG_PACKER: u8 = 0x10;

/// Processor kinds, used to validate edits by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessorKind {
    Passthrough,
    Accumulator,
    Counter,
    Average,
    Comparator,
    TimeLimit,
    Math,
    Pulse,
    Delta,
    Packer,
}

impl std::fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProcessorKind::Passthrough => "passthrough",
            ProcessorKind::Accumulator => "accumulator",
            ProcessorKind::Counter => "counter",
            ProcessorKind::Average => "average",
            ProcessorKind::Comparator => "comparator",
            ProcessorKind::TimeLimit => "time",
            ProcessorKind::Math => "math",
            ProcessorKind::Pulse => "pulse",
            ProcessorKind::Delta => "delta",
            ProcessorKind::Packer => "packer",
        };
        write!(f, "{}", name)
    }
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn to_wire(self) -> u8 {
                match self {
                    $($name::$variant => $value),+
                }
            }

            pub fn from_wire(value: u8) -> Result<Self> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(SensorError::ProtocolMismatch(format!(
                        "unknown {} value {:#04x}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum!(
    /// Passthrough gating mode
    PassthroughMode { All = 0, Conditional = 1, Count = 2 }
);

wire_enum!(
    ComparatorOp { Eq = 0, Neq = 1, Lt = 2, Lte = 3, Gt = 4, Gte = 5 }
);

wire_enum!(
    /// Time limiter output mode
    TimeMode { Absolute = 0, Differential = 1 }
);

wire_enum!(
    MathOp {
        Add = 1,
        Multiply = 2,
        Divide = 3,
        Modulus = 4,
        Exponent = 5,
        Sqrt = 6,
        LeftShift = 7,
        RightShift = 8,
        Subtract = 9,
        Abs = 10,
        Constant = 11,
    }
);

wire_enum!(
    /// What a pulse detector reports once a pulse ends
    PulseOutput { Width = 0, Area = 1, Peak = 2, OnDetect = 3 }
);

wire_enum!(
    DeltaMode { Absolute = 0, Differential = 1, Binary = 2 }
);

impl MathOp {
    /// Whether the right-hand side is in the signal's units (and therefore scaled)
    pub fn scales_rhs(self) -> bool {
        matches!(
            self,
            MathOp::Add | MathOp::Subtract | MathOp::Modulus | MathOp::Constant
        )
    }
}

/// Configuration of one firmware processor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessorConfig {
    Passthrough {
        mode: PassthroughMode,
        count: u16,
    },
    Accumulator {
        output: u8,
        input: u8,
    },
    Counter {
        output: u8,
        input: u8,
    },
    Average {
        output: u8,
        input: u8,
        size: u8,
    },
    Comparator {
        signed: bool,
        op: ComparatorOp,
        reference: i32,
    },
    TimeLimit {
        length: u8,
        mode: TimeMode,
        period: u32,
    },
    Math {
        output: u8,
        input: u8,
        signed: bool,
        op: MathOp,
        rhs: i32,
    },
    Pulse {
        length: u8,
        output: PulseOutput,
        threshold: i32,
        width: u16,
    },
    Delta {
        length: u8,
        signed: bool,
        mode: DeltaMode,
        magnitude: u32,
    },
    Packer {
        length: u8,
        count: u8,
    },
}

fn size_bits(size: u8) -> u8 {
    size.saturating_sub(1) & 0x03
}

fn need(bytes: &[u8], len: usize, kind: ProcessorKind) -> Result<()> {
    if bytes.len() < len {
        return Err(SensorError::ProtocolMismatch(format!(
            "{} config: expected {} bytes, got {}",
            kind,
            len,
            bytes.len()
        )));
    }
    Ok(())
}

fn le_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

impl ProcessorConfig {
    pub fn kind(&self) -> ProcessorKind {
        match self {
            ProcessorConfig::Passthrough { .. } => ProcessorKind::Passthrough,
            ProcessorConfig::Accumulator { .. } => ProcessorKind::Accumulator,
            ProcessorConfig::Counter { .. } => ProcessorKind::Counter,
            ProcessorConfig::Average { .. } => ProcessorKind::Average,
            ProcessorConfig::Comparator { .. } => ProcessorKind::Comparator,
            ProcessorConfig::TimeLimit { .. } => ProcessorKind::TimeLimit,
            ProcessorConfig::Math { .. } => ProcessorKind::Math,
            ProcessorConfig::Pulse { .. } => ProcessorKind::Pulse,
            ProcessorConfig::Delta { .. } => ProcessorKind::Delta,
            ProcessorConfig::Packer { .. } => ProcessorKind::Packer,
        }
    }

    /// Kind tag byte (first configuration byte)
    pub fn tag(&self) -> u8 {
        match self {
            ProcessorConfig::Passthrough { .. } => TAG_PASSTHROUGH,
            ProcessorConfig::Accumulator { .. } | ProcessorConfig::Counter { .. } => {
                TAG_ACCUMULATOR
            }
            ProcessorConfig::Average { .. } => TAG_AVERAGE,
            ProcessorConfig::Comparator { .. } => TAG_COMPARATOR,
            ProcessorConfig::TimeLimit { .. } => TAG_TIME,
            ProcessorConfig::Math { .. } => TAG_MATH,
            ProcessorConfig::Pulse { .. } => TAG_PULSE,
            ProcessorConfig::Delta { .. } => TAG_DELTA,
            ProcessorConfig::Packer { .. } => TAG_PACKER,
        }
    }

    /// Encode the full configuration payload
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.tag()];
        match self {
            ProcessorConfig::Passthrough { mode, count } => {
                buf.push(mode.to_wire());
                buf.extend_from_slice(&count.to_le_bytes());
            }
            ProcessorConfig::Accumulator { output, input } => {
                buf.push(size_bits(*output) | (size_bits(*input) << 2));
            }
            ProcessorConfig::Counter { output, input } => {
                buf.push(size_bits(*output) | (size_bits(*input) << 2) | (1 << 4));
            }
            ProcessorConfig::Average {
                output,
                input,
                size,
            } => {
                buf.push(size_bits(*output) | (size_bits(*input) << 2));
                buf.push(*size);
            }
            ProcessorConfig::Comparator {
                signed,
                op,
                reference,
            } => {
                buf.push(u8::from(*signed));
                buf.push(op.to_wire());
                buf.push(0x00);
                buf.extend_from_slice(&reference.to_le_bytes());
            }
            ProcessorConfig::TimeLimit {
                length,
                mode,
                period,
            } => {
                buf.push((length.saturating_sub(1) & 0x07) | (mode.to_wire() << 3));
                buf.extend_from_slice(&period.to_le_bytes());
            }
            ProcessorConfig::Math {
                output,
                input,
                signed,
                op,
                rhs,
            } => {
                buf.push(size_bits(*output) | (size_bits(*input) << 2) | (u8::from(*signed) << 4));
                buf.push(op.to_wire());
                buf.extend_from_slice(&rhs.to_le_bytes());
            }
            ProcessorConfig::Pulse {
                length,
                output,
                threshold,
                width,
            } => {
                buf.push(length.saturating_sub(1));
                buf.push(0x00);
                buf.push(output.to_wire());
                buf.extend_from_slice(&threshold.to_le_bytes());
                buf.extend_from_slice(&width.to_le_bytes());
            }
            ProcessorConfig::Delta {
                length,
                signed,
                mode,
                magnitude,
            } => {
                buf.push(
                    (length.saturating_sub(1) & 0x03)
                        | (u8::from(*signed) << 2)
                        | (mode.to_wire() << 3),
                );
                buf.extend_from_slice(&magnitude.to_le_bytes());
            }
            ProcessorConfig::Packer { length, count } => {
                buf.push(length.saturating_sub(1));
                buf.push(count.saturating_sub(1));
            }
        }
        buf
    }

    /// Decode a configuration payload produced by [`ProcessorConfig::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some(&tag) = bytes.first() else {
            return Err(SensorError::ProtocolMismatch(
                "empty processor config".to_string(),
            ));
        };
        let body = &bytes[1..];

        let config = match tag {
            TAG_PASSTHROUGH => {
                need(body, 3, ProcessorKind::Passthrough)?;
                ProcessorConfig::Passthrough {
                    mode: PassthroughMode::from_wire(body[0])?,
                    count: le_u16(&body[1..3]),
                }
            }
            TAG_ACCUMULATOR => {
                need(body, 1, ProcessorKind::Accumulator)?;
                let output = (body[0] & 0x03) + 1;
                let input = ((body[0] >> 2) & 0x03) + 1;
                match (body[0] >> 4) & 0x01 {
                    0 => ProcessorConfig::Accumulator { output, input },
                    _ => ProcessorConfig::Counter { output, input },
                }
            }
            TAG_AVERAGE => {
                need(body, 2, ProcessorKind::Average)?;
                ProcessorConfig::Average {
                    output: (body[0] & 0x03) + 1,
                    input: ((body[0] >> 2) & 0x03) + 1,
                    size: body[1],
                }
            }
            TAG_COMPARATOR => {
                need(body, 7, ProcessorKind::Comparator)?;
                ProcessorConfig::Comparator {
                    signed: body[0] != 0,
                    op: ComparatorOp::from_wire(body[1])?,
                    reference: le_i32(&body[3..7]),
                }
            }
            TAG_TIME => {
                need(body, 5, ProcessorKind::TimeLimit)?;
                ProcessorConfig::TimeLimit {
                    length: (body[0] & 0x07) + 1,
                    mode: TimeMode::from_wire((body[0] >> 3) & 0x07)?,
                    period: le_u32(&body[1..5]),
                }
            }
            TAG_MATH => {
                need(body, 6, ProcessorKind::Math)?;
                ProcessorConfig::Math {
                    output: (body[0] & 0x03) + 1,
                    input: ((body[0] >> 2) & 0x03) + 1,
                    signed: (body[0] >> 4) & 0x01 != 0,
                    op: MathOp::from_wire(body[1])?,
                    rhs: le_i32(&body[2..6]),
                }
            }
            TAG_PULSE => {
                need(body, 9, ProcessorKind::Pulse)?;
                ProcessorConfig::Pulse {
                    length: body[0].saturating_add(1),
                    output: PulseOutput::from_wire(body[2])?,
                    threshold: le_i32(&body[3..7]),
                    width: le_u16(&body[7..9]),
                }
            }
            TAG_DELTA => {
                need(body, 5, ProcessorKind::Delta)?;
                ProcessorConfig::Delta {
                    length: (body[0] & 0x03) + 1,
                    signed: (body[0] >> 2) & 0x01 != 0,
                    mode: DeltaMode::from_wire((body[0] >> 3) & 0x07)?,
                    magnitude: le_u32(&body[1..5]),
                }
            }
            TAG_PACKER => {
                need(body, 2, ProcessorKind::Packer)?;
                ProcessorConfig::Packer {
                    length: body[0].saturating_add(1),
                    count: body[1].saturating_add(1),
                }
            }
            other => {
                return Err(SensorError::ProtocolMismatch(format!(
                    "unknown processor kind tag {:#04x}",
                    other
                )))
            }
        };
        Ok(config)
    }

    /// Check that this configuration can consume `input`
    pub fn validate(&self, input: &Signal) -> Result<()> {
        let attrs = &input.attributes;
        let scalar_only = matches!(
            self,
            ProcessorConfig::Accumulator { .. }
                | ProcessorConfig::Average { .. }
                | ProcessorConfig::Comparator { .. }
                | ProcessorConfig::Math { .. }
                | ProcessorConfig::Pulse { .. }
                | ProcessorConfig::Delta { .. }
        );
        if scalar_only && !attrs.is_scalar() {
            return Err(SensorError::InvalidConfig(format!(
                "{} needs a scalar input of at most 4 bytes, '{}' is {} bytes",
                self.kind(),
                input.name,
                attrs.length
            )));
        }
        if attrs.copies > 1 {
            return Err(SensorError::InvalidConfig(format!(
                "'{}' is packed and cannot feed another processor",
                input.name
            )));
        }
        match self {
            ProcessorConfig::Average { size, .. } if *size == 0 => Err(
                SensorError::InvalidConfig("average size must be at least 1".to_string()),
            ),
            ProcessorConfig::Packer { length, count } => {
                let total = *length as usize * *count as usize;
                if *count == 0 || total > MAX_NOTIFY_PAYLOAD {
                    Err(SensorError::InvalidConfig(format!(
                        "packer of {} x {} bytes does not fit one notification",
                        count, length
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// The signal this processor emits given its input, tagged with the allocated id
    pub fn output_signal(&self, input: &Signal, id: u8) -> Signal {
        let mut attributes = DataAttributes {
            offset: 0,
            ..input.attributes
        };
        let mut kind = input.kind;
        let mut scale = input.scale;

        match self {
            ProcessorConfig::Passthrough { .. }
            | ProcessorConfig::Comparator { .. }
            | ProcessorConfig::TimeLimit { .. }
            | ProcessorConfig::Average { .. } => {}
            ProcessorConfig::Accumulator { output, .. } => {
                attributes.length = *output;
            }
            ProcessorConfig::Counter { output, .. } => {
                attributes = DataAttributes::new(*output, false);
                kind = ValueKind::Unsigned;
                scale = 1.0;
            }
            ProcessorConfig::Math {
                output, signed, op, ..
            } => {
                attributes.length = *output;
                attributes.signed = *signed && *op != MathOp::Abs;
                if kind != ValueKind::Float {
                    kind = if attributes.signed {
                        ValueKind::Signed
                    } else {
                        ValueKind::Unsigned
                    };
                }
            }
            ProcessorConfig::Pulse { output, .. } => match output {
                PulseOutput::Width => {
                    attributes = DataAttributes::new(2, false);
                    kind = ValueKind::Unsigned;
                    scale = 1.0;
                }
                PulseOutput::Area => {
                    attributes.length = 4;
                }
                PulseOutput::Peak => {}
                PulseOutput::OnDetect => {
                    attributes = DataAttributes::new(1, false);
                    kind = ValueKind::Unsigned;
                    scale = 1.0;
                }
            },
            ProcessorConfig::Delta { mode, .. } => match mode {
                DeltaMode::Absolute => {}
                DeltaMode::Differential => {
                    attributes.signed = true;
                    kind = ValueKind::Signed;
                }
                DeltaMode::Binary => {
                    attributes = DataAttributes::new(1, true);
                    kind = ValueKind::Signed;
                    scale = 1.0;
                }
            },
            ProcessorConfig::Packer { count, .. } => {
                attributes.copies = *count;
            }
        }

        Signal {
            name: format!("{}:{}", input.name, self.kind()),
            tag: SignalTag::processor(id),
            attributes,
            kind,
            scale,
        }
    }

    /// Payload for the state register that resets this processor, if it has state
    pub fn reset_state(&self) -> Option<Vec<u8>> {
        match self {
            ProcessorConfig::Accumulator { .. } | ProcessorConfig::Counter { .. } => {
                Some(vec![0, 0, 0, 0])
            }
            ProcessorConfig::Passthrough { count, .. } => Some(count.to_le_bytes().to_vec()),
            ProcessorConfig::Average { .. } => Some(Vec::new()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::MODULE_ACCELEROMETER;
    use proptest::prelude::*;

    fn scalar(len: u8, signed: bool) -> Signal {
        Signal::new(
            "x",
            SignalTag::new(MODULE_ACCELEROMETER, 0x04),
            DataAttributes::new(len, signed),
            if signed {
                ValueKind::Signed
            } else {
                ValueKind::Unsigned
            },
            1.0,
        )
    }

    fn size() -> impl Strategy<Value = u8> {
        1u8..=4
    }

    fn config_strategy() -> impl Strategy<Value = ProcessorConfig> {
        prop_oneof![
            (prop::sample::select(PassthroughMode::ALL), any::<u16>())
                .prop_map(|(mode, count)| ProcessorConfig::Passthrough { mode, count }),
            (size(), size()).prop_map(|(output, input)| ProcessorConfig::Accumulator { output, input }),
            (size(), size()).prop_map(|(output, input)| ProcessorConfig::Counter { output, input }),
            (size(), size(), any::<u8>())
                .prop_map(|(output, input, size)| ProcessorConfig::Average { output, input, size }),
            (any::<bool>(), prop::sample::select(ComparatorOp::ALL), any::<i32>()).prop_map(
                |(signed, op, reference)| ProcessorConfig::Comparator {
                    signed,
                    op,
                    reference
                }
            ),
            (1u8..=8, prop::sample::select(TimeMode::ALL), any::<u32>()).prop_map(
                |(length, mode, period)| ProcessorConfig::TimeLimit {
                    length,
                    mode,
                    period
                }
            ),
            (size(), size(), any::<bool>(), prop::sample::select(MathOp::ALL), any::<i32>())
                .prop_map(|(output, input, signed, op, rhs)| ProcessorConfig::Math {
                    output,
                    input,
                    signed,
                    op,
                    rhs
                }),
            (1u8..=4, prop::sample::select(PulseOutput::ALL), any::<i32>(), any::<u16>())
                .prop_map(|(length, output, threshold, width)| ProcessorConfig::Pulse {
                    length,
                    output,
                    threshold,
                    width
                }),
            (size(), any::<bool>(), prop::sample::select(DeltaMode::ALL), any::<u32>()).prop_map(
                |(length, signed, mode, magnitude)| ProcessorConfig::Delta {
                    length,
                    signed,
                    mode,
                    magnitude
                }
            ),
            (1u8..=16, 1u8..=8).prop_map(|(length, count)| ProcessorConfig::Packer { length, count }),
        ]
    }

    proptest! {
        #[test]
        fn prop_config_round_trip(config in config_strategy()) {
            let bytes = config.encode();
            prop_assert_eq!(bytes[0], config.tag());
            let decoded = ProcessorConfig::decode(&bytes).unwrap();
            prop_assert_eq!(decoded, config);
        }

        #[test]
        fn prop_truncated_config_never_panics(config in config_strategy(), cut in 0usize..12) {
            let bytes = config.encode();
            let cut = cut.min(bytes.len());
            let _ = ProcessorConfig::decode(&bytes[..cut]);
        }
    }

    #[test]
    fn test_comparator_layout() {
        let config = ProcessorConfig::Comparator {
            signed: true,
            op: ComparatorOp::Gt,
            reference: 1000,
        };
        assert_eq!(config.encode(), vec![0x06, 0x01, 0x04, 0x00, 0xE8, 0x03, 0x00, 0x00]);
    }

    #[test]
    fn test_counter_and_accumulator_share_tag() {
        let acc = ProcessorConfig::Accumulator { output: 4, input: 2 };
        let count = ProcessorConfig::Counter { output: 4, input: 2 };
        assert_eq!(acc.encode(), vec![0x02, 0x07]);
        assert_eq!(count.encode(), vec![0x02, 0x17]);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(ProcessorConfig::decode(&[0x7F, 0x00]).is_err());
        assert!(ProcessorConfig::decode(&[]).is_err());
    }

    #[test]
    fn test_output_signal_counter() {
        let input = scalar(2, true);
        let out = ProcessorConfig::Counter { output: 4, input: 2 }.output_signal(&input, 7);
        assert_eq!(out.tag, SignalTag::processor(7));
        assert_eq!(out.kind, ValueKind::Unsigned);
        assert_eq!(out.attributes.length, 4);
    }

    #[test]
    fn test_validate_rejects_vector_into_math() {
        let mut input = scalar(6, true);
        input.kind = ValueKind::Vector;
        let math = ProcessorConfig::Math {
            output: 4,
            input: 4,
            signed: true,
            op: MathOp::Add,
            rhs: 1,
        };
        assert!(math.validate(&input).is_err());
        let pass = ProcessorConfig::Passthrough {
            mode: PassthroughMode::All,
            count: 0,
        };
        assert!(pass.validate(&input).is_ok());
    }

    #[test]
    fn test_packer_output_copies() {
        let input = scalar(2, false);
        let out = ProcessorConfig::Packer { length: 2, count: 4 }.output_signal(&input, 1);
        assert_eq!(out.attributes.copies, 4);
        assert_eq!(out.attributes.total_len(), 8);
    }
}
