//! Route description nodes.
//!
//! A route is collected as a flat list of [`DescNode`]s. Each node names its
//! input (the route's source or an earlier node, optionally narrowed to one
//! component) and a [`Step`]: a processor to allocate or a terminal consumer.
//!
//! Processor steps are kept in user units ([`ProcessorSpec`]) until commit,
//! when they are resolved against the actual input signal into the fixed
//! firmware layout ([`ProcessorConfig`]).

use crate::error::{Result, SensorError};
use crate::pipeline::id::NodeId;
use crate::protocol::{
    Command, ComparatorOp, DeltaMode, MathOp, PassthroughMode, ProcessorConfig, PulseOutput,
    Signal, TimeMode,
};
use crate::types::EnvSlotKind;

/// A processor request in user units.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorSpec {
    Passthrough { mode: PassthroughMode, count: u16 },
    Accumulate,
    Count,
    Average { size: u8 },
    Comparator { op: ComparatorOp, reference: f32 },
    Math { op: MathOp, rhs: f32, signed: Option<bool> },
    Delta { mode: DeltaMode, magnitude: f32 },
    TimeLimit { mode: TimeMode, period_ms: u32 },
    Pulse { output: PulseOutput, threshold: f32, width: u16 },
    Pack { count: u8 },
}

impl ProcessorSpec {
    /// Resolve against the input signal into a firmware configuration.
    pub fn resolve(&self, input: &Signal) -> Result<ProcessorConfig> {
        let attrs = input.attributes;
        let len = attrs.length;
        let config = match *self {
            ProcessorSpec::Passthrough { mode, count } => {
                ProcessorConfig::Passthrough { mode, count }
            }
            ProcessorSpec::Accumulate => ProcessorConfig::Accumulator {
                output: 4,
                input: len,
            },
            ProcessorSpec::Count => ProcessorConfig::Counter {
                output: 4,
                input: len.clamp(1, 4),
            },
            ProcessorSpec::Average { size } => ProcessorConfig::Average {
                output: len,
                input: len,
                size,
            },
            ProcessorSpec::Comparator { op, reference } => ProcessorConfig::Comparator {
                signed: attrs.signed,
                op,
                reference: input.to_firmware(reference),
            },
            ProcessorSpec::Math { op, rhs, signed } => ProcessorConfig::Math {
                output: 4,
                input: len,
                signed: signed.unwrap_or(attrs.signed),
                op,
                rhs: if op.scales_rhs() {
                    input.to_firmware(rhs)
                } else {
                    rhs.round() as i32
                },
            },
            ProcessorSpec::Delta { mode, magnitude } => ProcessorConfig::Delta {
                length: len,
                signed: attrs.signed,
                mode,
                magnitude: input.to_firmware(magnitude).unsigned_abs(),
            },
            ProcessorSpec::TimeLimit { mode, period_ms } => {
                if len == 0 || len > 8 {
                    return Err(SensorError::InvalidConfig(format!(
                        "time limiter cannot carry {} byte samples of '{}'",
                        len, input.name
                    )));
                }
                ProcessorConfig::TimeLimit {
                    length: len,
                    mode,
                    period: period_ms,
                }
            }
            ProcessorSpec::Pulse {
                output,
                threshold,
                width,
            } => ProcessorConfig::Pulse {
                length: len,
                output,
                threshold: input.to_firmware(threshold),
                width,
            },
            ProcessorSpec::Pack { count } => ProcessorConfig::Packer { length: len, count },
        };
        config.validate(input)?;
        Ok(config)
    }
}

/// Where a node takes its data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeParent {
    Source,
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInput {
    pub parent: NodeParent,
    /// Component of a multi-axis parent, selected by `split`/`index`
    pub component: Option<u8>,
}

impl NodeInput {
    pub fn source() -> Self {
        Self {
            parent: NodeParent::Source,
            component: None,
        }
    }

    pub fn node(id: NodeId) -> Self {
        Self {
            parent: NodeParent::Node(id),
            component: None,
        }
    }

    pub fn with_component(self, component: u8) -> Self {
        Self {
            component: Some(component),
            ..self
        }
    }
}

/// What a node does with its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Processor(ProcessorSpec),
    /// Forward every sample to a handler as it arrives
    Stream { env: Vec<EnvSlotKind> },
    /// Persist every sample to on-board flash for later download
    Log { env: Vec<EnvSlotKind> },
    /// Run recorded commands on the board whenever a sample arrives
    React { commands: Vec<Command> },
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Step::Processor(_))
    }
}

/// One collected route node.
#[derive(Debug, Clone, PartialEq)]
pub struct DescNode {
    pub step: Step,
    pub input: NodeInput,
    pub name: Option<String>,
}
