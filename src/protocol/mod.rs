//! Binary codec for the board's register protocol
//!
//! # Submodules
//!
//! - [`constants`] - Module ids and register numbers
//! - [`command`] - Outbound [`Command`] framing and inbound [`Packet`] parsing
//! - [`signal`] - Typed data sources and their decoders
//! - [`processor`] - Data processor configurations
//! - [`sensors`] - Per-sensor command builders

pub mod command;
pub mod constants;
pub mod processor;
pub mod sensors;
pub mod signal;

pub use command::{Command, Packet, ResponseKey};
pub use processor::{
    ComparatorOp, DeltaMode, MathOp, PassthroughMode, ProcessorConfig, ProcessorKind,
    PulseOutput, TimeMode,
};
pub use signal::{DataAttributes, Signal, SignalTag, ValueKind};
