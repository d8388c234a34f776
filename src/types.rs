//! Core data types for sensorgraph-rs
//!
//! This module contains the values handed to user handlers and the
//! per-subscription state they may carry between invocations.
//!
//! # Main Types
//!
//! - [`DataValue`] - A decoded sample (integer, float, vector, quaternion, raw bytes)
//! - [`Sample`] - A decoded value plus where it came from (live or logged)
//! - [`Environment`] - Mutable per-subscription slots (counters, capture buffers)

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{TICK_ORIGIN, TICK_SECONDS};

/// Three-axis value in physical units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Orientation quaternion
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// A decoded sample value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    UInt(u32),
    Int(i32),
    Float(f32),
    Vector(Vector3),
    Quaternion(Quaternion),
    Bytes(Vec<u8>),
}

impl DataValue {
    /// Numeric view of scalar values
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::UInt(v) => Some(*v as f64),
            DataValue::Int(v) => Some(*v as f64),
            DataValue::Float(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vector3> {
        match self {
            DataValue::Vector(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_quaternion(&self) -> Option<Quaternion> {
        match self {
            DataValue::Quaternion(q) => Some(*q),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataValue::UInt(v) => write!(f, "{}", v),
            DataValue::Int(v) => write!(f, "{}", v),
            DataValue::Float(v) => write!(f, "{:.4}", v),
            DataValue::Vector(v) => write!(f, "({:.4}, {:.4}, {:.4})", v.x, v.y, v.z),
            DataValue::Quaternion(q) => {
                write!(f, "({:.4}, {:.4}, {:.4}, {:.4})", q.w, q.x, q.y, q.z)
            }
            DataValue::Bytes(b) => write!(f, "{:02X?}", b),
        }
    }
}

/// A value delivered to a subscription handler
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Decoded value
    pub value: DataValue,
    /// Extended (rollover-corrected) log tick, `None` for live notifications
    pub tick: Option<u64>,
}

impl Sample {
    pub fn live(value: DataValue) -> Self {
        Self { value, tick: None }
    }

    pub fn logged(value: DataValue, tick: u64) -> Self {
        Self {
            value,
            tick: Some(tick),
        }
    }

    /// Time since tick 0 of the readout's first epoch, for logged samples.
    /// Records from before that epoch report zero.
    pub fn elapsed(&self) -> Option<Duration> {
        self.tick.map(|t| {
            Duration::from_secs_f64(t.saturating_sub(TICK_ORIGIN) as f64 * TICK_SECONDS)
        })
    }
}

/// Declared type of an environment slot (persisted with the graph)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvSlotKind {
    Counter,
    Number,
    Capture,
}

/// A mutable environment slot owned by one subscription
#[derive(Debug, Clone, PartialEq)]
pub enum EnvSlot {
    Counter(u64),
    Number(f64),
    Capture(Vec<DataValue>),
}

impl EnvSlot {
    pub fn kind(&self) -> EnvSlotKind {
        match self {
            EnvSlot::Counter(_) => EnvSlotKind::Counter,
            EnvSlot::Number(_) => EnvSlotKind::Number,
            EnvSlot::Capture(_) => EnvSlotKind::Capture,
        }
    }

    /// Fresh slot of the given kind
    pub fn empty(kind: EnvSlotKind) -> Self {
        match kind {
            EnvSlotKind::Counter => EnvSlot::Counter(0),
            EnvSlotKind::Number => EnvSlot::Number(0.0),
            EnvSlotKind::Capture => EnvSlot::Capture(Vec::new()),
        }
    }
}

/// Per-subscription state handed to the handler on every invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    slots: Vec<EnvSlot>,
}

impl Environment {
    pub fn new(kinds: &[EnvSlotKind]) -> Self {
        Self {
            slots: kinds.iter().map(|k| EnvSlot::empty(*k)).collect(),
        }
    }

    pub fn kinds(&self) -> Vec<EnvSlotKind> {
        self.slots.iter().map(EnvSlot::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&EnvSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut EnvSlot> {
        self.slots.get_mut(index)
    }

    /// Increment a counter slot, returning the new count
    pub fn bump(&mut self, index: usize) -> Option<u64> {
        match self.slots.get_mut(index) {
            Some(EnvSlot::Counter(n)) => {
                *n += 1;
                Some(*n)
            }
            _ => None,
        }
    }

    /// Append to a capture slot
    pub fn capture(&mut self, index: usize, value: DataValue) -> bool {
        match self.slots.get_mut(index) {
            Some(EnvSlot::Capture(buf)) => {
                buf.push(value);
                true
            }
            _ => false,
        }
    }

    pub fn captured(&self, index: usize) -> &[DataValue] {
        match self.slots.get(index) {
            Some(EnvSlot::Capture(buf)) => buf,
            _ => &[],
        }
    }
}
