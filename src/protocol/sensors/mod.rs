//! Per-sensor command builders and signal descriptors
//!
//! Each builder produces the exact bytes of one command, and each signal
//! function describes one data source. Capability
//! checks against the [`ModuleRegistry`](crate::backend::registry::ModuleRegistry)
//! happen in [`Device`](crate::device::Device) before anything is sent.

pub mod accelerometer;
pub mod barometer;
pub mod led;
pub mod sensor_fusion;
pub mod switch;
pub mod temperature;
