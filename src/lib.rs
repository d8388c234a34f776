//! # sensorgraph-rs: host-side engine for register-based sensor boards
//!
//! Boards expose sensors, data processors, loggers, timers, events and
//! macros as registers addressed by `(module, register)` pairs. This crate
//! turns route descriptions written on the host into the command sequences
//! that build them on the board, pairs responses with the commands that
//! caused them, and decodes what the board sends back.
//!
//! ## Architecture
//!
//! - **Protocol**: Byte-exact command framing, signals and processor configurations
//! - **Backend**: Transport boundary, FIFO command correlator and module registry
//! - **Pipeline**: Route builder, compiler, graph accounting and subscription dispatch
//! - **Session**: Command recording for timers, events and macros
//! - **Logging**: On-board log readout and sample reassembly
//!
//! ## Configuration
//!
//! Session tunables (response deadlines, download idle timeout, log
//! reassembly windows) live in [`DeviceConfig`], which can be stored as TOML
//! or JSON in the platform config directory under `dev.hxyulin.sensorgraph-rs`.
//!
//! ## Example
//!
//! ```ignore
//! use sensorgraph_rs::{
//!     backend::MockBoard,
//!     config::DeviceConfig,
//!     protocol::sensors::{accelerometer, led},
//!     Device,
//! };
//!
//! #[tokio::main]
//! async fn main() -> sensorgraph_rs::Result<()> {
//!     let board = Arc::new(MockBoard::new());
//!     let device = Device::connect(board, DeviceConfig::default()).await?;
//!
//!     // Blink the LED on every step, without involving the host
//!     device
//!         .route(accelerometer::step_detected())
//!         .react(|sink| {
//!             sink.submit(led::play());
//!         })
//!         .commit()
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use backend::{MockBoard, Transport};
pub use config::DeviceConfig;
pub use device::Device;
pub use error::{Result, SensorError};
pub use pipeline::{channel_handler, Route, RouteBuilder};
pub use protocol::{Command, Signal};
pub use session::{CommandSink, ScheduledTask, TimerSpec};
pub use types::{DataValue, Sample};
