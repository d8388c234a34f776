//! On-board automation
//!
//! This module captures command sequences the board stores and runs on its
//! own, instead of sending them immediately:
//!
//! - [`Recorder`] buffers commands and acknowledges them at once
//! - [`macros`] writes a recording as a firmware macro
//! - [`timer`] schedules a recording on a firmware timer
//! - [`event`] binds recorded commands to a signal (timers and route reactions)

pub mod event;
pub mod macros;
pub mod recorder;
pub mod timer;

pub use macros::MacroRecording;
pub use recorder::{record, CommandSink, Recorder};
pub use timer::{ScheduledTask, TimerSpec};
