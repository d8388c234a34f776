//! On-board log download
//!
//! Logged samples are stored on the board as 4-byte records tagged with a log
//! id and a 16-bit tick. Downloading reads them back, restores the full tick,
//! joins the records of wide values and hands typed samples to the log
//! subscriptions registered by the route compiler.
//!
//! - [`reassembly`] - tick extension and sibling pairing
//! - [`download`] - readout commands and the in-flight [`LogDownload`]

pub mod download;
pub mod reassembly;

pub use download::{DownloadReport, LogDownload, ProgressFn, ReadoutState};
pub use reassembly::{Assembled, GroupAssembler, LogReassembler, ReassemblyStats, TickClass, TickExtender};
