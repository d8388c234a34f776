//! Backend module for the board link
//!
//! This module owns everything between the byte transport and the graph
//! machinery: the transport boundary, the command correlator and the module
//! registry built at connect time.
//!
//! # Architecture
//!
//! Commands flow through a single FIFO queue so only one command is ever
//! awaiting a response:
//!
//! ```text
//!  Device ──submit──▶ Correlator queue ──▶ worker ──write──▶ Transport
//!                         ▲                                     │
//!                         └──── resolve ◀── InboundSink ◀───────┘
//! ```
//!
//! # Components
//!
//! - [`Transport`] - Byte link trait implemented by real radios and [`MockBoard`]
//! - [`InboundHandle`] - Callback handle the transport uses for inbound bytes
//! - [`Correlator`] - FIFO submit queue, pending table, timeouts and disconnects
//! - [`ModuleRegistry`] - Modules, revisions and capability gates
//! - [`MockBoard`] - In-process simulated board for tests and demos

pub mod correlator;
pub mod mock_board;
pub mod registry;
pub mod transport;

pub use correlator::{Ack, Correlator};
pub use mock_board::{MockBoard, MockBoardConfig};
pub use registry::{ModuleInfo, ModuleRegistry};
pub use transport::{InboundHandle, InboundSink, Transport, TransportStats};
