//! Route/processor graph.
//!
//! Data flows from a root signal through firmware processors to terminals
//! that stream samples to the host, log them on the board, or trigger
//! on-board commands:
//!
//! ```text
//! [accelerometer] ──split──► [average] ──► stream
//!                      ├───► [comparator] ──► log
//!                      └───► react (LED)
//! ```
//!
//! # Lifecycle
//!
//! `Collecting` ([`RouteBuilder`]) → `Committing` ([`RouteCompiler`]) →
//! `Live` → `Removing` → `Removed`. A commit that fails partway tears down
//! every resource it created, newest first, before returning the error.
//!
//! # Design
//!
//! - **Arena by firmware id** - [`Graph`] keys processors by the id the board
//!   allocated; names live in a side table.
//! - **Closed processor set** - configurations are a tagged enum with a fixed
//!   wire layout (see [`crate::protocol::processor`]).
//! - **Tag-keyed dispatch** - [`Dispatcher`] matches inbound notifications by
//!   `(module, register, index)` on the inbound callback.
//! - **Lossless snapshots** - [`GraphDescriptor`] restores ids without
//!   issuing a single command.

pub mod compiler;
pub mod descriptor;
pub mod editor;
pub mod graph;
pub mod id;
pub mod node;
pub mod route;
pub mod subscription;

pub use compiler::{CompiledRoute, PlanStats, RouteCompiler, RoutePlan};
pub use descriptor::{GraphDescriptor, NodeDescriptor, RouteDescriptor};
pub use editor::ProcessorEditor;
pub use graph::{Graph, NodeRecord, Resource, RouteRecord, RouteState, TimerRecord};
pub use id::{NodeId, RouteId, SubscriptionId};
pub use node::{DescNode, NodeInput, NodeParent, ProcessorSpec, Step};
pub use route::{Route, RouteBuilder, RouteDraft};
pub use subscription::{
    channel_handler, Dispatcher, Handler, SubscriptionKind, SubscriptionSpec,
};
