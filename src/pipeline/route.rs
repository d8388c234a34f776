//! Route builder and handles
//!
//! A [`RouteBuilder`] collects a route description starting from one root
//! signal. Processor calls append a node and move the cursor to its output;
//! terminal calls (`stream`, `log`, `react`) attach a consumer to the cursor
//! without moving it. Forks (`multicast`, `split`) push the cursor on a stack
//! so several branches can start from the same point; they never allocate a
//! firmware processor.
//!
//! Builder errors are deferred: the first one is kept and returned by
//! [`RouteBuilder::commit`], which is the only call that talks to the board.
//!
//! ```ignore
//! let route = device
//!     .route(accelerometer::acceleration(Range::G4))
//!     .split()
//!         .average(8).name("x-smooth").stream(handler_x)
//!     .to()
//!         .comparator(ComparatorOp::Gt, 0.5).log(handler_y)
//!     .end()
//!     .commit()
//!     .await?;
//! ```

use std::collections::HashMap;

use crate::device::Device;
use crate::error::{Result, SensorError};
use crate::pipeline::id::{NodeId, RouteId};
use crate::pipeline::node::{DescNode, NodeInput, NodeParent, ProcessorSpec, Step};
use crate::pipeline::subscription::Handler;
use crate::protocol::{
    ComparatorOp, DeltaMode, MathOp, PassthroughMode, PulseOutput, Signal, TimeMode,
};
use crate::session::{CommandSink, Recorder};
use crate::types::{EnvSlotKind, Environment, Sample};

/// A collected, not yet committed, route
pub struct RouteDraft {
    pub source: Signal,
    pub nodes: Vec<DescNode>,
    /// Handlers of stream and log terminals, keyed by node index
    pub handlers: HashMap<usize, Handler>,
}

impl std::fmt::Debug for RouteDraft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDraft")
            .field("source", &self.source.name)
            .field("nodes", &self.nodes)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct Fork {
    input: NodeInput,
    split: bool,
    next_component: u8,
}

/// Collects one route description.
pub struct RouteBuilder {
    device: Device,
    draft: RouteDraft,
    cursor: NodeInput,
    forks: Vec<Fork>,
    error: Option<SensorError>,
}

impl RouteBuilder {
    pub(crate) fn new(device: Device, source: Signal) -> Self {
        Self {
            device,
            draft: RouteDraft {
                source,
                nodes: Vec::new(),
                handlers: HashMap::new(),
            },
            cursor: NodeInput::source(),
            forks: Vec::new(),
            error: None,
        }
    }

    fn fail(&mut self, err: SensorError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn push(&mut self, step: Step) -> NodeId {
        let id = NodeId(self.draft.nodes.len() as u32);
        self.draft.nodes.push(DescNode {
            step,
            input: self.cursor,
            name: None,
        });
        id
    }

    fn processor(mut self, spec: ProcessorSpec) -> Self {
        let id = self.push(Step::Processor(spec));
        self.cursor = NodeInput::node(id);
        self
    }

    fn terminal(mut self, step: Step, handler: Option<Handler>) -> Self {
        let id = self.push(step);
        if let Some(handler) = handler {
            self.draft.handlers.insert(id.index(), handler);
        }
        self
    }

    // ------------------------------------------------------------------
    // Processors
    // ------------------------------------------------------------------

    /// Running sum of the input
    pub fn accumulate(self) -> Self {
        self.processor(ProcessorSpec::Accumulate)
    }

    /// Number of samples seen
    pub fn count(self) -> Self {
        self.processor(ProcessorSpec::Count)
    }

    /// Moving average over `size` samples
    pub fn average(self, size: u8) -> Self {
        self.processor(ProcessorSpec::Average { size })
    }

    /// Let through samples satisfying `op` against `reference` (in signal units)
    pub fn comparator(self, op: ComparatorOp, reference: f32) -> Self {
        self.processor(ProcessorSpec::Comparator { op, reference })
    }

    pub fn math(self, op: MathOp, rhs: f32) -> Self {
        self.processor(ProcessorSpec::Math {
            op,
            rhs,
            signed: None,
        })
    }

    /// Math with an explicit signedness for the operation
    pub fn math_signed(self, op: MathOp, rhs: f32, signed: bool) -> Self {
        self.processor(ProcessorSpec::Math {
            op,
            rhs,
            signed: Some(signed),
        })
    }

    /// Emit only when the input moves by at least `magnitude`
    pub fn delta(self, mode: DeltaMode, magnitude: f32) -> Self {
        self.processor(ProcessorSpec::Delta { mode, magnitude })
    }

    /// Limit the sample rate to one sample every `period_ms`
    pub fn time_limit(self, mode: TimeMode, period_ms: u32) -> Self {
        self.processor(ProcessorSpec::TimeLimit { mode, period_ms })
    }

    pub fn passthrough(self, mode: PassthroughMode, count: u16) -> Self {
        self.processor(ProcessorSpec::Passthrough { mode, count })
    }

    /// Detect pulses above `threshold` lasting at least `width` samples
    pub fn pulse(self, output: PulseOutput, threshold: f32, width: u16) -> Self {
        self.processor(ProcessorSpec::Pulse {
            output,
            threshold,
            width,
        })
    }

    /// Pack `count` samples into one notification
    pub fn pack(self, count: u8) -> Self {
        self.processor(ProcessorSpec::Pack { count })
    }

    /// Name the processor at the cursor so it can be edited later
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match self.cursor.parent {
            NodeParent::Node(id) => match self.draft.nodes.get_mut(id.index()) {
                Some(node) if node.name.is_none() => node.name = Some(name),
                Some(_) => self.fail(SensorError::InvalidConfig(format!(
                    "processor already named, cannot rename to '{}'",
                    name
                ))),
                None => self.fail(SensorError::InvalidConfig(format!(
                    "no processor to name '{}'",
                    name
                ))),
            },
            NodeParent::Source => self.fail(SensorError::InvalidConfig(format!(
                "'{}' names the route source; only processors can be named",
                name
            ))),
        }
        self
    }

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    /// Deliver every sample to `handler` as notifications arrive
    pub fn stream<F>(self, handler: F) -> Self
    where
        F: FnMut(&Sample, &mut Environment) + Send + 'static,
    {
        self.stream_with_env(Vec::new(), handler)
    }

    /// Stream with per-subscription environment slots
    pub fn stream_with_env<F>(self, env: Vec<EnvSlotKind>, handler: F) -> Self
    where
        F: FnMut(&Sample, &mut Environment) + Send + 'static,
    {
        self.terminal(Step::Stream { env }, Some(Box::new(handler)))
    }

    /// Persist every sample to the board log; `handler` receives downloaded values
    pub fn log<F>(self, handler: F) -> Self
    where
        F: FnMut(&Sample, &mut Environment) + Send + 'static,
    {
        self.log_with_env(Vec::new(), handler)
    }

    pub fn log_with_env<F>(self, env: Vec<EnvSlotKind>, handler: F) -> Self
    where
        F: FnMut(&Sample, &mut Environment) + Send + 'static,
    {
        self.terminal(Step::Log { env }, Some(Box::new(handler)))
    }

    /// Run the commands issued by `body` on the board whenever a sample arrives
    ///
    /// `body` runs immediately against a recorder; nothing is written to the
    /// board until commit.
    pub fn react<F>(self, body: F) -> Self
    where
        F: FnOnce(&dyn CommandSink),
    {
        let recorder = Recorder::new();
        body(&recorder);
        let commands = recorder.into_commands();
        if commands.is_empty() {
            let mut this = self;
            this.fail(SensorError::InvalidConfig(
                "reaction recorded no commands".to_string(),
            ));
            return this;
        }
        self.terminal(Step::React { commands }, None)
    }

    // ------------------------------------------------------------------
    // Forks
    // ------------------------------------------------------------------

    /// Start several branches from the cursor; continue each with [`to`](Self::to)
    pub fn multicast(mut self) -> Self {
        self.forks.push(Fork {
            input: self.cursor,
            split: false,
            next_component: 0,
        });
        self
    }

    /// Fan a vector signal into its components; the first branch gets axis 0
    pub fn split(mut self) -> Self {
        let input = self.cursor;
        self.forks.push(Fork {
            input,
            split: true,
            next_component: 1,
        });
        self.cursor = input.with_component(0);
        self
    }

    /// Start the next branch of the innermost fork
    pub fn to(mut self) -> Self {
        match self.forks.last_mut() {
            Some(fork) if fork.split => {
                self.cursor = fork.input.with_component(fork.next_component);
                fork.next_component = fork.next_component.saturating_add(1);
            }
            Some(fork) => self.cursor = fork.input,
            None => self.fail(SensorError::InvalidConfig(
                "to() called outside multicast or split".to_string(),
            )),
        }
        self
    }

    /// Select component `axis`, either as a split branch or on the cursor directly
    pub fn index(mut self, axis: u8) -> Self {
        match self.forks.last_mut() {
            Some(fork) if fork.split => {
                self.cursor = fork.input.with_component(axis);
                fork.next_component = axis.saturating_add(1);
            }
            _ => self.cursor = self.cursor.with_component(axis),
        }
        self
    }

    /// Close the innermost fork; the cursor returns to the fork's input
    pub fn end(mut self) -> Self {
        match self.forks.pop() {
            Some(fork) => self.cursor = fork.input,
            None => self.fail(SensorError::InvalidConfig(
                "end() without an open fork".to_string(),
            )),
        }
        self
    }

    /// The collected description, for inspection
    pub fn nodes(&self) -> &[DescNode] {
        &self.draft.nodes
    }

    /// Compile and create the route on the board
    pub async fn commit(self) -> Result<Route> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.forks.is_empty() {
            return Err(SensorError::InvalidConfig(format!(
                "{} fork(s) left open",
                self.forks.len()
            )));
        }
        if !self.draft.nodes.iter().any(|n| n.step.is_terminal()) {
            return Err(SensorError::InvalidConfig(format!(
                "route from '{}' has no stream, log or react terminal",
                self.draft.source.name
            )));
        }
        self.device.commit_route(self.draft).await
    }
}

/// Handle to a live route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub(crate) id: RouteId,
    pub(crate) processor_ids: Vec<u8>,
    pub(crate) subscriptions: usize,
}

impl Route {
    pub fn id(&self) -> RouteId {
        self.id
    }

    /// Firmware processor ids in creation order
    pub fn processor_ids(&self) -> &[u8] {
        &self.processor_ids
    }

    /// Number of stream, log and react terminals
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
    }
}
