use std::collections::{HashSet, VecDeque};

use super::graph::{Graph, NodeRecord, Resource, RouteRecord};
use super::id::RouteId;
use super::node::{DescNode, NodeInput, NodeParent, Step};
use super::route::RouteDraft;
use super::subscription::{SubscriptionKind, SubscriptionSpec};
use crate::backend::registry::{ModuleRegistry, DP_REVISION_PACKER};
use crate::backend::Correlator;
use crate::error::{Result, SensorError};
use crate::protocol::constants::*;
use crate::protocol::{Command, ProcessorConfig, Signal};
use crate::session::event;

/// Statistics about a compiled route
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub total_nodes: usize,
    pub processors: usize,
    pub terminals: usize,
    /// Processors with no terminal downstream
    pub dangling: usize,
    pub compile_time_us: u64,
}

/// A validated route, ready to be committed
#[derive(Debug, Clone)]
pub struct RoutePlan {
    /// Node indices in creation order (parents before children)
    pub order: Vec<usize>,
    /// Resolved firmware configuration per node, `None` for terminals
    pub configs: Vec<Option<ProcessorConfig>>,
    pub stats: PlanStats,
}

/// Result of a successful commit
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub record: RouteRecord,
    /// Node index of each entry in `record.subscriptions`
    pub subscription_nodes: Vec<usize>,
}

/// Compiles route descriptions into firmware commands
pub struct RouteCompiler;

impl RouteCompiler {
    /// Validate a draft against the board and the live graph without sending anything.
    pub fn plan(draft: &RouteDraft, registry: &ModuleRegistry, graph: &Graph) -> Result<RoutePlan> {
        let start_time = std::time::Instant::now();
        let nodes = &draft.nodes;

        let order = Self::topological_order(nodes)?;
        Self::check_names(nodes, graph)?;
        Self::check_capabilities(draft, registry)?;

        // Resolve every processor against the shape of its actual input
        let mut configs: Vec<Option<ProcessorConfig>> = vec![None; nodes.len()];
        let mut outputs: Vec<Option<Signal>> = vec![None; nodes.len()];
        for &idx in &order {
            let node = &nodes[idx];
            let input = input_signal(&draft.source, &outputs, node.input)?;
            match &node.step {
                Step::Processor(spec) => {
                    let config = spec.resolve(&input)?;
                    outputs[idx] = Some(config.output_signal(&input, 0));
                    configs[idx] = Some(config);
                }
                Step::Log { .. } if input.attributes.copies > 1 => {
                    return Err(SensorError::InvalidConfig(format!(
                        "packed signal '{}' cannot be logged",
                        input.name
                    )));
                }
                _ => {}
            }
        }

        let processors = configs.iter().filter(|c| c.is_some()).count();
        let terminals = nodes.len() - processors;
        let dangling = Self::dangling_processors(nodes, &order);
        if dangling > 0 {
            tracing::debug!(
                "Route from '{}' has {} processor(s) with no terminal downstream",
                draft.source.name,
                dangling
            );
        }

        Ok(RoutePlan {
            order,
            configs,
            stats: PlanStats {
                total_nodes: nodes.len(),
                processors,
                terminals,
                dangling,
                compile_time_us: start_time.elapsed().as_micros() as u64,
            },
        })
    }

    /// Topological sort using Kahn's algorithm
    fn topological_order(nodes: &[DescNode]) -> Result<Vec<usize>> {
        let n = nodes.len();
        let mut adj = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];

        for (idx, node) in nodes.iter().enumerate() {
            if let NodeParent::Node(parent) = node.input.parent {
                let parent = parent.index();
                match nodes.get(parent) {
                    Some(p) if !p.step.is_terminal() => {}
                    Some(_) => {
                        return Err(SensorError::InvalidConfig(format!(
                            "node {} takes its input from terminal node {}",
                            idx, parent
                        )))
                    }
                    None => {
                        return Err(SensorError::InvalidConfig(format!(
                            "node {} references missing node {}",
                            idx, parent
                        )))
                    }
                }
                adj[parent].push(idx);
                in_degree[idx] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            result.push(node);
            for &neighbor in &adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if result.len() != n {
            return Err(SensorError::InvalidConfig(
                "cycle detected in route description".to_string(),
            ));
        }
        Ok(result)
    }

    fn check_names(nodes: &[DescNode], graph: &Graph) -> Result<()> {
        let mut seen = HashSet::new();
        for name in nodes.iter().filter_map(|n| n.name.as_deref()) {
            if !seen.insert(name) {
                return Err(SensorError::InvalidConfig(format!(
                    "name '{}' used twice in one route",
                    name
                )));
            }
        }
        graph.check_names(seen)
    }

    /// Fail before any write when the board lacks a needed module or revision
    fn check_capabilities(draft: &RouteDraft, registry: &ModuleRegistry) -> Result<()> {
        registry.require(draft.source.tag.module)?;
        for node in &draft.nodes {
            match &node.step {
                Step::Processor(spec) => {
                    registry.require(MODULE_DATA_PROCESSOR)?;
                    if matches!(spec, super::node::ProcessorSpec::Pack { .. }) {
                        registry.require_revision(
                            MODULE_DATA_PROCESSOR,
                            DP_REVISION_PACKER,
                            "packer",
                        )?;
                    }
                }
                Step::Log { .. } => {
                    registry.require(MODULE_LOGGING)?;
                }
                Step::React { .. } => {
                    registry.require(MODULE_EVENT)?;
                }
                Step::Stream { .. } => {}
            }
        }
        Ok(())
    }

    /// Count processors no terminal is reachable from
    fn dangling_processors(nodes: &[DescNode], order: &[usize]) -> usize {
        let mut feeds_terminal = vec![false; nodes.len()];
        for &idx in order.iter().rev() {
            let reaches = nodes[idx].step.is_terminal() || feeds_terminal[idx];
            if let (true, NodeParent::Node(parent)) = (reaches, nodes[idx].input.parent) {
                if let Some(slot) = feeds_terminal.get_mut(parent.index()) {
                    *slot = true;
                }
            }
        }
        nodes
            .iter()
            .zip(&feeds_terminal)
            .filter(|(n, reaches)| !n.step.is_terminal() && !**reaches)
            .count()
    }

    /// Issue the creation commands one at a time.
    ///
    /// Each command waits for the previous one to resolve. If any step fails,
    /// everything already created is torn down in reverse before the error is
    /// returned.
    pub async fn commit(
        correlator: &Correlator,
        graph: &mut Graph,
        id: RouteId,
        draft: &RouteDraft,
        plan: &RoutePlan,
    ) -> Result<CompiledRoute> {
        let mut state = CommitState::new(draft.nodes.len());

        for &idx in &plan.order {
            if let Err(e) = state.create(correlator, graph, draft, plan, idx).await {
                tracing::warn!(
                    "Route {} failed at node {}, unwinding {} resource(s): {}",
                    id,
                    idx,
                    state.resources.len(),
                    e
                );
                if let Err(undo) = Self::teardown(correlator, graph, &state.resources).await {
                    tracing::warn!("Unwinding route {} was incomplete: {}", id, undo);
                }
                return Err(e.with_context(format!("building route {}", id)));
            }
        }

        tracing::info!(
            "Route {} live: {} processor(s), {} terminal(s), {} command(s)",
            id,
            state.nodes.len(),
            state.subscriptions.len(),
            state.resources.len()
        );

        // subscriptions are indexed in the order the terminals were declared
        let mut terminals: Vec<(usize, SubscriptionSpec)> = state
            .subscription_nodes
            .into_iter()
            .zip(state.subscriptions)
            .collect();
        terminals.sort_by_key(|(node, _)| *node);
        let (subscription_nodes, subscriptions) = terminals.into_iter().unzip();

        Ok(CompiledRoute {
            record: RouteRecord {
                id,
                state: super::graph::RouteState::Live,
                source: draft.source.clone(),
                nodes: state.nodes,
                resources: state.resources,
                subscriptions,
            },
            subscription_nodes,
        })
    }

    /// Undo `resources` newest first. Every removal is attempted; the first error is returned.
    pub async fn teardown(
        correlator: &Correlator,
        graph: &mut Graph,
        resources: &[Resource],
    ) -> Result<()> {
        let mut first_error = None;
        for resource in resources.iter().rev() {
            if let Resource::RootStream { module, register } = *resource {
                if !graph.release_root_stream(module, register) {
                    continue;
                }
            }
            let command = resource.teardown();
            if let Err(e) = correlator.send(command.clone()).wait().await {
                tracing::warn!("Teardown {} failed: {}", command, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Input signal of a node given the outputs created so far
fn input_signal(source: &Signal, outputs: &[Option<Signal>], input: NodeInput) -> Result<Signal> {
    let base = match input.parent {
        NodeParent::Source => source.clone(),
        NodeParent::Node(id) => outputs
            .get(id.index())
            .and_then(|o| o.clone())
            .ok_or_else(|| {
                SensorError::InvalidConfig(format!("node {} has no output signal", id.index()))
            })?,
    };
    match input.component {
        Some(axis) => base.component(axis),
        None => Ok(base),
    }
}

/// Progress of one commit
struct CommitState {
    outputs: Vec<Option<Signal>>,
    /// Draft node index to position in `nodes`
    record_index: Vec<Option<usize>>,
    nodes: Vec<NodeRecord>,
    resources: Vec<Resource>,
    subscriptions: Vec<SubscriptionSpec>,
    subscription_nodes: Vec<usize>,
    notifying: HashSet<u8>,
}

impl CommitState {
    fn new(len: usize) -> Self {
        Self {
            outputs: vec![None; len],
            record_index: vec![None; len],
            nodes: Vec::new(),
            resources: Vec::new(),
            subscriptions: Vec::new(),
            subscription_nodes: Vec::new(),
            notifying: HashSet::new(),
        }
    }

    async fn create(
        &mut self,
        correlator: &Correlator,
        graph: &mut Graph,
        draft: &RouteDraft,
        plan: &RoutePlan,
        idx: usize,
    ) -> Result<()> {
        let node = &draft.nodes[idx];
        let input = input_signal(&draft.source, &self.outputs, node.input)?;

        match &node.step {
            Step::Processor(_) => {
                let config = plan.configs[idx].clone().ok_or_else(|| {
                    SensorError::InvalidState(format!("node {} was not planned", idx))
                })?;
                let mut payload = vec![
                    input.tag.module,
                    input.tag.register,
                    input.tag.index_byte(),
                    input.attributes.source_byte(),
                ];
                payload.extend(config.encode());
                let command = Command::new(MODULE_DATA_PROCESSOR, DP_ADD, payload);
                let processor_id = correlator.allocate(command, "data processor").await?;
                self.resources.push(Resource::Processor(processor_id));

                let parent = match node.input.parent {
                    NodeParent::Source => None,
                    NodeParent::Node(p) => self.record_index[p.index()],
                };
                self.outputs[idx] = Some(config.output_signal(&input, processor_id));
                self.record_index[idx] = Some(self.nodes.len());
                self.nodes.push(NodeRecord {
                    processor_id,
                    config,
                    input,
                    parent,
                    component: node.input.component,
                    name: node.name.clone(),
                });
            }
            Step::Stream { env } => {
                self.enable_notifications(correlator, graph, &input).await?;
                self.push_subscription(idx, input, SubscriptionKind::Stream, env.clone());
            }
            Step::Log { env } => {
                let log_ids = self.create_loggers(correlator, &input).await?;
                let mut signal = input;
                signal.attributes.offset = 0;
                self.push_subscription(idx, signal, SubscriptionKind::Log { log_ids }, env.clone());
            }
            Step::React { commands } => {
                let event_ids = event::program(correlator, input.tag, commands).await?;
                self.resources
                    .extend(event_ids.iter().map(|id| Resource::Event(*id)));
                self.push_subscription(idx, input, SubscriptionKind::React { event_ids }, Vec::new());
            }
        }
        Ok(())
    }

    fn push_subscription(
        &mut self,
        idx: usize,
        signal: Signal,
        kind: SubscriptionKind,
        env: Vec<crate::types::EnvSlotKind>,
    ) {
        self.subscriptions.push(SubscriptionSpec { signal, kind, env });
        self.subscription_nodes.push(idx);
    }

    async fn enable_notifications(
        &mut self,
        correlator: &Correlator,
        graph: &mut Graph,
        input: &Signal,
    ) -> Result<()> {
        let tag = input.tag;
        if tag.is_processor() {
            let id = tag.index_byte();
            if self.notifying.insert(id) {
                self.resources.push(Resource::ProcessorNotify(id));
                correlator
                    .send(Command::new(MODULE_DATA_PROCESSOR, DP_NOTIFY_ENABLE, vec![id, 1]))
                    .wait()
                    .await?;
            }
        } else if tag.register & READ_BIT == 0 {
            let first = graph.acquire_root_stream(tag.module, tag.register);
            self.resources.push(Resource::RootStream {
                module: tag.module,
                register: tag.register,
            });
            if first {
                correlator
                    .send(Command::new(tag.module, tag.register, vec![1]))
                    .wait()
                    .await?;
            }
        }
        Ok(())
    }

    /// One logger per 4-byte slice of the sample
    async fn create_loggers(&mut self, correlator: &Correlator, input: &Signal) -> Result<Vec<u8>> {
        let attrs = input.attributes;
        let total = attrs.length as usize;
        let mut ids = Vec::with_capacity(input.log_slots());
        for slot in 0..input.log_slots() {
            let start = slot * LOG_RECORD_PAYLOAD;
            let len = (total - start).min(LOG_RECORD_PAYLOAD) as u8;
            let offset = attrs.offset + start as u8;
            let command = Command::new(
                MODULE_LOGGING,
                LOG_TRIGGER,
                vec![
                    input.tag.module,
                    input.tag.register,
                    input.tag.index_byte(),
                    ((len - 1) << 5) | (offset & 0x1F),
                ],
            );
            let id = correlator.allocate(command, "logger").await?;
            self.resources.push(Resource::Logger(id));
            ids.push(id);
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::NodeId;
    use crate::pipeline::node::ProcessorSpec;
    use crate::protocol::sensors::{accelerometer, barometer};
    use std::collections::HashMap;

    fn draft(source: Signal, nodes: Vec<DescNode>) -> RouteDraft {
        RouteDraft {
            source,
            nodes,
            handlers: HashMap::new(),
        }
    }

    fn node(step: Step, input: NodeInput) -> DescNode {
        DescNode {
            step,
            input,
            name: None,
        }
    }

    fn stream() -> Step {
        Step::Stream { env: Vec::new() }
    }

    #[test]
    fn test_plan_orders_parents_first() {
        // Terminal listed before the processor feeding it
        let d = draft(
            barometer::pressure(),
            vec![
                node(stream(), NodeInput::node(NodeId(1))),
                node(
                    Step::Processor(ProcessorSpec::Average { size: 4 }),
                    NodeInput::source(),
                ),
            ],
        );
        let plan = RouteCompiler::plan(&d, &ModuleRegistry::all_present(), &Graph::new()).unwrap();
        assert_eq!(plan.order, vec![1, 0]);
        assert_eq!(plan.stats.processors, 1);
        assert_eq!(plan.stats.terminals, 1);
        assert_eq!(plan.stats.dangling, 0);
    }

    #[test]
    fn test_plan_rejects_cycle() {
        let d = draft(
            barometer::pressure(),
            vec![
                node(Step::Processor(ProcessorSpec::Accumulate), NodeInput::node(NodeId(1))),
                node(Step::Processor(ProcessorSpec::Accumulate), NodeInput::node(NodeId(0))),
                node(stream(), NodeInput::node(NodeId(1))),
            ],
        );
        let err = RouteCompiler::plan(&d, &ModuleRegistry::all_present(), &Graph::new()).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_plan_rejects_terminal_parent() {
        let d = draft(
            barometer::pressure(),
            vec![
                node(stream(), NodeInput::source()),
                node(stream(), NodeInput::node(NodeId(0))),
            ],
        );
        assert!(RouteCompiler::plan(&d, &ModuleRegistry::all_present(), &Graph::new()).is_err());
    }

    #[test]
    fn test_packer_needs_revision() {
        let mut registry = ModuleRegistry::all_present();
        registry.insert(crate::backend::ModuleInfo::present(MODULE_DATA_PROCESSOR, 0, 1));
        let d = draft(
            barometer::pressure(),
            vec![
                node(Step::Processor(ProcessorSpec::Pack { count: 2 }), NodeInput::source()),
                node(stream(), NodeInput::node(NodeId(0))),
            ],
        );
        let err = RouteCompiler::plan(&d, &registry, &Graph::new()).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_missing_logging_module_is_unsupported() {
        let mut registry = ModuleRegistry::all_present();
        registry.insert(crate::backend::ModuleInfo::absent(MODULE_LOGGING));
        let d = draft(
            barometer::pressure(),
            vec![node(Step::Log { env: Vec::new() }, NodeInput::source())],
        );
        assert!(RouteCompiler::plan(&d, &registry, &Graph::new())
            .unwrap_err()
            .is_unsupported());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut a = node(Step::Processor(ProcessorSpec::Accumulate), NodeInput::source());
        a.name = Some("sum".into());
        let mut b = node(Step::Processor(ProcessorSpec::Count), NodeInput::source());
        b.name = Some("sum".into());
        let d = draft(
            accelerometer::step_detected(),
            vec![a, b, node(stream(), NodeInput::node(NodeId(0)))],
        );
        assert!(RouteCompiler::plan(&d, &ModuleRegistry::all_present(), &Graph::new()).is_err());
    }

    #[test]
    fn test_dangling_processor_counted() {
        let d = draft(
            barometer::pressure(),
            vec![
                node(Step::Processor(ProcessorSpec::Accumulate), NodeInput::source()),
                node(stream(), NodeInput::source()),
            ],
        );
        let plan = RouteCompiler::plan(&d, &ModuleRegistry::all_present(), &Graph::new()).unwrap();
        assert_eq!(plan.stats.dangling, 1);
    }
}
