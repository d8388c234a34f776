//! Live graph accounting.
//!
//! The [`Graph`] is the host-side record of every firmware resource this
//! session allocated: processors (an arena keyed by the board's processor id,
//! with a name side table), the per-route creation lists used for teardown,
//! root stream reference counts, and scheduled timers.
//!
//! The graph sits behind an async mutex in the device so a route commit,
//! removal, edit or timer schedule runs to completion before the next starts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SensorError};
use crate::pipeline::id::RouteId;
use crate::pipeline::subscription::SubscriptionSpec;
use crate::protocol::constants::*;
use crate::protocol::{Command, ProcessorConfig, Signal};

/// Lifecycle of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteState {
    Collecting,
    Committing,
    Live,
    Removing,
    Removed,
}

/// One firmware-side effect of a route commit, undone in reverse on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resource {
    /// Data processor allocated with `[0x09, 0x02, ...]`
    Processor(u8),
    /// Processor output notifications enabled with `[0x09, 0x07, id, 1]`
    ProcessorNotify(u8),
    /// Root signal notifications enabled with `[module, register, 1]`
    RootStream { module: u8, register: u8 },
    /// Logger allocated with `[0x0B, 0x02, ...]`
    Logger(u8),
    /// Event entry allocated with `[0x0A, 0x02, ...]`
    Event(u8),
}

impl Resource {
    /// Command undoing this resource
    pub fn teardown(&self) -> Command {
        match *self {
            Resource::Processor(id) => Command::new(MODULE_DATA_PROCESSOR, DP_REMOVE, vec![id]),
            Resource::ProcessorNotify(id) => {
                Command::new(MODULE_DATA_PROCESSOR, DP_NOTIFY_ENABLE, vec![id, 0])
            }
            Resource::RootStream { module, register } => Command::new(module, register, vec![0]),
            Resource::Logger(id) => Command::new(MODULE_LOGGING, LOG_REMOVE, vec![id]),
            Resource::Event(id) => Command::new(MODULE_EVENT, EVENT_REMOVE, vec![id]),
        }
    }
}

/// A committed processor node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Board-allocated processor id
    pub processor_id: u8,
    pub config: ProcessorConfig,
    /// Signal the processor consumes (used to scale edits)
    pub input: Signal,
    /// Index of the parent node within the route, `None` for the route source
    pub parent: Option<usize>,
    pub component: Option<u8>,
    pub name: Option<String>,
}

/// A committed route.
#[derive(Debug, Clone)]
pub struct RouteRecord {
    pub id: RouteId,
    pub state: RouteState,
    pub source: Signal,
    pub nodes: Vec<NodeRecord>,
    /// Creation order; teardown walks it backwards
    pub resources: Vec<Resource>,
    /// Terminals in creation order
    pub subscriptions: Vec<SubscriptionSpec>,
}

impl RouteRecord {
    /// Placeholder for a route whose commands are being issued
    pub fn committing(id: RouteId, source: Signal) -> Self {
        Self {
            id,
            state: RouteState::Committing,
            source,
            nodes: Vec::new(),
            resources: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    pub fn processor_ids(&self) -> Vec<u8> {
        self.nodes.iter().map(|n| n.processor_id).collect()
    }
}

/// A scheduled firmware timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub id: u8,
    pub period_ms: u32,
    pub repeat: u16,
    pub event_ids: Vec<u8>,
}

/// Host-side accounting of firmware resources.
#[derive(Debug, Default)]
pub struct Graph {
    routes: BTreeMap<RouteId, RouteRecord>,
    /// Processor arena: board id to (route, node index)
    processors: BTreeMap<u8, (RouteId, usize)>,
    /// Name side table: name to board processor id
    names: HashMap<String, u8>,
    root_streams: HashMap<(u8, u8), usize>,
    timers: BTreeMap<u8, TimerRecord>,
    next_route: RouteId,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// No route or timer holds firmware resources
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.routes.is_empty()
    }

    /// Forget every resource (used on reconnect, when ids are no longer valid)
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn allocate_route_id(&mut self) -> RouteId {
        let id = self.next_route;
        self.next_route = id.next();
        id
    }

    /// Fail if any of `names` is already held by a live node
    pub fn check_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for name in names {
            if self.names.contains_key(name) {
                return Err(SensorError::InvalidConfig(format!(
                    "a live processor is already named '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Count one more user of a root stream; returns true for the first user
    pub fn acquire_root_stream(&mut self, module: u8, register: u8) -> bool {
        let count = self.root_streams.entry((module, register)).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop one user of a root stream; returns true when the last user leaves
    pub fn release_root_stream(&mut self, module: u8, register: u8) -> bool {
        match self.root_streams.get_mut(&(module, register)) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.root_streams.remove(&(module, register));
                true
            }
            None => true,
        }
    }

    /// Reserve `id` while its commands are in flight
    pub fn begin_route(&mut self, id: RouteId, source: Signal) {
        self.routes.insert(id, RouteRecord::committing(id, source));
    }

    /// Store a committed route as live
    pub fn insert_route(&mut self, mut record: RouteRecord) {
        record.state = RouteState::Live;
        for (index, node) in record.nodes.iter().enumerate() {
            self.processors.insert(node.processor_id, (record.id, index));
            if let Some(name) = &node.name {
                self.names.insert(name.clone(), node.processor_id);
            }
        }
        if record.id.0 >= self.next_route.0 {
            self.next_route = record.id.next();
        }
        self.routes.insert(record.id, record);
    }

    /// Re-register root stream users for a restored route
    pub fn restore_root_streams(&mut self, resources: &[Resource]) {
        for resource in resources {
            if let Resource::RootStream { module, register } = resource {
                self.acquire_root_stream(*module, *register);
            }
        }
    }

    pub fn route(&self, id: RouteId) -> Option<&RouteRecord> {
        self.routes.get(&id)
    }

    /// Live routes in creation order
    pub fn routes(&self) -> impl Iterator<Item = &RouteRecord> {
        self.routes
            .values()
            .filter(|r| r.state == RouteState::Live)
    }

    /// State of a route; ids handed out earlier but no longer held report `Removed`
    pub fn route_state(&self, id: RouteId) -> Option<RouteState> {
        match self.routes.get(&id) {
            Some(route) => Some(route.state),
            None if id < self.next_route => Some(RouteState::Removed),
            None => None,
        }
    }

    /// Live route by id, or `NotFound`
    pub fn live_route(&self, id: RouteId) -> Result<&RouteRecord> {
        match self.routes.get(&id) {
            Some(route) if route.state == RouteState::Live => Ok(route),
            _ => Err(SensorError::NotFound(format!("route {}", id))),
        }
    }

    /// Mark a live route as removing and unregister its names, returning it for teardown
    pub fn take_route(&mut self, id: RouteId) -> Result<RouteRecord> {
        let record = match self.routes.get_mut(&id) {
            Some(route) if route.state == RouteState::Live => {
                route.state = RouteState::Removing;
                route.clone()
            }
            _ => return Err(SensorError::NotFound(format!("route {}", id))),
        };
        for node in &record.nodes {
            self.processors.remove(&node.processor_id);
            if let Some(name) = &node.name {
                self.names.remove(name);
            }
        }
        Ok(record)
    }

    /// Drop a route whose resources are gone
    pub fn finish_removal(&mut self, id: RouteId) {
        self.routes.remove(&id);
    }

    /// Resolve a node name to its live record
    pub fn named(&self, name: &str) -> Result<&NodeRecord> {
        let id = self
            .names
            .get(name)
            .ok_or_else(|| SensorError::NotFound(format!("processor '{}'", name)))?;
        self.processor(*id)
            .ok_or_else(|| SensorError::NotFound(format!("processor '{}'", name)))
    }

    pub fn processor(&self, id: u8) -> Option<&NodeRecord> {
        let (route, index) = self.processors.get(&id)?;
        self.routes.get(route)?.nodes.get(*index)
    }

    /// Store an edited configuration for a live processor
    pub fn update_config(&mut self, id: u8, config: ProcessorConfig) -> Result<()> {
        let (route, index) = *self
            .processors
            .get(&id)
            .ok_or_else(|| SensorError::NotFound(format!("processor {}", id)))?;
        let node = self
            .routes
            .get_mut(&route)
            .and_then(|r| r.nodes.get_mut(index))
            .ok_or_else(|| SensorError::NotFound(format!("processor {}", id)))?;
        node.config = config;
        Ok(())
    }

    /// Every live processor id in ascending order
    pub fn processor_ids(&self) -> Vec<u8> {
        self.processors.keys().copied().collect()
    }

    pub fn insert_timer(&mut self, timer: TimerRecord) {
        self.timers.insert(timer.id, timer);
    }

    pub fn take_timer(&mut self, id: u8) -> Result<TimerRecord> {
        self.timers
            .remove(&id)
            .ok_or_else(|| SensorError::NotFound(format!("timer {}", id)))
    }

    pub fn has_timer(&self, id: u8) -> bool {
        self.timers.contains_key(&id)
    }

    pub fn timers(&self) -> impl Iterator<Item = &TimerRecord> {
        self.timers.values()
    }
}
