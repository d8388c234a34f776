//! Persisted graph snapshots
//!
//! A [`GraphDescriptor`] records every live route in creation order: each
//! processor as its kind tag, encoded configuration bytes, parent link and
//! name, followed by the route's subscriptions. Restoring a descriptor
//! rebuilds the host-side accounting with the same processor ids and sends
//! nothing to the board.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::{NodeRecord, Resource, RouteRecord, RouteState, TimerRecord};
use super::id::RouteId;
use super::subscription::SubscriptionSpec;
use crate::backend::ModuleRegistry;
use crate::error::{Result, SensorError};
use crate::protocol::{ProcessorConfig, Signal};

/// Format version written into every descriptor
pub const DESCRIPTOR_VERSION: u32 = 1;

/// One processor node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub processor_id: u8,
    /// Kind tag (first configuration byte)
    pub kind: u8,
    pub config: Vec<u8>,
    pub input: Signal,
    /// Index of the parent node in this route, `None` for the route source
    pub parent: Option<usize>,
    pub component: Option<u8>,
    pub name: Option<String>,
}

impl NodeDescriptor {
    fn from_record(node: &NodeRecord) -> Self {
        Self {
            processor_id: node.processor_id,
            kind: node.config.tag(),
            config: node.config.encode(),
            input: node.input.clone(),
            parent: node.parent,
            component: node.component,
            name: node.name.clone(),
        }
    }

    fn into_record(self) -> Result<NodeRecord> {
        let config = ProcessorConfig::decode(&self.config)?;
        if config.tag() != self.kind {
            return Err(SensorError::Serialization(format!(
                "processor {} tagged {:#04x} but configured as {}",
                self.processor_id,
                self.kind,
                config.kind()
            )));
        }
        Ok(NodeRecord {
            processor_id: self.processor_id,
            config,
            input: self.input,
            parent: self.parent,
            component: self.component,
            name: self.name,
        })
    }
}

/// One live route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub id: RouteId,
    pub source: Signal,
    pub nodes: Vec<NodeDescriptor>,
    /// Creation order of firmware resources, replayed in reverse on removal
    pub resources: Vec<Resource>,
    pub subscriptions: Vec<SubscriptionSpec>,
}

/// Snapshot of all firmware resources owned by a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    /// Board the ids belong to
    pub registry: ModuleRegistry,
    pub routes: Vec<RouteDescriptor>,
    pub timers: Vec<TimerRecord>,
}

impl GraphDescriptor {
    pub fn capture<'a>(
        registry: &ModuleRegistry,
        routes: impl IntoIterator<Item = &'a RouteRecord>,
        timers: impl IntoIterator<Item = &'a TimerRecord>,
    ) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            saved_at: Utc::now(),
            registry: registry.clone(),
            routes: routes
                .into_iter()
                .map(|route| RouteDescriptor {
                    id: route.id,
                    source: route.source.clone(),
                    nodes: route.nodes.iter().map(NodeDescriptor::from_record).collect(),
                    resources: route.resources.clone(),
                    subscriptions: route.subscriptions.clone(),
                })
                .collect(),
            timers: timers.into_iter().cloned().collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let descriptor: GraphDescriptor = serde_json::from_slice(bytes)?;
        if descriptor.version != DESCRIPTOR_VERSION {
            return Err(SensorError::Serialization(format!(
                "unsupported descriptor version {} (expected {})",
                descriptor.version, DESCRIPTOR_VERSION
            )));
        }
        Ok(descriptor)
    }

    /// Rebuild the route records in creation order
    pub fn route_records(&self) -> Result<Vec<RouteRecord>> {
        self.routes
            .iter()
            .cloned()
            .map(|route| {
                let nodes = route
                    .nodes
                    .into_iter()
                    .map(NodeDescriptor::into_record)
                    .collect::<Result<Vec<_>>>()?;
                for (index, node) in nodes.iter().enumerate() {
                    if node.parent.is_some_and(|p| p >= index) {
                        return Err(SensorError::Serialization(format!(
                            "node {} of {} references a later parent",
                            index, route.id
                        )));
                    }
                }
                Ok(RouteRecord {
                    id: route.id,
                    state: RouteState::Live,
                    source: route.source,
                    nodes,
                    resources: route.resources,
                    subscriptions: route.subscriptions,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::subscription::SubscriptionKind;
    use crate::protocol::sensors::barometer;
    use crate::protocol::ComparatorOp;
    use crate::types::EnvSlotKind;

    fn sample_route() -> RouteRecord {
        let pressure = barometer::pressure();
        let average = ProcessorConfig::Average {
            output: 4,
            input: 4,
            size: 8,
        };
        let averaged = average.output_signal(&pressure, 0);
        let comparator = ProcessorConfig::Comparator {
            signed: false,
            op: ComparatorOp::Gt,
            reference: 101_325 * 256,
        };
        let compared = comparator.output_signal(&averaged, 1);
        RouteRecord {
            id: RouteId(2),
            state: RouteState::Live,
            source: pressure.clone(),
            nodes: vec![
                NodeRecord {
                    processor_id: 0,
                    config: average,
                    input: pressure,
                    parent: None,
                    component: None,
                    name: Some("smooth".into()),
                },
                NodeRecord {
                    processor_id: 1,
                    config: comparator,
                    input: averaged,
                    parent: Some(0),
                    component: None,
                    name: None,
                },
            ],
            resources: vec![
                Resource::Processor(0),
                Resource::Processor(1),
                Resource::ProcessorNotify(1),
            ],
            subscriptions: vec![SubscriptionSpec {
                signal: compared,
                kind: SubscriptionKind::Stream,
                env: vec![EnvSlotKind::Counter, EnvSlotKind::Capture],
            }],
        }
    }

    #[test]
    fn test_bytes_restore_same_records() {
        let route = sample_route();
        let descriptor = GraphDescriptor::capture(&ModuleRegistry::all_present(), [&route], []);
        let bytes = descriptor.to_bytes().unwrap();
        let restored = GraphDescriptor::from_bytes(&bytes).unwrap();
        assert_eq!(restored, descriptor);

        let records = restored.route_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].nodes, route.nodes);
        assert_eq!(records[0].resources, route.resources);
        assert_eq!(records[0].subscriptions, route.subscriptions);
    }

    #[test]
    fn test_mismatched_kind_tag_rejected() {
        let route = sample_route();
        let mut descriptor = GraphDescriptor::capture(&ModuleRegistry::all_present(), [&route], []);
        descriptor.routes[0].nodes[0].kind = 0x06;
        assert!(descriptor.route_records().is_err());
    }

    #[test]
    fn test_version_checked() {
        let mut descriptor = GraphDescriptor::capture(&ModuleRegistry::all_present(), [], []);
        descriptor.version = 99;
        let bytes = serde_json::to_vec(&descriptor).unwrap();
        assert!(GraphDescriptor::from_bytes(&bytes).is_err());
    }
}
