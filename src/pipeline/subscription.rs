//! Subscription dispatcher
//!
//! Routes inbound notification bytes to the handler registered for their wire
//! tag. Dispatch is synchronous and happens on the transport's inbound
//! callback, so handlers run while the dispatcher lock is held: a handler must
//! not call back into the device to remove routes or resubscribe.
//!
//! Every subscription owns its [`Environment`]; the slots are handed to the
//! handler by `&mut` on each sample and never shared with another route.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, SensorError};
use crate::pipeline::id::{RouteId, SubscriptionId};
use crate::protocol::{Packet, Signal, SignalTag};
use crate::types::{EnvSlotKind, Environment, Sample};

/// User callback invoked with each decoded sample
pub type Handler = Box<dyn FnMut(&Sample, &mut Environment) + Send>;

/// Handler forwarding every sample into a crossbeam channel
pub fn channel_handler() -> (Handler, crossbeam_channel::Receiver<Sample>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let handler: Handler = Box::new(move |sample, _env| {
        let _ = tx.send(sample.clone());
    });
    (handler, rx)
}

/// How a route terminus receives its data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Live notifications
    Stream,
    /// Downloaded log records, one log id per 4-byte slice
    Log { log_ids: Vec<u8> },
    /// On-board event entries; nothing is delivered to the host
    React { event_ids: Vec<u8> },
}

/// Persisted shape of a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub signal: Signal,
    pub kind: SubscriptionKind,
    pub env: Vec<EnvSlotKind>,
}

impl SubscriptionSpec {
    /// Whether this subscription delivers samples to a host handler
    pub fn delivers(&self) -> bool {
        !matches!(self.kind, SubscriptionKind::React { .. })
    }
}

struct Entry {
    route: RouteId,
    index: usize,
    spec: SubscriptionSpec,
    handler: Option<Handler>,
    env: Environment,
}

impl Entry {
    fn deliver(&mut self, values: Vec<crate::types::DataValue>, tick: Option<u64>) -> bool {
        let Some(handler) = self.handler.as_mut() else {
            tracing::debug!(
                "Subscription {} of {} has no handler, dropping sample",
                self.index,
                self.route
            );
            return false;
        };
        for value in values {
            let sample = match tick {
                Some(t) => Sample::logged(value, t),
                None => Sample::live(value),
            };
            handler(&sample, &mut self.env);
        }
        true
    }
}

/// Tag-keyed registry of live subscriptions
#[derive(Default)]
pub struct Dispatcher {
    entries: BTreeMap<SubscriptionId, Entry>,
    by_tag: HashMap<SignalTag, Vec<SubscriptionId>>,
    by_log: HashMap<u8, SubscriptionId>,
    next_id: u32,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a delivering subscription. Reactions are not registered.
    pub fn register(
        &mut self,
        route: RouteId,
        index: usize,
        spec: SubscriptionSpec,
        handler: Option<Handler>,
    ) -> Option<SubscriptionId> {
        let id = SubscriptionId(self.next_id);
        match &spec.kind {
            SubscriptionKind::Stream => {
                self.by_tag.entry(spec.signal.tag).or_default().push(id);
            }
            SubscriptionKind::Log { log_ids } => {
                let first = *log_ids.first()?;
                self.by_log.insert(first, id);
            }
            SubscriptionKind::React { .. } => return None,
        }
        self.next_id = self.next_id.wrapping_add(1);
        let env = Environment::new(&spec.env);
        self.entries.insert(
            id,
            Entry {
                route,
                index,
                spec,
                handler,
                env,
            },
        );
        Some(id)
    }

    /// Attach a new handler to subscription `index` of `route`, resetting its environment
    pub fn replace_handler(&mut self, route: RouteId, index: usize, handler: Handler) -> Result<()> {
        let entry = self
            .entries
            .values_mut()
            .find(|e| e.route == route && e.index == index)
            .ok_or_else(|| {
                SensorError::NotFound(format!("subscription {} of {}", index, route))
            })?;
        entry.handler = Some(handler);
        entry.env = Environment::new(&entry.spec.env);
        Ok(())
    }

    /// Drop every subscription belonging to `route`
    pub fn remove_route(&mut self, route: RouteId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.route == route)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.entries.remove(id);
        }
        for list in self.by_tag.values_mut() {
            list.retain(|id| !ids.contains(id));
        }
        self.by_tag.retain(|_, list| !list.is_empty());
        self.by_log.retain(|_, id| !ids.contains(id));
        ids.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Log id sets of every log subscription, first id first
    pub fn log_sets(&self) -> Vec<Vec<u8>> {
        self.by_log
            .values()
            .filter_map(|id| match &self.entries.get(id)?.spec.kind {
                SubscriptionKind::Log { log_ids } => Some(log_ids.clone()),
                _ => None,
            })
            .collect()
    }

    /// Deliver a live notification. Returns `true` when a handler consumed it.
    pub fn dispatch(&mut self, packet: &Packet<'_>) -> bool {
        let plain = SignalTag::new(packet.module, packet.register);
        let indexed = packet
            .index()
            .map(|idx| SignalTag::indexed(packet.module, packet.register, idx));

        let mut targets: Vec<(SubscriptionId, usize)> = Vec::new();
        if let Some(ids) = self.by_tag.get(&plain) {
            targets.extend(ids.iter().map(|id| (*id, 0)));
        }
        if let Some(tag) = indexed {
            if let Some(ids) = self.by_tag.get(&tag) {
                targets.extend(ids.iter().map(|id| (*id, 1)));
            }
        }

        let mut consumed = false;
        for (id, skip) in targets {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            let attrs = entry.spec.signal.attributes;
            let data = packet
                .payload
                .get(skip + attrs.offset as usize..)
                .unwrap_or(&[]);
            match entry.spec.signal.decode_all(data) {
                Ok(values) => consumed |= entry.deliver(values, None),
                Err(e) => {
                    tracing::debug!("Dropping notification for {}: {}", plain, e);
                }
            }
        }
        consumed
    }

    /// Deliver one reassembled log value keyed by its first log id
    pub fn deliver_logged(&mut self, first_log_id: u8, bytes: &[u8], tick: u64) -> bool {
        let Some(entry) = self
            .by_log
            .get(&first_log_id)
            .and_then(|id| self.entries.get_mut(id))
        else {
            tracing::debug!("No subscription for log id {}", first_log_id);
            return false;
        };
        match entry.spec.signal.decode(bytes) {
            Ok(value) => entry.deliver(vec![value], Some(tick)),
            Err(e) => {
                tracing::warn!("Dropping logged value for log id {}: {}", first_log_id, e);
                false
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscriptions", &self.entries.len())
            .field("tags", &self.by_tag.len())
            .field("logs", &self.by_log.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sensors::{accelerometer, barometer};
    use crate::protocol::{DataAttributes, ValueKind};
    use crate::types::DataValue;
    use std::sync::{Arc, Mutex};

    fn collecting() -> (Handler, Arc<Mutex<Vec<Sample>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Handler = Box::new(move |sample, env| {
            env.bump(0);
            sink.lock().unwrap().push(sample.clone());
        });
        (handler, seen)
    }

    fn stream(signal: Signal) -> SubscriptionSpec {
        SubscriptionSpec {
            signal,
            kind: SubscriptionKind::Stream,
            env: vec![EnvSlotKind::Counter],
        }
    }

    #[test]
    fn test_processor_notification_matches_index() {
        let mut dispatcher = Dispatcher::new();
        let signal = Signal::new(
            "count",
            SignalTag::processor(3),
            DataAttributes::new(4, false),
            ValueKind::Unsigned,
            1.0,
        );
        let (handler, seen) = collecting();
        dispatcher.register(RouteId(0), 0, stream(signal), Some(handler));

        let other = [0x09, 0x03, 0x04, 1, 0, 0, 0];
        assert!(!dispatcher.dispatch(&Packet::parse(&other).unwrap()));

        let bytes = [0x09, 0x03, 0x03, 7, 0, 0, 0];
        assert!(dispatcher.dispatch(&Packet::parse(&bytes).unwrap()));
        assert_eq!(seen.lock().unwrap()[0].value, DataValue::UInt(7));
    }

    #[test]
    fn test_component_offset_applied() {
        let mut dispatcher = Dispatcher::new();
        let y = accelerometer::acceleration(accelerometer::Range::G2)
            .component(1)
            .unwrap();
        let (handler, seen) = collecting();
        dispatcher.register(RouteId(0), 0, stream(y), Some(handler));

        // x = 0, y = 0x4000 (1.0 g at +-2g), z = 0
        let bytes = [0x03, 0x04, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00];
        assert!(dispatcher.dispatch(&Packet::parse(&bytes).unwrap()));
        assert_eq!(seen.lock().unwrap()[0].value, DataValue::Float(1.0));
    }

    #[test]
    fn test_unknown_tag_is_not_consumed() {
        let mut dispatcher = Dispatcher::new();
        assert!(!dispatcher.dispatch(&Packet::parse(&[0x7E, 0x01, 0x00]).unwrap()));
    }

    #[test]
    fn test_remove_route_unregisters() {
        let mut dispatcher = Dispatcher::new();
        let (handler, seen) = collecting();
        dispatcher.register(RouteId(4), 0, stream(barometer::pressure()), Some(handler));
        assert_eq!(dispatcher.remove_route(RouteId(4)), 1);

        let bytes = [0x12, 0x01, 0x00, 0x01, 0x00, 0x00];
        assert!(!dispatcher.dispatch(&Packet::parse(&bytes).unwrap()));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_restored_subscription_waits_for_handler() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(RouteId(1), 0, stream(barometer::pressure()), None);
        let bytes = [0x12, 0x01, 0x00, 0x01, 0x00, 0x00];
        assert!(!dispatcher.dispatch(&Packet::parse(&bytes).unwrap()));

        let (handler, seen) = channel_handler();
        dispatcher.replace_handler(RouteId(1), 0, handler).unwrap();
        assert!(dispatcher.dispatch(&Packet::parse(&bytes).unwrap()));
        assert_eq!(seen.try_recv().unwrap().value, DataValue::Float(1.0));

        assert!(dispatcher
            .replace_handler(RouteId(1), 5, Box::new(|_, _| {}))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_logged_value_carries_tick() {
        let mut dispatcher = Dispatcher::new();
        let (handler, seen) = collecting();
        let spec = SubscriptionSpec {
            signal: barometer::pressure(),
            kind: SubscriptionKind::Log { log_ids: vec![2] },
            env: vec![],
        };
        dispatcher.register(RouteId(0), 0, spec, Some(handler));
        assert_eq!(dispatcher.log_sets(), vec![vec![2]]);
        assert!(dispatcher.deliver_logged(2, &[0x00, 0x02, 0x00, 0x00], 70_000));
        let sample = seen.lock().unwrap()[0].clone();
        assert_eq!(sample.tick, Some(70_000));
        assert_eq!(sample.value, DataValue::Float(2.0));
    }
}
