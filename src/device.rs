//! Device session
//!
//! [`Device`] is the entry point of the crate. It owns one link to a board
//! (transport, correlator and module registry), the route graph, the
//! subscription dispatcher and any in-flight log download.
//!
//! # Concurrency
//!
//! - Multi-step operations (route commit and removal, timers, macros,
//!   restore) serialize on the graph's async mutex, so their command
//!   sequences never interleave on the wire.
//! - Inbound bytes arrive on the transport's callback thread. They are
//!   matched against pending operations first, then routed to log readout
//!   or to the dispatcher.
//! - Subscription handlers run while the dispatcher lock is held. They must
//!   not call back into the device.
//!
//! # Example
//!
//! ```ignore
//! let board = Arc::new(MockBoard::new());
//! let device = Device::connect(board, DeviceConfig::default()).await?;
//!
//! let (handler, samples) = channel_handler();
//! let route = device
//!     .route(barometer::pressure())
//!     .average(8)
//!     .name("smooth")
//!     .stream(handler)
//!     .commit()
//!     .await?;
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use crate::backend::{
    Ack, Correlator, InboundHandle, InboundSink, ModuleInfo, ModuleRegistry, Transport,
    TransportStats,
};
use crate::config::DeviceConfig;
use crate::error::{Result, SensorError};
use crate::logging::download::{self, DownloadReport, LogDownload, ProgressFn, ReadoutState};
use crate::logging::Assembled;
use crate::pipeline::compiler::{CompiledRoute, RouteCompiler};
use crate::pipeline::descriptor::GraphDescriptor;
use crate::pipeline::editor::ProcessorEditor;
use crate::pipeline::graph::{Graph, RouteState};
use crate::pipeline::route::{Route, RouteBuilder, RouteDraft};
use crate::pipeline::subscription::{Dispatcher, Handler};
use crate::protocol::constants::*;
use crate::protocol::sensors::{accelerometer, temperature};
use crate::protocol::{Command, Packet, ProcessorConfig, ProcessorKind, ResponseKey, Signal};
use crate::session::timer::{self, ScheduledTask, TimerSpec};
use crate::session::{macros, record, CommandSink, MacroRecording};
use crate::types::{Environment, Sample};

/// Everything tied to one connection
struct Link {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    registry: Arc<ModuleRegistry>,
    /// Keeps the inbound handle given to the transport alive
    _sink: Arc<LinkSink>,
}

struct DeviceCore {
    config: DeviceConfig,
    link: RwLock<Option<Link>>,
    graph: tokio::sync::Mutex<Graph>,
    dispatcher: Mutex<Dispatcher>,
    download: Mutex<Option<LogDownload>>,
}

impl DeviceCore {
    fn dispatcher(&self) -> Result<MutexGuard<'_, Dispatcher>> {
        self.dispatcher
            .lock()
            .map_err(|_| SensorError::InvalidState("dispatcher lock poisoned".to_string()))
    }

    fn download(&self) -> Result<MutexGuard<'_, Option<LogDownload>>> {
        self.download
            .lock()
            .map_err(|_| SensorError::InvalidState("download lock poisoned".to_string()))
    }

    fn link_parts(&self) -> Result<(Arc<Correlator>, Arc<ModuleRegistry>)> {
        let link = self
            .link
            .read()
            .map_err(|_| SensorError::InvalidState("link lock poisoned".to_string()))?;
        match link.as_ref() {
            Some(link) => Ok((link.correlator.clone(), link.registry.clone())),
            None => Err(SensorError::TransportDisconnected),
        }
    }

    /// Route a packet no pending operation claimed. Returns `false` when nothing wanted it.
    fn route_inbound(&self, packet: &Packet<'_>) -> bool {
        if packet.module == MODULE_LOGGING
            && (packet.register == LOG_READOUT_NOTIFY || packet.register == LOG_READOUT_PROGRESS)
        {
            return self.on_readout(packet);
        }
        match self.dispatcher.lock() {
            Ok(mut dispatcher) => dispatcher.dispatch(packet),
            Err(_) => false,
        }
    }

    fn on_readout(&self, packet: &Packet<'_>) -> bool {
        let released = {
            let Ok(mut slot) = self.download.lock() else {
                return false;
            };
            let Some(download) = slot.as_mut() else {
                tracing::debug!("Readout packet outside of a download");
                return false;
            };
            if packet.register == LOG_READOUT_NOTIFY {
                download.on_records(packet.payload)
            } else {
                download.on_progress(packet.payload);
                Vec::new()
            }
        };
        self.deliver_logged(released);
        true
    }

    fn deliver_logged(&self, values: Vec<Assembled>) {
        if values.is_empty() {
            return;
        }
        let Ok(mut dispatcher) = self.dispatcher.lock() else {
            return;
        };
        for value in values {
            dispatcher.deliver_logged(value.first_log_id, &value.bytes, value.tick);
        }
    }

    fn fail_download(&self) {
        if let Ok(mut slot) = self.download.lock() {
            if let Some(download) = slot.as_mut() {
                download.on_disconnected();
            }
        }
    }
}

/// Inbound side of one link
///
/// Each connection gets its own sink; once a link is replaced the transport's
/// handle points at a dropped sink and late bytes are ignored.
struct LinkSink {
    core: Weak<DeviceCore>,
    correlator: Arc<Correlator>,
}

impl LinkSink {
    fn inbound(&self, bytes: &[u8]) {
        let packet = match Packet::parse(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("Dropping inbound bytes {:02X?}: {}", bytes, e);
                self.correlator.record_dropped();
                return;
            }
        };
        if self.correlator.resolve(&packet) {
            return;
        }
        let claimed = match self.core.upgrade() {
            Some(core) => core.route_inbound(&packet),
            None => false,
        };
        if !claimed {
            tracing::debug!(
                "No receiver for [{:#04x}, {:#04x}] ({} byte payload)",
                packet.module,
                packet.register,
                packet.payload.len()
            );
            self.correlator.record_dropped();
        }
    }
}

impl InboundSink for LinkSink {
    fn on_notification(&self, bytes: &[u8]) {
        self.inbound(bytes);
    }

    fn on_read_response(&self, bytes: &[u8]) {
        self.inbound(bytes);
    }

    fn on_disconnected(&self) {
        self.correlator.disconnect();
        if let Some(core) = self.core.upgrade() {
            core.fail_download();
        }
    }
}

/// Handle to a connected board. Cloning is cheap and shares the session.
#[derive(Clone)]
pub struct Device {
    core: Arc<DeviceCore>,
}

impl Device {
    /// Connect over `transport` and build the module registry.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(transport: Arc<dyn Transport>, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let device = Self {
            core: Arc::new(DeviceCore {
                config,
                link: RwLock::new(None),
                graph: tokio::sync::Mutex::new(Graph::new()),
                dispatcher: Mutex::new(Dispatcher::new()),
                download: Mutex::new(None),
            }),
        };
        device.attach(transport).await?;
        Ok(device)
    }

    /// Replace the link with a fresh transport.
    ///
    /// Processor ids from the previous connection are forgotten; restore a
    /// descriptor captured on the same board to get them back.
    pub async fn reconnect(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let mut graph = self.core.graph.lock().await;
        self.drop_link();
        graph.clear();
        self.core.dispatcher()?.clear();
        self.attach(transport).await
    }

    /// Drop the link. Pending and queued operations fail with `TransportDisconnected`.
    pub fn disconnect(&self) {
        self.drop_link();
    }

    fn drop_link(&self) {
        let old = match self.core.link.write() {
            Ok(mut link) => link.take(),
            Err(_) => None,
        };
        if let Some(old) = old {
            tracing::info!("Closing link over {}", old.transport.name());
            old.correlator.disconnect();
        }
        self.core.fail_download();
    }

    async fn attach(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let correlator = Arc::new(Correlator::spawn(
            transport.clone(),
            self.core.config.response_timeout(),
        ));
        let sink = Arc::new(LinkSink {
            core: Arc::downgrade(&self.core),
            correlator: correlator.clone(),
        });
        let weak_sink = Arc::downgrade(&sink);
        let weak: Weak<dyn InboundSink> = weak_sink;
        transport.attach(InboundHandle::new(weak));

        let registry = if self.core.config.discover_modules {
            discover(&correlator).await?
        } else {
            ModuleRegistry::all_present()
        };
        tracing::info!(
            "Connected over {}: {} of {} module(s) present",
            transport.name(),
            registry.modules().filter(|m| m.is_present()).count(),
            registry.len()
        );

        let mut link = self
            .core
            .link
            .write()
            .map_err(|_| SensorError::InvalidState("link lock poisoned".to_string()))?;
        *link = Some(Link {
            transport,
            correlator,
            registry: Arc::new(registry),
            _sink: sink,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Link state
    // ------------------------------------------------------------------

    pub fn config(&self) -> &DeviceConfig {
        &self.core.config
    }

    /// Modules discovered at connect time
    pub fn registry(&self) -> Result<Arc<ModuleRegistry>> {
        self.core.link_parts().map(|(_, registry)| registry)
    }

    pub fn stats(&self) -> TransportStats {
        match self.core.link_parts() {
            Ok((correlator, _)) => correlator.stats(),
            Err(_) => TransportStats::default(),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        match self.core.link_parts() {
            Ok((correlator, _)) => correlator.is_disconnected(),
            Err(_) => true,
        }
    }

    /// Queue a raw command without waiting for a response
    pub fn submit(&self, command: Command) -> Ack {
        match self.core.link_parts() {
            Ok((correlator, _)) => correlator.send(command),
            Err(e) => Ack::ready(Err(e)),
        }
    }

    /// Send a command and return the payload of the response echoing its header
    pub async fn request(&self, command: Command) -> Result<Vec<u8>> {
        let (correlator, _) = self.core.link_parts()?;
        correlator.request(command).wait().await
    }

    // ------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------

    /// Start describing a route rooted at `source`
    pub fn route(&self, source: Signal) -> RouteBuilder {
        RouteBuilder::new(self.clone(), source)
    }

    pub(crate) async fn commit_route(&self, draft: RouteDraft) -> Result<Route> {
        let mut graph = self.core.graph.lock().await;
        let (correlator, registry) = self.core.link_parts()?;
        let plan = RouteCompiler::plan(&draft, &registry, &graph)?;
        tracing::debug!(
            "Planned {} node(s) in {}us, {} dangling processor(s)",
            plan.stats.total_nodes,
            plan.stats.compile_time_us,
            plan.stats.dangling
        );

        let id = graph.allocate_route_id();
        graph.begin_route(id, draft.source.clone());
        let compiled = match RouteCompiler::commit(&correlator, &mut graph, id, &draft, &plan).await {
            Ok(compiled) => compiled,
            Err(e) => {
                graph.finish_removal(id);
                return Err(e);
            }
        };

        let CompiledRoute {
            record,
            subscription_nodes,
        } = compiled;
        let RouteDraft { mut handlers, .. } = draft;
        {
            let mut dispatcher = self.core.dispatcher()?;
            for (index, (spec, node)) in record
                .subscriptions
                .iter()
                .zip(&subscription_nodes)
                .enumerate()
            {
                dispatcher.register(id, index, spec.clone(), handlers.remove(node));
            }
        }

        let route = Route {
            id,
            processor_ids: record.processor_ids(),
            subscriptions: record.subscriptions.len(),
        };
        graph.insert_route(record);
        Ok(route)
    }

    /// Tear down every firmware resource of `route`, newest first.
    ///
    /// Removing a route that is already gone fails with `NotFound`.
    pub async fn remove_route(&self, route: &Route) -> Result<()> {
        let mut graph = self.core.graph.lock().await;
        let record = graph.take_route(route.id)?;
        let dropped = match self.core.dispatcher() {
            Ok(mut dispatcher) => dispatcher.remove_route(route.id),
            Err(_) => 0,
        };
        let result = match self.core.link_parts() {
            Ok((correlator, _)) => {
                RouteCompiler::teardown(&correlator, &mut graph, &record.resources).await
            }
            Err(e) => Err(e),
        };
        graph.finish_removal(route.id);
        tracing::info!(
            "Removed {} ({} resource(s), {} subscription(s))",
            route.id,
            record.resources.len(),
            dropped
        );
        result
    }

    pub async fn route_state(&self, route: &Route) -> Option<RouteState> {
        self.core.graph.lock().await.route_state(route.id)
    }

    /// Attach a handler to subscription `index` of `route`.
    ///
    /// Restored routes start without handlers; this is how they get one.
    pub async fn resubscribe<F>(&self, route: &Route, index: usize, handler: F) -> Result<()>
    where
        F: FnMut(&Sample, &mut Environment) + Send + 'static,
    {
        let graph = self.core.graph.lock().await;
        graph.live_route(route.id)?;
        let handler: Handler = Box::new(handler);
        self.core.dispatcher()?.replace_handler(route.id, index, handler)
    }

    /// Look up a named processor for editing
    pub async fn edit(&self, name: &str, kind: ProcessorKind) -> Result<ProcessorEditor> {
        let graph = self.core.graph.lock().await;
        let node = graph.named(name)?;
        if node.config.kind() != kind {
            return Err(SensorError::InvalidConfig(format!(
                "processor '{}' is {}, not {}",
                name,
                node.config.kind(),
                kind
            )));
        }
        Ok(ProcessorEditor::new(
            self.clone(),
            name.to_string(),
            node.processor_id,
            node.input.clone(),
            node.config.clone(),
        ))
    }

    /// Name must still resolve to the processor the editor was created for
    fn check_named(graph: &Graph, name: &str, processor_id: u8) -> Result<()> {
        if graph.named(name)?.processor_id != processor_id {
            return Err(SensorError::NotFound(format!(
                "processor '{}' (id {}) was removed",
                name, processor_id
            )));
        }
        Ok(())
    }

    pub(crate) async fn write_processor_config(
        &self,
        name: &str,
        processor_id: u8,
        command: Command,
        config: ProcessorConfig,
    ) -> Result<()> {
        let mut graph = self.core.graph.lock().await;
        Self::check_named(&graph, name, processor_id)?;
        let (correlator, _) = self.core.link_parts()?;
        correlator.send(command).wait().await?;
        tracing::debug!("Reconfigured processor '{}' ({})", name, processor_id);
        graph.update_config(processor_id, config)
    }

    pub(crate) async fn write_processor_state(
        &self,
        name: &str,
        processor_id: u8,
        command: Command,
    ) -> Result<()> {
        let graph = self.core.graph.lock().await;
        Self::check_named(&graph, name, processor_id)?;
        let (correlator, _) = self.core.link_parts()?;
        correlator.send(command).wait().await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Capture every live route and timer
    pub async fn serialize(&self) -> Result<Vec<u8>> {
        let graph = self.core.graph.lock().await;
        let (_, registry) = self.core.link_parts()?;
        GraphDescriptor::capture(&registry, graph.routes(), graph.timers()).to_bytes()
    }

    /// Rebuild the graph from a snapshot without sending anything to the board.
    ///
    /// The snapshot must come from a board with the same modules, and the
    /// session must not own any resources yet. Restored subscriptions have
    /// no handler until [`Device::resubscribe`] is called.
    pub async fn restore(&self, bytes: &[u8]) -> Result<Vec<Route>> {
        let mut graph = self.core.graph.lock().await;
        let (_, registry) = self.core.link_parts()?;
        let descriptor = GraphDescriptor::from_bytes(bytes)?;
        if descriptor.registry != *registry {
            return Err(SensorError::InvalidState(
                "snapshot was captured on a board with different modules".to_string(),
            ));
        }
        if !graph.is_empty() {
            return Err(SensorError::InvalidState(
                "restore requires a session without live routes or timers".to_string(),
            ));
        }

        let records = descriptor.route_records()?;
        let mut names = HashSet::new();
        for node in records.iter().flat_map(|r| &r.nodes) {
            if let Some(name) = &node.name {
                if !names.insert(name.as_str()) {
                    return Err(SensorError::Serialization(format!(
                        "processor name '{}' appears twice",
                        name
                    )));
                }
            }
        }

        let mut dispatcher = self.core.dispatcher()?;
        let mut routes = Vec::with_capacity(records.len());
        for record in records {
            graph.restore_root_streams(&record.resources);
            for (index, spec) in record.subscriptions.iter().enumerate() {
                dispatcher.register(record.id, index, spec.clone(), None);
            }
            routes.push(Route {
                id: record.id,
                processor_ids: record.processor_ids(),
                subscriptions: record.subscriptions.len(),
            });
            graph.insert_route(record);
        }
        let timers = descriptor.timers.len();
        for timer in descriptor.timers {
            graph.insert_timer(timer);
        }
        tracing::info!(
            "Restored {} route(s) and {} timer(s) from snapshot taken {}",
            routes.len(),
            timers,
            descriptor.saved_at
        );
        Ok(routes)
    }

    // ------------------------------------------------------------------
    // Logging
    // ------------------------------------------------------------------

    pub async fn start_logging(&self, overwrite: bool) -> Result<()> {
        let correlator = self.require(MODULE_LOGGING)?;
        correlator.send(download::circular_buffer(overwrite)).wait().await?;
        correlator.send(download::enable(true)).wait().await.map(|_| ())
    }

    pub async fn stop_logging(&self) -> Result<()> {
        let correlator = self.require(MODULE_LOGGING)?;
        correlator.send(download::enable(false)).wait().await.map(|_| ())
    }

    pub async fn clear_log(&self) -> Result<()> {
        let correlator = self.require(MODULE_LOGGING)?;
        correlator.send(download::clear()).wait().await.map(|_| ())
    }

    /// Number of entries stored on the board
    pub async fn log_length(&self) -> Result<u32> {
        let correlator = self.require(MODULE_LOGGING)?;
        let payload = correlator.request(download::length_read()).wait().await?;
        download::parse_length(&payload).ok_or_else(|| {
            SensorError::ProtocolMismatch(format!("log length reply {:02X?}", payload))
        })
    }

    /// Read back every stored entry and deliver it to the log subscriptions.
    ///
    /// Fails with `Timeout` when the board goes quiet for longer than the
    /// configured idle timeout, and with `TransportDisconnected` if the link
    /// drops. Values assembled before the failure are still delivered.
    pub async fn download_logs(&self, on_progress: Option<ProgressFn>) -> Result<DownloadReport> {
        let expected = self.log_length().await?;
        let (correlator, _) = self.core.link_parts()?;
        let log_sets = self.core.dispatcher()?.log_sets();
        let (download, mut state) =
            LogDownload::new(self.core.config.log.clone(), log_sets, expected, on_progress);
        {
            let mut slot = self.core.download()?;
            if slot.is_some() {
                return Err(SensorError::InvalidState(
                    "a log download is already running".to_string(),
                ));
            }
            *slot = Some(download);
        }

        let outcome = self.await_readout(&correlator, expected, &mut state).await;

        let finished = self.core.download()?.take();
        let Some(mut download) = finished else {
            return Err(SensorError::InvalidState(
                "log download vanished".to_string(),
            ));
        };
        let (rest, report) = download.finish();
        self.core.deliver_logged(rest);
        outcome?;

        tracing::info!(
            "Downloaded {} log entries: {} value(s), {} late, {} dropped",
            expected,
            report.values(),
            report.stats.late,
            report.dropped()
        );
        Ok(report)
    }

    async fn await_readout(
        &self,
        correlator: &Correlator,
        expected: u32,
        state: &mut tokio::sync::watch::Receiver<ReadoutState>,
    ) -> Result<()> {
        if expected == 0 {
            return Ok(());
        }
        correlator
            .send(download::readout(expected, self.core.config.log.progress_updates))
            .wait()
            .await?;
        let idle = self.core.config.download_idle_timeout();
        loop {
            let current = *state.borrow_and_update();
            match current {
                ReadoutState::Done => return Ok(()),
                ReadoutState::Disconnected => return Err(SensorError::TransportDisconnected),
                ReadoutState::Running { .. } => {}
            }
            match tokio::time::timeout(idle, state.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(SensorError::TransportDisconnected),
                Err(_) => return Err(SensorError::timeout("log readout progress")),
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers and macros
    // ------------------------------------------------------------------

    /// Create a timer whose body runs on the board each time it fires.
    ///
    /// Commands submitted inside `body` are recorded, not sent. The timer
    /// is created stopped unless `TimerSpec::immediate` is set.
    pub async fn schedule<F>(&self, spec: TimerSpec, body: F) -> Result<ScheduledTask>
    where
        F: FnOnce(&dyn CommandSink),
    {
        let commands = record(body);
        let mut graph = self.core.graph.lock().await;
        let correlator = self.require(MODULE_TIMER)?;
        if !commands.is_empty() {
            self.require(MODULE_EVENT)?;
        }
        let created = timer::create(&correlator, &spec, &commands).await?;
        let task = ScheduledTask::new(created.id);
        graph.insert_timer(created);
        Ok(task)
    }

    pub async fn start_timer(&self, task: &ScheduledTask) -> Result<()> {
        self.timer_command(task, task.start_command()).await
    }

    pub async fn stop_timer(&self, task: &ScheduledTask) -> Result<()> {
        self.timer_command(task, task.stop_command()).await
    }

    async fn timer_command(&self, task: &ScheduledTask, command: Command) -> Result<()> {
        let graph = self.core.graph.lock().await;
        if !graph.has_timer(task.id()) {
            return Err(SensorError::NotFound(format!("timer {}", task.id())));
        }
        let (correlator, _) = self.core.link_parts()?;
        correlator.send(command).wait().await.map(|_| ())
    }

    /// Remove a timer and the events it drives
    pub async fn remove_timer(&self, task: &ScheduledTask) -> Result<()> {
        let mut graph = self.core.graph.lock().await;
        let record = graph.take_timer(task.id())?;
        let (correlator, _) = self.core.link_parts()?;
        timer::destroy(&correlator, &record).await
    }

    /// Store `body` as a macro and return its id.
    ///
    /// Nothing inside `body` is executed now; the board replays it on
    /// [`Device::execute_macro`] or at boot.
    pub async fn record_macro<F>(&self, exec_on_boot: bool, body: F) -> Result<u8>
    where
        F: FnOnce(&dyn CommandSink),
    {
        let recording = MacroRecording::new(exec_on_boot, record(body));
        let _graph = self.core.graph.lock().await;
        let correlator = self.require(MODULE_MACRO)?;
        macros::commit(&correlator, &recording).await
    }

    pub async fn execute_macro(&self, id: u8) -> Result<()> {
        let correlator = self.require(MODULE_MACRO)?;
        correlator.send(macros::execute(id)).wait().await.map(|_| ())
    }

    pub async fn remove_macro(&self, id: u8) -> Result<()> {
        let correlator = self.require(MODULE_MACRO)?;
        correlator.send(macros::remove(id)).wait().await.map(|_| ())
    }

    pub async fn erase_macros(&self) -> Result<()> {
        let correlator = self.require(MODULE_MACRO)?;
        correlator.send(macros::erase_all()).wait().await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Sensors
    // ------------------------------------------------------------------

    pub async fn configure_step_detector(
        &self,
        config: accelerometer::StepDetectorConfig,
    ) -> Result<()> {
        let (correlator, registry) = self.core.link_parts()?;
        accelerometer::require_step_detector(&registry)?;
        correlator.send(config.command()).wait().await.map(|_| ())
    }

    /// Hardware step counter value
    pub async fn read_step_count(&self) -> Result<u32> {
        let (correlator, registry) = self.core.link_parts()?;
        accelerometer::require_step_detector(&registry)?;
        let payload = correlator
            .request(accelerometer::read_step_counter())
            .wait()
            .await?;
        let value = accelerometer::step_count().decode(&payload)?;
        value
            .as_f64()
            .map(|v| v as u32)
            .ok_or_else(|| SensorError::ProtocolMismatch("step count is not a number".to_string()))
    }

    /// One-shot temperature read in degrees Celsius
    pub async fn read_temperature(&self, channel: u8) -> Result<f32> {
        let correlator = self.require(MODULE_TEMPERATURE)?;
        let signal = temperature::channel(channel);
        let payload = correlator
            .request_keyed(
                temperature::read(channel),
                ResponseKey::indexed(signal.tag.module, signal.tag.register, channel),
                correlator.default_timeout(),
            )
            .wait()
            .await?;
        let value = signal.decode(payload.get(1..).unwrap_or_default())?;
        value.as_f64().map(|v| v as f32).ok_or_else(|| {
            SensorError::ProtocolMismatch(format!("temperature reply {:02X?}", payload))
        })
    }

    fn require(&self, module: u8) -> Result<Arc<Correlator>> {
        let (correlator, registry) = self.core.link_parts()?;
        registry.require(module)?;
        Ok(correlator)
    }
}

impl CommandSink for Device {
    fn submit(&self, command: Command) -> Ack {
        Device::submit(self, command)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.core.config)
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

/// Read module info for every known module. Modules that do not answer are absent.
async fn discover(correlator: &Correlator) -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    for &module in KNOWN_MODULES {
        let info = match correlator.request(Command::module_info(module)).wait().await {
            Ok(payload) => ModuleInfo::parse(module, &payload),
            Err(e) if e.is_timeout() => {
                tracing::warn!("Module {:#04x} did not answer discovery", module);
                ModuleInfo::absent(module)
            }
            Err(e) => return Err(e.with_context("discovering modules")),
        };
        registry.insert(info);
    }
    Ok(registry)
}
