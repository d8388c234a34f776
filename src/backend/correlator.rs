//! Command correlator
//!
//! The correlator owns the single outstanding command slot of the link. Every
//! command goes through a FIFO queue drained by one worker task:
//!
//! - **Fire-and-forget** commands are written and acknowledged immediately.
//! - **Requests** register a pending operation keyed by the expected
//!   response header *before* the bytes are written, then the worker waits
//!   for the response (or the deadline) before sending the next command.
//!
//! A pending operation terminates exactly once: by its response, by its
//! deadline, or by a disconnect. Once a deadline fires the entry is removed
//! from the pending table, so a late response finds nothing and is ignored.
//!
//! On disconnect every pending and queued operation fails with
//! [`SensorError::TransportDisconnected`], and later submissions fail without
//! touching the transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use super::transport::{Transport, TransportStats};
use crate::error::{Result, SensorError};
use crate::protocol::{Command, Packet, ResponseKey};

type Reply = oneshot::Sender<Result<Vec<u8>>>;

/// Acknowledgment of a submitted command
///
/// Either already resolved (recorded commands, immediate failures) or waiting
/// on the correlator. Resolves to the response payload for requests and to an
/// empty payload for fire-and-forget commands.
#[derive(Debug)]
pub struct Ack {
    inner: AckInner,
}

#[derive(Debug)]
enum AckInner {
    Ready(Result<Vec<u8>>),
    Pending(oneshot::Receiver<Result<Vec<u8>>>),
}

impl Ack {
    pub fn ready(result: Result<Vec<u8>>) -> Self {
        Self {
            inner: AckInner::Ready(result),
        }
    }

    /// Already resolved successfully with no payload
    pub fn done() -> Self {
        Self::ready(Ok(Vec::new()))
    }

    fn pending(rx: oneshot::Receiver<Result<Vec<u8>>>) -> Self {
        Self {
            inner: AckInner::Pending(rx),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner, AckInner::Ready(_))
    }

    pub async fn wait(self) -> Result<Vec<u8>> {
        match self.inner {
            AckInner::Ready(result) => result,
            AckInner::Pending(rx) => rx
                .await
                .unwrap_or(Err(SensorError::TransportDisconnected)),
        }
    }
}

/// One queued submission
struct Submission {
    command: Command,
    expect: Option<(ResponseKey, Duration)>,
    reply: Reply,
}

struct PendingEntry {
    key: ResponseKey,
    sent_at: Instant,
    reply: Reply,
}

/// Outstanding operations awaiting a response
#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingEntry>,
}

impl PendingTable {
    fn take_matching(&mut self, packet: &Packet<'_>) -> Option<PendingEntry> {
        let id = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.key.matches(packet))
            .map(|(id, _)| *id)
            .min()?;
        self.entries.remove(&id)
    }
}

/// Shared state between the correlator handle, its worker and inbound dispatch
struct Shared {
    transport: Arc<dyn Transport>,
    pending: Mutex<PendingTable>,
    disconnected: AtomicBool,
    next_id: AtomicU64,
    stats: Mutex<TransportStats>,
}

impl Shared {
    fn fail_all_pending(&self) -> usize {
        let drained: Vec<PendingEntry> = match self.pending.lock() {
            Ok(mut table) => table.entries.drain().map(|(_, e)| e).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .entries
                .drain()
                .map(|(_, e)| e)
                .collect(),
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.reply.send(Err(SensorError::TransportDisconnected));
        }
        count
    }

    fn with_stats(&self, f: impl FnOnce(&mut TransportStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

/// Handle to the correlator worker
pub struct Correlator {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<Submission>,
    default_timeout: Duration,
}

impl Correlator {
    /// Start the worker task. Must be called from within a tokio runtime.
    pub fn spawn(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            transport,
            pending: Mutex::new(PendingTable::default()),
            disconnected: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            stats: Mutex::new(TransportStats::default()),
        });
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(shared.clone(), rx));

        Self {
            shared,
            queue,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }

    /// Queue a fire-and-forget command
    pub fn send(&self, command: Command) -> Ack {
        self.enqueue(command, None)
    }

    /// Queue a command whose response header echoes its own
    pub fn request(&self, command: Command) -> Ack {
        let key = ResponseKey::echo(&command);
        self.request_keyed(command, key, self.default_timeout)
    }

    /// Queue a command expecting a response matching `key` within `timeout`
    pub fn request_keyed(&self, command: Command, key: ResponseKey, timeout: Duration) -> Ack {
        self.enqueue(command, Some((key, timeout)))
    }

    /// Request a slot in a firmware table and return the allocated id.
    ///
    /// The board answers allocations with `[module, register, id]` and stays
    /// silent when the table is full, so a timeout here means exhaustion.
    pub async fn allocate(&self, command: Command, table: &str) -> Result<u8> {
        let header = command.to_string();
        match self.request(command).wait().await {
            Ok(payload) => payload.first().copied().ok_or_else(|| {
                SensorError::ProtocolMismatch(format!("empty allocation reply to {}", header))
            }),
            Err(e) if e.is_timeout() => Err(SensorError::ResourceExhausted(format!(
                "{} table is full",
                table
            ))),
            Err(e) => Err(e),
        }
    }

    fn enqueue(&self, command: Command, expect: Option<(ResponseKey, Duration)>) -> Ack {
        if self.is_disconnected() {
            return Ack::ready(Err(SensorError::TransportDisconnected));
        }
        let (reply, rx) = oneshot::channel();
        let submission = Submission {
            command,
            expect,
            reply,
        };
        if let Err(mpsc::error::SendError(submission)) = self.queue.send(submission) {
            let _ = submission.reply.send(Err(SensorError::TransportDisconnected));
        }
        Ack::pending(rx)
    }

    /// Pair an inbound packet with the oldest matching pending operation.
    ///
    /// Returns `true` when the packet resolved an operation.
    pub fn resolve(&self, packet: &Packet<'_>) -> bool {
        let entry = match self.shared.pending.lock() {
            Ok(mut table) => table.take_matching(packet),
            Err(_) => None,
        };
        match entry {
            Some(entry) => {
                let latency = entry.sent_at.elapsed().as_micros() as u64;
                self.shared.with_stats(|s| s.record_response(latency));
                tracing::debug!("Resolved pending {} after {}us", entry.key, latency);
                let _ = entry.reply.send(Ok(packet.payload.to_vec()));
                true
            }
            None => false,
        }
    }

    /// Mark the link down and fail every outstanding operation
    pub fn disconnect(&self) {
        if self.shared.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        let failed = self.shared.fail_all_pending();
        tracing::warn!(
            "Transport disconnected, failed {} pending operation(s)",
            failed
        );
    }

    pub fn record_dropped(&self) {
        self.shared.with_stats(TransportStats::record_dropped);
    }

    pub fn stats(&self) -> TransportStats {
        match self.shared.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(_) => TransportStats::default(),
        }
    }

    /// Number of operations currently awaiting a response
    pub fn pending_count(&self) -> usize {
        self.shared
            .pending
            .lock()
            .map(|t| t.entries.len())
            .unwrap_or(0)
    }
}

async fn run_worker(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Submission>) {
    while let Some(submission) = rx.recv().await {
        if shared.disconnected.load(Ordering::SeqCst) {
            let _ = submission.reply.send(Err(SensorError::TransportDisconnected));
            continue;
        }

        let bytes = submission.command.encode();
        match submission.expect {
            None => {
                tracing::trace!("Write {}", submission.command);
                let result = write(&shared, &bytes);
                let _ = submission.reply.send(result.map(|_| Vec::new()));
            }
            Some((key, timeout)) => {
                let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, response) = oneshot::channel();
                let registered = match shared.pending.lock() {
                    Ok(mut table) => {
                        table.entries.insert(
                            id,
                            PendingEntry {
                                key,
                                sent_at: Instant::now(),
                                reply: tx,
                            },
                        );
                        true
                    }
                    Err(_) => false,
                };
                if !registered {
                    let _ = submission.reply.send(Err(SensorError::InvalidState(
                        "pending table poisoned".to_string(),
                    )));
                    continue;
                }

                tracing::trace!("Write {} expecting {}", submission.command, key);
                if let Err(e) = write(&shared, &bytes) {
                    if let Ok(mut table) = shared.pending.lock() {
                        table.entries.remove(&id);
                    }
                    let _ = submission.reply.send(Err(e));
                    continue;
                }

                let outcome = match tokio::time::timeout(timeout, response).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(SensorError::TransportDisconnected),
                    Err(_) => {
                        let removed = shared
                            .pending
                            .lock()
                            .map(|mut t| t.entries.remove(&id).is_some())
                            .unwrap_or(false);
                        if removed {
                            shared.with_stats(TransportStats::record_timeout);
                        }
                        tracing::warn!(
                            "Timed out after {:?} waiting for {} ({})",
                            timeout,
                            key,
                            submission.command
                        );
                        Err(SensorError::timeout(format!(
                            "response to {}",
                            submission.command
                        )))
                    }
                };
                let _ = submission.reply.send(outcome);
            }
        }
    }
    tracing::debug!("Correlator worker stopped");
}

fn write(shared: &Shared, bytes: &[u8]) -> Result<()> {
    match shared.transport.write(bytes) {
        Ok(()) => {
            shared.with_stats(|s| s.record_write(bytes.len()));
            Ok(())
        }
        Err(e) => {
            shared.with_stats(TransportStats::record_failed_write);
            tracing::warn!("Transport write failed: {}", e);
            Err(e)
        }
    }
}
