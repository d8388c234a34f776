//! Transport trait for the board link
//!
//! This module provides the boundary between the protocol engine and whatever
//! carries the bytes (a BLE characteristic, a serial bridge, or the in-process
//! [`MockBoard`](super::mock_board::MockBoard) used by tests).
//!
//! The engine hands the transport an [`InboundHandle`] once, at attach time.
//! The transport calls back through it for every inbound notification, every
//! read response, and when the link drops.

use std::collections::VecDeque;
use std::sync::Weak;

use crate::error::Result;

/// Size of the rolling window for recent response latencies
const RECENT_WINDOW_SIZE: usize = 100;

/// Statistics for correlated command traffic
///
/// Tracks write counts, response latency and timeouts for one connection.
#[derive(Debug, Clone)]
pub struct TransportStats {
    /// Total number of commands written
    pub commands_sent: u64,
    /// Total bytes written
    pub bytes_written: u64,
    /// Commands the transport refused
    pub failed_writes: u64,
    /// Responses paired with a pending operation
    pub responses: u64,
    /// Pending operations whose deadline elapsed
    pub timeouts: u64,
    /// Inbound packets nobody claimed
    pub dropped_packets: u64,

    // Latency tracking
    /// Minimum response latency observed (microseconds)
    pub min_latency_us: u64,
    /// Maximum response latency observed (microseconds)
    pub max_latency_us: u64,
    /// Sum of all response latencies (microseconds)
    pub total_latency_us: u64,
    /// Rolling window of recent latencies for jitter calculation
    pub recent_latencies: VecDeque<u64>,
}

impl Default for TransportStats {
    fn default() -> Self {
        Self {
            commands_sent: 0,
            bytes_written: 0,
            failed_writes: 0,
            responses: 0,
            timeouts: 0,
            dropped_packets: 0,
            min_latency_us: u64::MAX,
            max_latency_us: 0,
            total_latency_us: 0,
            recent_latencies: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl TransportStats {
    pub fn record_write(&mut self, bytes: usize) {
        self.commands_sent += 1;
        self.bytes_written += bytes as u64;
    }

    pub fn record_failed_write(&mut self) {
        self.failed_writes += 1;
    }

    /// Record a response with its round-trip latency
    pub fn record_response(&mut self, latency_us: u64) {
        self.responses += 1;
        self.total_latency_us += latency_us;
        self.min_latency_us = self.min_latency_us.min(latency_us);
        self.max_latency_us = self.max_latency_us.max(latency_us);

        self.recent_latencies.push_back(latency_us);
        if self.recent_latencies.len() > RECENT_WINDOW_SIZE {
            self.recent_latencies.pop_front();
        }
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_dropped(&mut self) {
        self.dropped_packets += 1;
    }

    /// Average response latency in microseconds
    pub fn avg_latency_us(&self) -> f64 {
        if self.responses == 0 {
            0.0
        } else {
            self.total_latency_us as f64 / self.responses as f64
        }
    }

    /// Jitter (max - min) over the recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        let min = self.recent_latencies.iter().min().copied().unwrap_or(0);
        let max = self.recent_latencies.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }

    /// Share of correlated operations that received a response, as a percentage
    pub fn response_rate(&self) -> f64 {
        let total = self.responses + self.timeouts;
        if total == 0 {
            100.0
        } else {
            (self.responses as f64 / total as f64) * 100.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Receiver side of the link, implemented by the device core
pub trait InboundSink: Send + Sync {
    /// An unsolicited notification arrived
    fn on_notification(&self, bytes: &[u8]);

    /// A response to a read request arrived
    fn on_read_response(&self, bytes: &[u8]);

    /// The link dropped
    fn on_disconnected(&self);
}

/// Callback handle given to a transport
///
/// Holds a weak reference so a transport owned by the device never keeps the
/// device alive. Calls after the device is dropped are ignored.
#[derive(Clone)]
pub struct InboundHandle {
    sink: Weak<dyn InboundSink>,
}

impl InboundHandle {
    pub fn new(sink: Weak<dyn InboundSink>) -> Self {
        Self { sink }
    }

    pub fn notify(&self, bytes: &[u8]) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_notification(bytes);
        }
    }

    pub fn read_response(&self, bytes: &[u8]) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_read_response(bytes);
        }
    }

    pub fn disconnected(&self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_disconnected();
        }
    }

    /// Whether the receiving device still exists
    pub fn is_alive(&self) -> bool {
        self.sink.strong_count() > 0
    }
}

impl std::fmt::Debug for InboundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Byte-oriented link to the board
///
/// Implementations must be `Send + Sync`: the correlator writes from its
/// worker task while inbound callbacks may arrive on any thread.
///
/// # Example
///
/// ```ignore
/// let board = Arc::new(MockBoard::new());
/// let device = Device::connect(board.clone(), DeviceConfig::default()).await?;
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Register the callback handle; called once per connection before any write
    fn attach(&self, inbound: InboundHandle);

    /// Send one encoded command
    fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Human readable name for logs
    fn name(&self) -> String {
        "transport".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Vec<u8>>>,
        dropped: Mutex<bool>,
    }

    impl InboundSink for Recording {
        fn on_notification(&self, bytes: &[u8]) {
            self.seen.lock().unwrap().push(bytes.to_vec());
        }

        fn on_read_response(&self, bytes: &[u8]) {
            self.seen.lock().unwrap().push(bytes.to_vec());
        }

        fn on_disconnected(&self) {
            *self.dropped.lock().unwrap() = true;
        }
    }

    #[test]
    fn test_handle_forwards_while_alive() {
        let sink = Arc::new(Recording::default());
        let weak: Weak<dyn InboundSink> = Arc::downgrade(&sink) as Weak<dyn InboundSink>;
        let handle = InboundHandle::new(weak);

        handle.notify(&[0x01, 0x01, 0x01]);
        handle.read_response(&[0x04, 0x81, 0x00, 0xC8, 0x00]);
        handle.disconnected();

        assert_eq!(sink.seen.lock().unwrap().len(), 2);
        assert!(*sink.dropped.lock().unwrap());

        drop(sink);
        assert!(!handle.is_alive());
        handle.notify(&[0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_stats_latency() {
        let mut stats = TransportStats::default();
        stats.record_response(100);
        stats.record_response(300);
        stats.record_timeout();
        assert_eq!(stats.avg_latency_us(), 200.0);
        assert_eq!(stats.jitter_us(), 200);
        assert!((stats.response_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_mock_transport_expectations() {
        let mut transport = MockTransport::new();
        transport.expect_attach().times(1).return_const(());
        transport
            .expect_write()
            .withf(|bytes| bytes.to_vec() == vec![0x02, 0x01, 0x01])
            .times(1)
            .returning(|_| Ok(()));

        let sink = Arc::new(Recording::default());
        let weak: Weak<dyn InboundSink> = Arc::downgrade(&sink) as Weak<dyn InboundSink>;
        transport.attach(InboundHandle::new(weak));
        assert!(transport.write(&[0x02, 0x01, 0x01]).is_ok());
    }
}
