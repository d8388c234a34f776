//! Log readout session
//!
//! A [`LogDownload`] lives in the device while a readout is running. The
//! inbound callback feeds it record packets and progress packets; the task
//! awaiting the download watches a [`tokio::sync::watch`] channel for
//! progress, completion or disconnect.

use tokio::sync::watch;

use super::reassembly::{Assembled, LogReassembler, ReassemblyStats};
use crate::config::LogConfig;
use crate::protocol::constants::*;
use crate::protocol::Command;

/// Progress callback: `(remaining, total)` records
pub type ProgressFn = Box<dyn FnMut(u32, u32) + Send>;

/// Readout state published to the waiting task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadoutState {
    Running { remaining: u32 },
    Done,
    Disconnected,
}

/// Summary returned when a download finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Entries the board reported before readout
    pub expected: u32,
    pub stats: ReassemblyStats,
}

impl DownloadReport {
    /// Values delivered to handlers
    pub fn values(&self) -> u64 {
        self.stats.values
    }

    /// Records that produced no value
    pub fn dropped(&self) -> u64 {
        self.stats.corrupt + self.stats.unknown + self.stats.duplicate
    }
}

/// `[0x0B, 0x85]`
pub fn length_read() -> Command {
    Command::read(MODULE_LOGGING, LOG_LENGTH, Vec::new())
}

/// `[0x0B, 0x06, count u32, interval u32]`
pub fn readout(count: u32, progress_updates: u32) -> Command {
    let interval = (count / progress_updates.max(1)).max(1);
    let mut payload = count.to_le_bytes().to_vec();
    payload.extend_from_slice(&interval.to_le_bytes());
    Command::new(MODULE_LOGGING, LOG_READOUT, payload)
}

pub fn enable(on: bool) -> Command {
    Command::new(MODULE_LOGGING, LOG_ENABLE, vec![u8::from(on)])
}

/// Overwrite the oldest entries when the log is full
pub fn circular_buffer(overwrite: bool) -> Command {
    Command::new(MODULE_LOGGING, LOG_CIRCULAR_BUFFER, vec![u8::from(overwrite)])
}

/// Remove every stored entry
pub fn clear() -> Command {
    Command::new(MODULE_LOGGING, LOG_REMOVE_ENTRIES, vec![0xFF; 4])
}

/// Parse a `[count u32]` length reply
pub fn parse_length(payload: &[u8]) -> Option<u32> {
    match payload {
        [a, b, c, d, ..] => Some(u32::from_le_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

/// In-flight readout
pub struct LogDownload {
    reassembler: LogReassembler,
    expected: u32,
    state: watch::Sender<ReadoutState>,
    on_progress: Option<ProgressFn>,
}

impl LogDownload {
    pub fn new(
        config: LogConfig,
        log_sets: Vec<Vec<u8>>,
        expected: u32,
        on_progress: Option<ProgressFn>,
    ) -> (Self, watch::Receiver<ReadoutState>) {
        let (state, rx) = watch::channel(ReadoutState::Running {
            remaining: expected,
        });
        (
            Self {
                reassembler: LogReassembler::new(config, log_sets),
                expected,
                state,
                on_progress,
            },
            rx,
        )
    }

    /// Records packet `[0x0B, 0x07, ...]`
    pub fn on_records(&mut self, payload: &[u8]) -> Vec<Assembled> {
        self.reassembler.push_packet(payload)
    }

    /// Progress packet `[0x0B, 0x08, remaining u32]`
    pub fn on_progress(&mut self, payload: &[u8]) {
        let Some(remaining) = parse_length(payload) else {
            tracing::debug!("Malformed readout progress {:02X?}", payload);
            return;
        };
        if let Some(callback) = self.on_progress.as_mut() {
            callback(remaining, self.expected);
        }
        let next = if remaining == 0 {
            ReadoutState::Done
        } else {
            ReadoutState::Running { remaining }
        };
        self.state.send_replace(next);
    }

    pub fn on_disconnected(&mut self) {
        self.state.send_replace(ReadoutState::Disconnected);
    }

    /// Release what is left and summarise
    pub fn finish(&mut self) -> (Vec<Assembled>, DownloadReport) {
        let rest = self.reassembler.flush();
        let report = DownloadReport {
            expected: self.expected,
            stats: self.reassembler.stats(),
        };
        (rest, report)
    }
}

impl std::fmt::Debug for LogDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDownload")
            .field("expected", &self.expected)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_readout_interval() {
        assert_eq!(
            readout(640, 64).encode(),
            vec![0x0B, 0x06, 0x80, 0x02, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00]
        );
        // fewer records than updates still asks for an interval of one
        assert_eq!(&readout(3, 64).encode()[6..], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_control_commands() {
        assert_eq!(length_read().encode(), vec![0x0B, 0x85]);
        assert_eq!(clear().encode(), vec![0x0B, 0x09, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(enable(true).encode(), vec![0x0B, 0x01, 0x01]);
        assert_eq!(circular_buffer(false).encode(), vec![0x0B, 0x0B, 0x00]);
    }

    #[test]
    fn test_progress_reaches_done() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (mut download, rx) = LogDownload::new(
            LogConfig::default(),
            vec![vec![0]],
            4,
            Some(Box::new(move |remaining, total| {
                sink.lock().unwrap().push((remaining, total));
            })),
        );
        download.on_progress(&2u32.to_le_bytes());
        assert_eq!(*rx.borrow(), ReadoutState::Running { remaining: 2 });
        download.on_progress(&0u32.to_le_bytes());
        assert_eq!(*rx.borrow(), ReadoutState::Done);
        assert_eq!(*seen.lock().unwrap(), vec![(2, 4), (0, 4)]);
    }
}
