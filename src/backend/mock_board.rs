//! Mock board for testing without hardware
//!
//! [`MockBoard`] implements [`Transport`] and answers the protocol the way
//! the firmware does, synchronously from inside [`Transport::write`]. It is
//! used by the unit and integration tests and by the `mock_session` demo.
//!
//! # Features
//!
//! - **Write log**: every command is recorded in order for byte-exact assertions
//! - **Resource tables**: processors, loggers, events, timers and macros are
//!   allocated from bounded tables; a full table stays silent, like the firmware
//! - **Silent registers**: responses for chosen `(module, register)` pairs can
//!   be suppressed to exercise timeouts
//! - **Log storage**: records pushed by the test are streamed back on readout
//! - **Link control**: notifications can be injected and the link dropped
//!
//! # Example
//!
//! ```ignore
//! use sensorgraph_rs::backend::mock_board::{MockBoard, MockBoardConfig};
//!
//! let board = Arc::new(MockBoard::with_config(MockBoardConfig {
//!     timer_capacity: 1,
//!     ..Default::default()
//! }));
//! let device = Device::connect(board.clone(), DeviceConfig::default()).await?;
//! assert_eq!(board.writes()[0], vec![0x01, 0x80]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use super::registry::{ModuleInfo, ACCEL_IMPL_BMI160, DP_REVISION_PACKER};
use super::transport::{InboundHandle, Transport};
use crate::error::{Result, SensorError};
use crate::protocol::constants::*;
use crate::protocol::sensors::{accelerometer, temperature};

/// Table sizes and module list of a simulated board
#[derive(Debug, Clone)]
pub struct MockBoardConfig {
    /// Modules reported at discovery; anything else answers as absent
    pub modules: Vec<ModuleInfo>,
    pub processor_capacity: usize,
    pub logger_capacity: usize,
    pub event_capacity: usize,
    pub timer_capacity: usize,
    pub macro_capacity: usize,
}

impl Default for MockBoardConfig {
    fn default() -> Self {
        Self {
            modules: default_modules(),
            processor_capacity: 28,
            logger_capacity: 8,
            event_capacity: 28,
            timer_capacity: 8,
            macro_capacity: 8,
        }
    }
}

/// Every known module, with a BMI160 accelerometer and a packer-capable data processor
pub fn default_modules() -> Vec<ModuleInfo> {
    KNOWN_MODULES
        .iter()
        .map(|&id| match id {
            MODULE_ACCELEROMETER => ModuleInfo::present(id, ACCEL_IMPL_BMI160, 1),
            MODULE_DATA_PROCESSOR => ModuleInfo::present(id, 0, DP_REVISION_PACKER),
            _ => ModuleInfo::present(id, 0, 0),
        })
        .collect()
}

/// A stored log record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockLogRecord {
    pub log_id: u8,
    pub tick: u16,
    pub payload: [u8; LOG_RECORD_PAYLOAD],
}

#[derive(Debug, Default)]
struct BoardState {
    connected: bool,
    writes: Vec<Vec<u8>>,
    silent: HashSet<(u8, u8)>,
    next_processor_id: u8,
    processors: BTreeSet<u8>,
    loggers: BTreeSet<u8>,
    events: BTreeSet<u8>,
    timers: BTreeSet<u8>,
    macros: BTreeSet<u8>,
    log_records: Vec<MockLogRecord>,
    logging_enabled: bool,
    temperatures: BTreeMap<u8, f32>,
    step_count: u16,
}

/// Outbound packet produced by the simulated firmware
enum Reply {
    Notify(Vec<u8>),
    Read(Vec<u8>),
}

/// In-process simulated board
#[derive(Debug)]
pub struct MockBoard {
    config: MockBoardConfig,
    state: Mutex<BoardState>,
    inbound: Mutex<Option<InboundHandle>>,
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}

fn lowest_free(used: &BTreeSet<u8>, capacity: usize) -> Option<u8> {
    (0..capacity.min(u8::MAX as usize) as u8).find(|id| !used.contains(id))
}

impl MockBoard {
    pub fn new() -> Self {
        Self::with_config(MockBoardConfig::default())
    }

    pub fn with_config(config: MockBoardConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BoardState {
                connected: true,
                ..Default::default()
            }),
            inbound: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle(&self) -> Option<InboundHandle> {
        self.inbound.lock().ok().and_then(|h| h.clone())
    }

    /// Every command written so far, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Return and clear the write log
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.lock().writes)
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Suppress (or restore) responses for a module/register pair
    pub fn set_silent(&self, module: u8, register: u8, silent: bool) {
        let mut state = self.lock();
        if silent {
            state.silent.insert((module, register));
        } else {
            state.silent.remove(&(module, register));
        }
    }

    /// Processor ids currently allocated
    pub fn live_processors(&self) -> Vec<u8> {
        self.lock().processors.iter().copied().collect()
    }

    pub fn live_loggers(&self) -> Vec<u8> {
        self.lock().loggers.iter().copied().collect()
    }

    pub fn live_timers(&self) -> Vec<u8> {
        self.lock().timers.iter().copied().collect()
    }

    pub fn live_macros(&self) -> Vec<u8> {
        self.lock().macros.iter().copied().collect()
    }

    pub fn live_events(&self) -> Vec<u8> {
        self.lock().events.iter().copied().collect()
    }

    pub fn is_logging(&self) -> bool {
        self.lock().logging_enabled
    }

    pub fn set_temperature(&self, channel: u8, celsius: f32) {
        self.lock().temperatures.insert(channel, celsius);
    }

    pub fn set_step_count(&self, steps: u16) {
        self.lock().step_count = steps;
    }

    /// Store a log record to be streamed back on the next readout
    pub fn push_log_record(&self, log_id: u8, tick: u16, payload: [u8; LOG_RECORD_PAYLOAD]) {
        self.lock().log_records.push(MockLogRecord {
            log_id,
            tick,
            payload,
        });
    }

    pub fn log_record_count(&self) -> usize {
        self.lock().log_records.len()
    }

    /// Deliver a notification as if the board had sent it
    pub fn inject(&self, bytes: &[u8]) {
        if let Some(handle) = self.handle() {
            handle.notify(bytes);
        }
    }

    /// Drop the link: further writes fail and the device is told
    pub fn disconnect(&self) {
        self.lock().connected = false;
        if let Some(handle) = self.handle() {
            handle.disconnected();
        }
    }

    /// Bring the link back up (the device must reconnect to use it)
    pub fn restore_link(&self) {
        self.lock().connected = true;
    }

    fn module_info(&self, module: u8) -> Vec<u8> {
        let mut reply = vec![module, REG_MODULE_INFO | READ_BIT];
        if let Some(info) = self.config.modules.iter().find(|m| m.id == module) {
            if let Some(implementation) = info.implementation {
                reply.push(implementation);
                reply.push(info.revision);
                reply.extend_from_slice(&info.extra);
            }
        }
        reply
    }

    /// Simulated firmware: apply one command and collect the packets it produces
    fn process(&self, state: &mut BoardState, bytes: &[u8]) -> Vec<Reply> {
        let (module, register, payload) = match bytes {
            [m, r, rest @ ..] => (*m, *r, rest),
            _ => return Vec::new(),
        };
        if state.silent.contains(&(module, register)) {
            return Vec::new();
        }

        let mut replies = Vec::new();
        let config = &self.config;
        match (module, register) {
            (m, r) if r == REG_MODULE_INFO | READ_BIT => {
                replies.push(Reply::Read(self.module_info(m)));
            }
            (MODULE_DATA_PROCESSOR, DP_ADD) => {
                if state.processors.len() < config.processor_capacity {
                    let id = state.next_processor_id;
                    state.next_processor_id = state.next_processor_id.wrapping_add(1);
                    state.processors.insert(id);
                    replies.push(Reply::Notify(vec![MODULE_DATA_PROCESSOR, DP_ADD, id]));
                }
            }
            (MODULE_DATA_PROCESSOR, DP_REMOVE) => {
                if let Some(id) = payload.first() {
                    state.processors.remove(id);
                }
            }
            (MODULE_LOGGING, LOG_TRIGGER) => {
                if let Some(id) = lowest_free(&state.loggers, config.logger_capacity) {
                    state.loggers.insert(id);
                    replies.push(Reply::Notify(vec![MODULE_LOGGING, LOG_TRIGGER, id]));
                }
            }
            (MODULE_LOGGING, LOG_REMOVE) => {
                if let Some(id) = payload.first() {
                    state.loggers.remove(id);
                }
            }
            (MODULE_LOGGING, LOG_ENABLE) => {
                state.logging_enabled = payload.first() == Some(&1);
            }
            (MODULE_LOGGING, LOG_REMOVE_ENTRIES) => {
                state.log_records.clear();
            }
            (MODULE_LOGGING, r) if r == LOG_LENGTH | READ_BIT => {
                let mut reply = vec![MODULE_LOGGING, r];
                reply.extend_from_slice(&(state.log_records.len() as u32).to_le_bytes());
                replies.push(Reply::Read(reply));
            }
            (MODULE_LOGGING, LOG_READOUT) => {
                replies.extend(self.readout(state, payload));
            }
            (MODULE_EVENT, EVENT_ENTRY) => {
                if let Some(id) = lowest_free(&state.events, config.event_capacity) {
                    state.events.insert(id);
                    replies.push(Reply::Notify(vec![MODULE_EVENT, EVENT_ENTRY, id]));
                }
            }
            (MODULE_EVENT, EVENT_REMOVE) => {
                if let Some(id) = payload.first() {
                    state.events.remove(id);
                }
            }
            (MODULE_TIMER, TIMER_CREATE) => {
                if let Some(id) = lowest_free(&state.timers, config.timer_capacity) {
                    state.timers.insert(id);
                    replies.push(Reply::Notify(vec![MODULE_TIMER, TIMER_CREATE, id]));
                }
            }
            (MODULE_TIMER, TIMER_REMOVE) => {
                if let Some(id) = payload.first() {
                    state.timers.remove(id);
                }
            }
            (MODULE_MACRO, MACRO_BEGIN) => {
                if let Some(id) = lowest_free(&state.macros, config.macro_capacity) {
                    state.macros.insert(id);
                    replies.push(Reply::Notify(vec![MODULE_MACRO, MACRO_BEGIN, id]));
                }
            }
            (MODULE_MACRO, MACRO_REMOVE) => {
                if let Some(id) = payload.first() {
                    state.macros.remove(id);
                }
            }
            (MODULE_MACRO, MACRO_ERASE_ALL) => {
                state.macros.clear();
            }
            (MODULE_TEMPERATURE, r) if r == temperature::REG_VALUE | READ_BIT => {
                let channel = payload.first().copied().unwrap_or(0);
                let celsius = state.temperatures.get(&channel).copied().unwrap_or(25.0);
                let raw = (celsius * 8.0).round() as i16;
                let mut reply = vec![MODULE_TEMPERATURE, r, channel];
                reply.extend_from_slice(&raw.to_le_bytes());
                replies.push(Reply::Read(reply));
            }
            (MODULE_ACCELEROMETER, r) if r == accelerometer::REG_STEP_COUNTER | READ_BIT => {
                let mut reply = vec![MODULE_ACCELEROMETER, r];
                reply.extend_from_slice(&state.step_count.to_le_bytes());
                replies.push(Reply::Read(reply));
            }
            _ => {}
        }
        replies
    }

    /// Stream stored records, two per notification, followed by progress updates
    fn readout(&self, state: &BoardState, payload: &[u8]) -> Vec<Reply> {
        let requested = match payload {
            [a, b, c, d, ..] => u32::from_le_bytes([*a, *b, *c, *d]) as usize,
            _ => state.log_records.len(),
        };
        let records: Vec<MockLogRecord> = state
            .log_records
            .iter()
            .take(requested)
            .copied()
            .collect();

        let mut replies = Vec::new();
        let mut remaining = records.len();
        for pair in records.chunks(2) {
            let mut packet = vec![MODULE_LOGGING, LOG_READOUT_NOTIFY];
            for record in pair {
                packet.push(record.log_id);
                packet.extend_from_slice(&record.tick.to_le_bytes());
                packet.extend_from_slice(&record.payload);
            }
            replies.push(Reply::Notify(packet));
            remaining -= pair.len();
            if remaining > 0 {
                replies.push(Reply::Notify(progress(remaining as u32)));
            }
        }
        replies.push(Reply::Notify(progress(0)));
        replies
    }
}

fn progress(remaining: u32) -> Vec<u8> {
    let mut packet = vec![MODULE_LOGGING, LOG_READOUT_PROGRESS];
    packet.extend_from_slice(&remaining.to_le_bytes());
    packet
}

impl Transport for MockBoard {
    fn attach(&self, inbound: InboundHandle) {
        if let Ok(mut slot) = self.inbound.lock() {
            *slot = Some(inbound);
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let replies = {
            let mut state = self.lock();
            if !state.connected {
                return Err(SensorError::Transport("mock link is down".to_string()));
            }
            state.writes.push(bytes.to_vec());
            self.process(&mut state, bytes)
        };

        // Deliver outside the board lock; the device may write again from a callback
        if let Some(handle) = self.handle() {
            for reply in replies {
                match reply {
                    Reply::Notify(packet) => handle.notify(&packet),
                    Reply::Read(packet) => handle.read_response(&packet),
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> String {
        "mock board".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_ids_are_monotonic() {
        let board = MockBoard::new();
        board.write(&[0x09, 0x02, 0x03, 0x04, 0xFF, 0xA0, 0x01, 0x00, 0x00, 0x00]).unwrap();
        board.write(&[0x09, 0x02, 0x09, 0x03, 0x00, 0x60, 0x01, 0x00, 0x00, 0x00]).unwrap();
        board.write(&[0x09, 0x06, 0x00]).unwrap();
        board.write(&[0x09, 0x02, 0x03, 0x04, 0xFF, 0xA0, 0x01, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(board.live_processors(), vec![1, 2]);
        assert_eq!(board.writes().len(), 4);
    }

    #[test]
    fn test_timer_table_full_is_silent() {
        let board = MockBoard::with_config(MockBoardConfig {
            timer_capacity: 1,
            ..Default::default()
        });
        let mut state = board.lock();
        let create = [0x0C, 0x02, 0xE8, 0x03, 0x00, 0x00, 0xFF, 0xFF, 0x00];
        assert_eq!(board.process(&mut state, &create).len(), 1);
        assert!(board.process(&mut state, &create).is_empty());
    }

    #[test]
    fn test_absent_module_info() {
        let board = MockBoard::with_config(MockBoardConfig {
            modules: vec![ModuleInfo::present(MODULE_LED, 0, 1)],
            ..Default::default()
        });
        assert_eq!(board.module_info(MODULE_LED), vec![0x02, 0x80, 0x00, 0x01]);
        assert_eq!(board.module_info(MODULE_BAROMETER), vec![0x12, 0x80]);
    }

    #[test]
    fn test_readout_packs_two_records() {
        let board = MockBoard::new();
        for tick in 0..3u16 {
            board.push_log_record(0, tick, [tick as u8, 0, 0, 0]);
        }
        let state = board.lock();
        let replies = board.readout(&state, &3u32.to_le_bytes());
        let packets: Vec<Vec<u8>> = replies
            .into_iter()
            .map(|r| match r {
                Reply::Notify(p) | Reply::Read(p) => p,
            })
            .collect();
        assert_eq!(packets[0].len(), 2 + 2 * LOG_RECORD_SIZE);
        assert_eq!(packets[1], progress(1));
        assert_eq!(packets[2].len(), 2 + LOG_RECORD_SIZE);
        assert_eq!(packets.last(), Some(&progress(0)));
    }

    #[test]
    fn test_disconnected_write_fails() {
        let board = MockBoard::new();
        board.disconnect();
        assert!(board.write(&[0x02, 0x01, 0x01]).is_err());
        board.restore_link();
        assert!(board.write(&[0x02, 0x01, 0x01]).is_ok());
    }
}
