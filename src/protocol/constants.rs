//! Protocol constants
//!
//! Module identifiers and register numbers for the board's register protocol.
//! Every command is `[module][register][payload...]`; a read sets bit 0x80 on
//! the register.

// ============================================================================
// Module identifiers
// ============================================================================

pub const MODULE_SWITCH: u8 = 0x01;
pub const MODULE_LED: u8 = 0x02;
pub const MODULE_ACCELEROMETER: u8 = 0x03;
pub const MODULE_TEMPERATURE: u8 = 0x04;
pub const MODULE_DATA_PROCESSOR: u8 = 0x09;
pub const MODULE_EVENT: u8 = 0x0A;
pub const MODULE_LOGGING: u8 = 0x0B;
pub const MODULE_TIMER: u8 = 0x0C;
pub const MODULE_MACRO: u8 = 0x0F;
pub const MODULE_BAROMETER: u8 = 0x12;
pub const MODULE_SENSOR_FUSION: u8 = 0x19;

/// Modules probed during discovery, in probe order
pub const KNOWN_MODULES: &[u8] = &[
    MODULE_SWITCH,
    MODULE_LED,
    MODULE_ACCELEROMETER,
    MODULE_TEMPERATURE,
    MODULE_DATA_PROCESSOR,
    MODULE_EVENT,
    MODULE_LOGGING,
    MODULE_TIMER,
    MODULE_MACRO,
    MODULE_BAROMETER,
    MODULE_SENSOR_FUSION,
];

/// Bit set on a register to request a read
pub const READ_BIT: u8 = 0x80;

/// Module info register (always read)
pub const REG_MODULE_INFO: u8 = 0x00;

/// Sentinel for "no sub-identifier" in a wire tag
pub const NO_INDEX: u8 = 0xFF;

/// Largest command that fits one write
pub const MAX_COMMAND_LEN: usize = 20;

/// Largest payload after the module/register header
pub const MAX_NOTIFY_PAYLOAD: usize = MAX_COMMAND_LEN - 2;

// ============================================================================
// Data processor (0x09)
// ============================================================================

pub const DP_ADD: u8 = 0x02;
pub const DP_NOTIFY: u8 = 0x03;
pub const DP_STATE: u8 = 0x04;
pub const DP_PARAMETER: u8 = 0x05;
pub const DP_REMOVE: u8 = 0x06;
pub const DP_NOTIFY_ENABLE: u8 = 0x07;

// ============================================================================
// Event (0x0A)
// ============================================================================

pub const EVENT_ENTRY: u8 = 0x02;
pub const EVENT_PARAMETERS: u8 = 0x03;
pub const EVENT_REMOVE: u8 = 0x04;

// ============================================================================
// Logging (0x0B)
// ============================================================================

pub const LOG_ENABLE: u8 = 0x01;
pub const LOG_TRIGGER: u8 = 0x02;
pub const LOG_REMOVE: u8 = 0x03;
pub const LOG_LENGTH: u8 = 0x05;
pub const LOG_READOUT: u8 = 0x06;
pub const LOG_READOUT_NOTIFY: u8 = 0x07;
pub const LOG_READOUT_PROGRESS: u8 = 0x08;
pub const LOG_REMOVE_ENTRIES: u8 = 0x09;
pub const LOG_CIRCULAR_BUFFER: u8 = 0x0B;

/// Bytes of payload carried by one log record
pub const LOG_RECORD_PAYLOAD: usize = 4;

/// Size of one readout record: id, tick (u16), payload
pub const LOG_RECORD_SIZE: usize = 1 + 2 + LOG_RECORD_PAYLOAD;

// ============================================================================
// Timer (0x0C)
// ============================================================================

pub const TIMER_CREATE: u8 = 0x02;
pub const TIMER_START: u8 = 0x03;
pub const TIMER_STOP: u8 = 0x04;
pub const TIMER_REMOVE: u8 = 0x05;
pub const TIMER_NOTIFY: u8 = 0x06;

/// Repeat count meaning "run forever"
pub const TIMER_REPEAT_FOREVER: u16 = 0xFFFF;

// ============================================================================
// Macro (0x0F)
// ============================================================================

pub const MACRO_BEGIN: u8 = 0x02;
pub const MACRO_ADD_COMMAND: u8 = 0x03;
pub const MACRO_END: u8 = 0x04;
pub const MACRO_EXECUTE: u8 = 0x05;
pub const MACRO_ERASE_ALL: u8 = 0x08;
pub const MACRO_ADD_PARTIAL: u8 = 0x09;
pub const MACRO_REMOVE: u8 = 0x0A;

/// Longest command a single add-command write can carry
pub const MACRO_MAX_INLINE: usize = MAX_COMMAND_LEN - 2;

/// Bytes sent ahead in an add-partial write
pub const MACRO_PARTIAL_LEN: usize = 2;
