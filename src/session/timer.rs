//! Firmware timers
//!
//! A timer fires every `period_ms` for `repeat` rounds (or forever). Its body
//! is a recorded command list bound to the timer's fire signal through event
//! entries, so the board runs it without host involvement.

use serde::{Deserialize, Serialize};

use super::event;
use crate::backend::Correlator;
use crate::error::{Result, SensorError};
use crate::pipeline::graph::TimerRecord;
use crate::protocol::constants::*;
use crate::protocol::{Command, SignalTag};

/// Timer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSpec {
    pub period_ms: u32,
    /// Number of rounds; `None` repeats forever
    pub repeat: Option<u16>,
    /// Fire once immediately on start instead of after the first period
    pub immediate: bool,
}

impl TimerSpec {
    pub fn every(period_ms: u32) -> Self {
        Self {
            period_ms,
            repeat: None,
            immediate: false,
        }
    }

    pub fn times(mut self, repeat: u16) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    fn repeat_wire(&self) -> u16 {
        self.repeat.unwrap_or(TIMER_REPEAT_FOREVER)
    }

    /// `[0x0C, 0x02, period u32, repeat u16, immediate]`
    pub fn create(&self) -> Command {
        let mut payload = self.period_ms.to_le_bytes().to_vec();
        payload.extend_from_slice(&self.repeat_wire().to_le_bytes());
        payload.push(u8::from(self.immediate));
        Command::new(MODULE_TIMER, TIMER_CREATE, payload)
    }

    pub fn validate(&self) -> Result<()> {
        if self.period_ms == 0 {
            return Err(SensorError::InvalidConfig(
                "timer period must be greater than zero".to_string(),
            ));
        }
        if self.repeat == Some(TIMER_REPEAT_FOREVER) {
            return Err(SensorError::InvalidConfig(format!(
                "repeat count {} is reserved for repeat-forever",
                TIMER_REPEAT_FOREVER
            )));
        }
        Ok(())
    }
}

/// Handle to a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduledTask {
    id: u8,
}

impl ScheduledTask {
    pub(crate) fn new(id: u8) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn start_command(&self) -> Command {
        Command::new(MODULE_TIMER, TIMER_START, vec![self.id])
    }

    pub fn stop_command(&self) -> Command {
        Command::new(MODULE_TIMER, TIMER_STOP, vec![self.id])
    }

    pub fn remove_command(&self) -> Command {
        remove(self.id)
    }
}

/// Signal raised each time timer `id` fires
pub fn fired(id: u8) -> SignalTag {
    SignalTag::indexed(MODULE_TIMER, TIMER_NOTIFY, id)
}

pub fn remove(id: u8) -> Command {
    Command::new(MODULE_TIMER, TIMER_REMOVE, vec![id])
}

/// Create the timer and program its body; on failure nothing is left behind
pub async fn create(
    correlator: &Correlator,
    spec: &TimerSpec,
    body: &[Command],
) -> Result<TimerRecord> {
    spec.validate()?;
    let id = correlator.allocate(spec.create(), "timer").await?;
    let event_ids = match event::program(correlator, fired(id), body).await {
        Ok(ids) => ids,
        Err(e) => {
            if let Err(cleanup) = correlator.send(remove(id)).wait().await {
                tracing::warn!("Failed to remove timer {}: {}", id, cleanup);
            }
            return Err(e);
        }
    };
    tracing::info!(
        "Scheduled timer {} every {}ms with {} command(s)",
        id,
        spec.period_ms,
        body.len()
    );
    Ok(TimerRecord {
        id,
        period_ms: spec.period_ms,
        repeat: spec.repeat_wire(),
        event_ids,
    })
}

/// Remove a timer's events and the timer itself
pub async fn destroy(correlator: &Correlator, record: &TimerRecord) -> Result<()> {
    event::remove_all(correlator, &record.event_ids).await;
    correlator.send(remove(record.id)).wait().await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_layout() {
        let spec = TimerSpec::every(1000).times(5).immediate();
        assert_eq!(
            spec.create().encode(),
            vec![0x0C, 0x02, 0xE8, 0x03, 0x00, 0x00, 0x05, 0x00, 0x01]
        );
        assert_eq!(
            TimerSpec::every(500).create().encode(),
            vec![0x0C, 0x02, 0xF4, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0x00]
        );
    }

    #[test]
    fn test_rejects_zero_period() {
        assert!(TimerSpec::every(0).validate().is_err());
        assert!(TimerSpec::every(10).times(0xFFFF).validate().is_err());
    }

    #[test]
    fn test_task_commands() {
        let task = ScheduledTask::new(3);
        assert_eq!(task.start_command().encode(), vec![0x0C, 0x03, 0x03]);
        assert_eq!(task.stop_command().encode(), vec![0x0C, 0x04, 0x03]);
        assert_eq!(task.remove_command().encode(), vec![0x0C, 0x05, 0x03]);
    }
}
