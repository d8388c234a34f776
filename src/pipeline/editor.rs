//! Live processor editing
//!
//! [`ProcessorEditor`] is obtained from `Device::edit(name, kind)`. Setters
//! change a local copy of the processor's configuration; `commit` re-sends the
//! full configuration with `[0x09, 0x05, id, config...]`. The name is resolved
//! again at commit, so an editor for a removed route fails with `NotFound`.

use crate::device::Device;
use crate::error::{Result, SensorError};
use crate::protocol::{
    ComparatorOp, Command, MathOp, PassthroughMode, ProcessorConfig, ProcessorKind, Signal,
};
use crate::protocol::constants::*;

/// Editable copy of a live processor's configuration
pub struct ProcessorEditor {
    device: Device,
    name: String,
    processor_id: u8,
    input: Signal,
    config: ProcessorConfig,
}

impl ProcessorEditor {
    pub(crate) fn new(
        device: Device,
        name: String,
        processor_id: u8,
        input: Signal,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            device,
            name,
            processor_id,
            input,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processor_id(&self) -> u8 {
        self.processor_id
    }

    pub fn kind(&self) -> ProcessorKind {
        self.config.kind()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn wrong_kind(&self, wanted: ProcessorKind) -> SensorError {
        SensorError::InvalidConfig(format!(
            "'{}' is a {} processor, not {}",
            self.name,
            self.config.kind(),
            wanted
        ))
    }

    pub fn set_average_size(&mut self, new_size: u8) -> Result<&mut Self> {
        match &mut self.config {
            ProcessorConfig::Average { size, .. } => *size = new_size,
            _ => return Err(self.wrong_kind(ProcessorKind::Average)),
        }
        Ok(self)
    }

    /// New comparison, with `value` in the input signal's units
    pub fn set_comparator(&mut self, new_op: ComparatorOp, value: f32) -> Result<&mut Self> {
        let firmware = self.input.to_firmware(value);
        match &mut self.config {
            ProcessorConfig::Comparator { op, reference, .. } => {
                *op = new_op;
                *reference = firmware;
            }
            _ => return Err(self.wrong_kind(ProcessorKind::Comparator)),
        }
        Ok(self)
    }

    pub fn set_math(&mut self, new_op: MathOp, value: f32) -> Result<&mut Self> {
        let firmware = if new_op.scales_rhs() {
            self.input.to_firmware(value)
        } else {
            value.round() as i32
        };
        match &mut self.config {
            ProcessorConfig::Math { op, rhs, .. } => {
                *op = new_op;
                *rhs = firmware;
            }
            _ => return Err(self.wrong_kind(ProcessorKind::Math)),
        }
        Ok(self)
    }

    pub fn set_delta_magnitude(&mut self, value: f32) -> Result<&mut Self> {
        let firmware = self.input.to_firmware(value).unsigned_abs();
        match &mut self.config {
            ProcessorConfig::Delta { magnitude, .. } => *magnitude = firmware,
            _ => return Err(self.wrong_kind(ProcessorKind::Delta)),
        }
        Ok(self)
    }

    pub fn set_time_limit(&mut self, period_ms: u32) -> Result<&mut Self> {
        match &mut self.config {
            ProcessorConfig::TimeLimit { period, .. } => *period = period_ms,
            _ => return Err(self.wrong_kind(ProcessorKind::TimeLimit)),
        }
        Ok(self)
    }

    pub fn set_passthrough(&mut self, new_mode: PassthroughMode, new_count: u16) -> Result<&mut Self> {
        match &mut self.config {
            ProcessorConfig::Passthrough { mode, count } => {
                *mode = new_mode;
                *count = new_count;
            }
            _ => return Err(self.wrong_kind(ProcessorKind::Passthrough)),
        }
        Ok(self)
    }

    pub fn set_pulse(&mut self, value: f32, new_width: u16) -> Result<&mut Self> {
        let firmware = self.input.to_firmware(value);
        match &mut self.config {
            ProcessorConfig::Pulse {
                threshold, width, ..
            } => {
                *threshold = firmware;
                *width = new_width;
            }
            _ => return Err(self.wrong_kind(ProcessorKind::Pulse)),
        }
        Ok(self)
    }

    /// Full reconfiguration command for the current copy
    pub fn command(&self) -> Command {
        let mut payload = vec![self.processor_id];
        payload.extend(self.config.encode());
        Command::new(MODULE_DATA_PROCESSOR, DP_PARAMETER, payload)
    }

    /// Re-send the full configuration
    pub async fn commit(&self) -> Result<()> {
        self.config.validate(&self.input)?;
        self.device
            .write_processor_config(&self.name, self.processor_id, self.command(), self.config.clone())
            .await
    }

    /// Clear the processor's internal state (sum, count, average window or passthrough budget)
    pub async fn reset_state(&self) -> Result<()> {
        let state = self.config.reset_state().ok_or_else(|| {
            SensorError::Unsupported(format!(
                "{} processor '{}' has no resettable state",
                self.config.kind(),
                self.name
            ))
        })?;
        let mut payload = vec![self.processor_id];
        payload.extend(state);
        let command = Command::new(MODULE_DATA_PROCESSOR, DP_STATE, payload);
        self.device
            .write_processor_state(&self.name, self.processor_id, command)
            .await
    }
}

impl std::fmt::Debug for ProcessorEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorEditor")
            .field("name", &self.name)
            .field("processor_id", &self.processor_id)
            .field("config", &self.config)
            .finish()
    }
}
