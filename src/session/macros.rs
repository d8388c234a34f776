//! Firmware-stored macros
//!
//! A macro is a command list the board stores and replays on request or at
//! boot. The body is captured with a [`Recorder`](super::Recorder); nothing is
//! written until the recording is committed as
//! `[begin] [add cmd]... [end]`.

use crate::backend::Correlator;
use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::Command;

/// A captured macro body waiting to be written
#[derive(Debug, Clone, PartialEq)]
pub struct MacroRecording {
    pub exec_on_boot: bool,
    pub commands: Vec<Command>,
}

impl MacroRecording {
    pub fn new(exec_on_boot: bool, commands: Vec<Command>) -> Self {
        Self {
            exec_on_boot,
            commands,
        }
    }

    /// Commands following the begin reply, in write order
    pub fn body_writes(&self) -> Vec<Command> {
        let mut writes = Vec::with_capacity(self.commands.len() + 1);
        for command in &self.commands {
            writes.extend(add_command(command));
        }
        writes.push(Command::new(MODULE_MACRO, MACRO_END, Vec::new()));
        writes
    }
}

pub fn begin(exec_on_boot: bool) -> Command {
    Command::new(MODULE_MACRO, MACRO_BEGIN, vec![u8::from(exec_on_boot)])
}

/// Framing for one stored command; long commands send their first bytes ahead
pub fn add_command(command: &Command) -> Vec<Command> {
    let bytes = command.encode();
    if bytes.len() > MACRO_MAX_INLINE {
        let (head, tail) = bytes.split_at(MACRO_PARTIAL_LEN);
        vec![
            Command::new(MODULE_MACRO, MACRO_ADD_PARTIAL, head.to_vec()),
            Command::new(MODULE_MACRO, MACRO_ADD_COMMAND, tail.to_vec()),
        ]
    } else {
        vec![Command::new(MODULE_MACRO, MACRO_ADD_COMMAND, bytes)]
    }
}

pub fn execute(id: u8) -> Command {
    Command::new(MODULE_MACRO, MACRO_EXECUTE, vec![id])
}

pub fn remove(id: u8) -> Command {
    Command::new(MODULE_MACRO, MACRO_REMOVE, vec![id])
}

pub fn erase_all() -> Command {
    Command::new(MODULE_MACRO, MACRO_ERASE_ALL, Vec::new())
}

/// Write a recording to the board and return its macro id
pub async fn commit(correlator: &Correlator, recording: &MacroRecording) -> Result<u8> {
    let id = correlator
        .allocate(begin(recording.exec_on_boot), "macro")
        .await?;
    for write in recording.body_writes() {
        if let Err(e) = correlator.send(write).wait().await {
            tracing::warn!("Macro {} write failed, removing it: {}", id, e);
            if let Err(cleanup) = correlator.send(remove(id)).wait().await {
                tracing::warn!("Failed to remove macro {}: {}", id, cleanup);
            }
            return Err(e);
        }
    }
    tracing::info!(
        "Stored macro {} with {} command(s)",
        id,
        recording.commands.len()
    );
    Ok(id)
}
