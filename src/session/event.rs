//! Event entries
//!
//! An event binds a recorded command to a firmware signal: whenever the source
//! fires, the board replays the command itself. Each command takes one entry
//! `[0x0A, 0x02, src_mod, src_reg, src_idx, cmd_mod, cmd_reg, len]` followed by
//! its payload in `[0x0A, 0x03, payload...]`.

use crate::backend::Correlator;
use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::{Command, SignalTag};

/// Entry command for `command` triggered by `source`
pub fn entry(source: SignalTag, command: &Command) -> Command {
    Command::new(
        MODULE_EVENT,
        EVENT_ENTRY,
        vec![
            source.module,
            source.register,
            source.index_byte(),
            command.module,
            command.register,
            command.payload.len() as u8,
        ],
    )
}

pub fn parameters(command: &Command) -> Command {
    Command::new(MODULE_EVENT, EVENT_PARAMETERS, command.payload.clone())
}

pub fn remove(id: u8) -> Command {
    Command::new(MODULE_EVENT, EVENT_REMOVE, vec![id])
}

/// Program one event entry per command; on failure the entries created so far are removed
pub async fn program(
    correlator: &Correlator,
    source: SignalTag,
    commands: &[Command],
) -> Result<Vec<u8>> {
    let mut ids = Vec::with_capacity(commands.len());
    for command in commands {
        match program_one(correlator, source, command).await {
            Ok(id) => ids.push(id),
            Err(e) => {
                tracing::warn!(
                    "Event programming for {} failed, removing {} entr(ies): {}",
                    source,
                    ids.len(),
                    e
                );
                remove_all(correlator, &ids).await;
                return Err(e);
            }
        }
    }
    Ok(ids)
}

async fn program_one(correlator: &Correlator, source: SignalTag, command: &Command) -> Result<u8> {
    let id = correlator.allocate(entry(source, command), "event").await?;
    if !command.payload.is_empty() {
        if let Err(e) = correlator.send(parameters(command)).wait().await {
            if let Err(cleanup) = correlator.send(remove(id)).wait().await {
                tracing::warn!("Failed to remove event {}: {}", id, cleanup);
            }
            return Err(e);
        }
    }
    tracing::debug!("Event {} bound {} to {}", id, command, source);
    Ok(id)
}

/// Best-effort removal, newest first
pub async fn remove_all(correlator: &Correlator, ids: &[u8]) {
    for id in ids.iter().rev() {
        if let Err(e) = correlator.send(remove(*id)).wait().await {
            tracing::warn!("Failed to remove event {}: {}", id, e);
        }
    }
}
