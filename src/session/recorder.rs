//! Command recording
//!
//! Sensor helpers produce plain [`Command`] values; what happens to them is
//! decided by the [`CommandSink`] they are submitted to. The device writes
//! them through the correlator. A [`Recorder`] buffers them and acknowledges
//! immediately, which is how macro, timer and reaction bodies are captured.

use std::sync::Mutex;

use crate::backend::Ack;
use crate::protocol::Command;

/// Destination for commands issued by user code
pub trait CommandSink: Send + Sync {
    fn submit(&self, command: Command) -> Ack;
}

/// Buffers submitted commands instead of sending them
#[derive(Debug, Default)]
pub struct Recorder {
    commands: Mutex<Vec<Command>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The recorded commands in submission order
    pub fn into_commands(self) -> Vec<Command> {
        match self.commands.into_inner() {
            Ok(commands) => commands,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CommandSink for Recorder {
    fn submit(&self, command: Command) -> Ack {
        match self.commands.lock() {
            Ok(mut commands) => commands.push(command),
            Err(poisoned) => poisoned.into_inner().push(command),
        }
        Ack::done()
    }
}

/// Run `body` against a fresh recorder and return what it submitted
pub fn record<F>(body: F) -> Vec<Command>
where
    F: FnOnce(&dyn CommandSink),
{
    let recorder = Recorder::new();
    body(&recorder);
    recorder.into_commands()
}
