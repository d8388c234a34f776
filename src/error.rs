//! Error handling for sensorgraph-rs
//!
//! This module defines the error taxonomy shared by the codec, the correlator,
//! the route compiler and the recorder, plus a Result alias for use
//! throughout the crate.

use thiserror::Error;

/// Main error type for sensorgraph-rs operations
#[derive(Error, Debug)]
pub enum SensorError {
    /// The transport reported a disconnect; every pending operation fails with this
    #[error("Transport disconnected")]
    TransportDisconnected,

    /// A pending operation's deadline elapsed before a response arrived
    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    /// A firmware table (processors, loggers, timers, events, macros) is full
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A named node, route or handle was referenced after removal or never existed
    #[error("Not found: {0}")]
    NotFound(String),

    /// The connected firmware does not support the requested capability
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Inbound bytes did not match any known framing
    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// A route description or processor configuration is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation is not legal in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Errors reported by the transport implementation itself
    #[error("Transport error: {0}")]
    Transport(String),

    /// Errors related to graph descriptor encoding/decoding
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SensorError>,
    },
}

impl SensorError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SensorError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>) -> Self {
        SensorError::Timeout {
            operation: operation.into(),
        }
    }

    /// Strip any context wrappers and return the underlying error
    pub fn root(&self) -> &SensorError {
        match self {
            SensorError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), SensorError::Timeout { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.root(), SensorError::TransportDisconnected)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), SensorError::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), SensorError::Unsupported(_))
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self.root(), SensorError::ResourceExhausted(_))
    }
}

impl From<serde_json::Error> for SensorError {
    fn from(err: serde_json::Error) -> Self {
        SensorError::Serialization(err.to_string())
    }
}

/// Result type alias for sensorgraph-rs operations
pub type Result<T> = std::result::Result<T, SensorError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
