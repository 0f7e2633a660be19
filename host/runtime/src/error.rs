//! Error types for the extension host runtime.

use std::time::Duration;

use thiserror::Error;

use crate::command::CommandId;
use crate::lifecycle::LifecycleState;

/// Errors that can occur in the extension host runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A property or schema operation failed.
    #[error(transparent)]
    Property(#[from] exthost_core::Error),

    /// The operation is not permitted in the instance's current phase.
    #[error("{operation} not permitted for '{extension}' in state {state}")]
    LifecycleViolation {
        extension: String,
        state: LifecycleState,
        operation: &'static str,
    },

    /// No result arrived before the send timeout.
    #[error("command {id} timed out after {after:?}")]
    Timeout { id: CommandId, after: Duration },

    /// The issuing instance was torn down while waiting.
    #[error("command {id} cancelled")]
    Cancelled { id: CommandId },

    /// A result arrived for an id that was already resolved.
    #[error("duplicate result for command {id}")]
    DuplicateResult { id: CommandId },

    /// A result arrived for an id that was never pending.
    #[error("no pending command with id {id}")]
    UnknownCorrelation { id: CommandId },

    /// A caller-supplied id is already pending.
    #[error("command id already pending: {id}")]
    DuplicateId { id: CommandId },

    /// No destination could be resolved for a command.
    #[error("no route for command '{command}' from {from}")]
    NoRoute { from: String, command: String },

    /// An extension with the given name was not found.
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    /// An extension with the given name is already registered.
    #[error("extension already registered: {0}")]
    ExtensionAlreadyRegistered(String),

    /// The runtime is at its extension limit.
    #[error("maximum extensions reached ({0})")]
    TooManyExtensions(usize),

    /// A user callback reported a failure.
    #[error("callback failed: {message}")]
    Callback { message: String },

    /// The channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A JSON document could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Build a callback failure from any message.
    pub fn callback(message: impl Into<String>) -> Self {
        RuntimeError::Callback {
            message: message.into(),
        }
    }

    /// True for errors produced by the router's result-matching contract
    /// (`Timeout`, `Cancelled`, `DuplicateResult`, `UnknownCorrelation`).
    pub fn is_correlation(&self) -> bool {
        matches!(
            self,
            RuntimeError::Timeout { .. }
                | RuntimeError::Cancelled { .. }
                | RuntimeError::DuplicateResult { .. }
                | RuntimeError::UnknownCorrelation { .. }
        )
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
