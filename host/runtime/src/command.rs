//! Commands and command results.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque correlation identifier pairing a command with its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(String);

impl CommandId {
    /// Create a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CommandId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Who issued a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// An external transport request.
    Ingress,
    /// Another extension instance.
    Extension(String),
}

impl Source {
    /// The issuing extension's name, if any.
    pub fn extension(&self) -> Option<&str> {
        match self {
            Source::Extension(name) => Some(name),
            Source::Ingress => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Ingress => f.write_str("ingress"),
            Source::Extension(name) => write!(f, "extension '{}'", name),
        }
    }
}

/// A named request with a structured payload.
///
/// `id` is left empty by [`Command::new`]; the router assigns one on send
/// unless the caller supplied it. Commands delivered to `on_cmd` always
/// carry an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: Option<CommandId>,
    pub name: String,
    pub payload: Value,
    pub source: Source,
    /// Explicit destination. When absent the graph decides.
    pub dest: Option<String>,
}

impl Command {
    /// Create a command with an empty payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            payload: Value::Null,
            source: Source::Ingress,
            dest: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_id(mut self, id: impl Into<CommandId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    /// Read one field of an object payload.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }
}

/// Outcome status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    Ok,
    Error,
}

/// The response to exactly one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub correlation_id: CommandId,
    pub status: StatusCode,
    pub payload: Value,
}

impl CommandResult {
    /// Create a result answering `cmd`.
    ///
    /// A command that was never sent has no id; its result gets a fresh one
    /// and will not match any waiter.
    pub fn new(status: StatusCode, cmd: &Command) -> Self {
        Self {
            correlation_id: cmd.id.clone().unwrap_or_default(),
            status,
            payload: Value::Null,
        }
    }

    pub fn ok(cmd: &Command, payload: Value) -> Self {
        Self::new(StatusCode::Ok, cmd).with_payload(payload)
    }

    pub fn error(cmd: &Command, message: impl Into<String>) -> Self {
        Self::new(StatusCode::Error, cmd).with_payload(Value::String(message.into()))
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }
}
