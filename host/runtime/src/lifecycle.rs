//! Lifecycle state machine for extension instances.
//!
//! Phases are strictly ordered:
//!
//! ```text
//! Unconfigured → Configuring → Configured → Initializing → Initialized
//!   → Started ⇄ HandlingCommand → Stopping → Deinitializing → Deinited
//! ```
//!
//! `Fatal` is reachable from any non-terminal state and leads only to
//! `Deinitializing`. No phase is ever re-entered, except the transient
//! `HandlingCommand` sub-state of `Started`.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{Result, RuntimeError};

/// State of an extension instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unconfigured,
    Configuring,
    Configured,
    Initializing,
    Initialized,
    Started,
    /// A command callback is running.
    HandlingCommand,
    Stopping,
    Deinitializing,
    Deinited,
    /// A phase callback failed; the instance is being torn down.
    Fatal,
}

impl LifecycleState {
    fn rank(self) -> u8 {
        match self {
            LifecycleState::Unconfigured => 0,
            LifecycleState::Configuring => 1,
            LifecycleState::Configured => 2,
            LifecycleState::Initializing => 3,
            LifecycleState::Initialized => 4,
            LifecycleState::Started | LifecycleState::HandlingCommand => 5,
            LifecycleState::Stopping => 6,
            LifecycleState::Fatal => 7,
            LifecycleState::Deinitializing => 8,
            LifecycleState::Deinited => 9,
        }
    }

    fn next_phase(self) -> Option<LifecycleState> {
        use LifecycleState::*;
        match self {
            Unconfigured => Some(Configuring),
            Configuring => Some(Configured),
            Configured => Some(Initializing),
            Initializing => Some(Initialized),
            Initialized => Some(Started),
            Started => Some(Stopping),
            Stopping => Some(Deinitializing),
            Deinitializing => Some(Deinited),
            HandlingCommand | Deinited | Fatal => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (Started, HandlingCommand) | (HandlingCommand, Started) => true,
            (Fatal, Deinitializing) => true,
            (from, Fatal) => !matches!(from, Fatal | Deinitializing | Deinited),
            (from, to) => from.next_phase() == Some(to),
        }
    }

    /// Terminal state: nothing follows.
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Deinited
    }

    /// The instance accepts inbound commands.
    pub fn accepts_commands(self) -> bool {
        matches!(
            self,
            LifecycleState::Started | LifecycleState::HandlingCommand
        )
    }

    /// Properties may be read.
    pub fn allows_property_read(self) -> bool {
        self != LifecycleState::Unconfigured && !self.is_terminal()
    }

    /// Individual properties may be written. Mutation starts once
    /// configuration has completed.
    pub fn allows_property_write(self) -> bool {
        self.rank() >= LifecycleState::Configured.rank() && !self.is_terminal()
    }

    /// Bulk property loading is only legal while configuring.
    pub fn allows_property_load(self) -> bool {
        self == LifecycleState::Configuring
    }

    /// Commands may be sent and results returned.
    pub fn allows_messaging(self) -> bool {
        self.rank() >= LifecycleState::Initializing.rank()
            && self != LifecycleState::Fatal
            && !self.is_terminal()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Configuring => "configuring",
            LifecycleState::Configured => "configured",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Started => "started",
            LifecycleState::HandlingCommand => "handling_command",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Deinitializing => "deinitializing",
            LifecycleState::Deinited => "deinited",
            LifecycleState::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// The writer side of one instance's lifecycle.
///
/// The current state is published on a watch channel so handles and the
/// router can observe it without touching the instance.
#[derive(Debug)]
pub struct Lifecycle {
    extension: String,
    tx: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    /// Create a lifecycle in `Unconfigured`.
    pub fn new(extension: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Unconfigured);
        Self {
            extension: extension.into(),
            tx,
        }
    }

    /// The current state.
    pub fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// `LifecycleViolation` if the transition is not legal.
    pub fn advance(&self, next: LifecycleState) -> Result<()> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(RuntimeError::LifecycleViolation {
                extension: self.extension.clone(),
                state: current,
                operation: "transition",
            });
        }
        tracing::debug!(extension = %self.extension, from = %current, to = %next, "lifecycle transition");
        self.tx.send_replace(next);
        Ok(())
    }

    /// Fail with `LifecycleViolation` unless `allowed(current)` holds.
    pub fn guard(
        &self,
        operation: &'static str,
        allowed: impl Fn(LifecycleState) -> bool,
    ) -> Result<()> {
        let state = self.current();
        if allowed(state) {
            Ok(())
        } else {
            Err(RuntimeError::LifecycleViolation {
                extension: self.extension.clone(),
                state,
                operation,
            })
        }
    }
}
