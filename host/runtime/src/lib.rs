//! # Extension Host Runtime
//!
//! The runtime hosts **extensions**: independently written units of logic
//! that each own a property store and a lifecycle, and that talk to each
//! other only by sending commands and returning results.
//!
//! ## Core Concepts
//!
//! ### Extensions
//!
//! An [`Extension`] is a set of callbacks. The runtime drives each instance
//! through a strictly ordered lifecycle and calls the matching callback in
//! each phase:
//!
//! ```text
//! Unconfigured → Configuring → Configured → Initializing → Initialized
//!   → Started ⇄ HandlingCommand → Stopping → Deinitializing → Deinited
//! ```
//!
//! Every instance runs in its own task. Callbacks for one instance never
//! overlap, but a callback may await timers or nested commands without
//! holding up other instances.
//!
//! ### The Environment
//!
//! Callbacks receive an [`ExtensionEnv`]: the instance's properties plus
//! `send_cmd` and `return_result`. Every operation on it checks the current
//! phase and fails with [`RuntimeError::LifecycleViolation`] when it is not
//! permitted.
//!
//! ### Commands and Results
//!
//! A [`Command`] carries a name, a JSON payload and a correlation id. The
//! [`Router`] delivers it to the destination's mailbox (an explicit `dest`
//! or the graph edge wired with [`Runtime::connect`]) and parks the sender
//! until exactly one [`CommandResult`] with the same id arrives. Results
//! for unknown or already settled ids are dropped and counted.
//!
//! ## Example
//!
//! ```ignore
//! use exthost_runtime::{Command, CommandResult, Extension, ExtensionEnv, Runtime};
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl Extension for Greeter {
//!     async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> exthost_runtime::Result<()> {
//!         let reply = env.send_cmd(Command::new("hello")).await?;
//!         env.return_result(CommandResult::ok(&cmd, reply.payload)).await
//!     }
//! }
//!
//! let mut runtime = Runtime::new(RuntimeConfig::default());
//! runtime.register("greeter", Greeter, None).await?;
//! runtime.register("responder", Responder, None).await?;
//! runtime.connect("greeter", "hello", "responder").await;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         Runtime                           │
//! │   ┌────────────┐        ┌────────┐        ┌────────────┐  │
//! │   │ instance A │──cmd──▶│ Router │──cmd──▶│ instance B │  │
//! │   │  (task)    │◀─res───│pending │◀─res───│  (task)    │  │
//! │   │ properties │        │ graph  │        │ properties │  │
//! │   └────────────┘        └────────┘        └────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod env;
pub mod error;
pub mod extension;
mod instance;
pub mod lifecycle;
pub mod router;
pub mod runtime;

pub use command::{Command, CommandId, CommandResult, Source, StatusCode};
pub use env::ExtensionEnv;
pub use error::{Result, RuntimeError};
pub use extension::Extension;
pub use instance::Outcome;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use router::{Router, RouterStats};
pub use runtime::{ExtensionHandle, Runtime, RuntimeConfig, ShutdownReport};

pub use exthost_core::{PropertyValue, Schema, ValueType};
