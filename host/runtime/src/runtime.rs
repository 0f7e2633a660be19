//! Runtime coordinator for extension instances.
//!
//! The Runtime is responsible for:
//! - Compiling and holding interface schemas
//! - Spawning one task per extension instance
//! - Wiring the command graph
//! - Stopping instances and reporting how they ended

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use exthost_core::{PropertyStore, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::command::{Command, CommandResult};
use crate::env::ExtensionEnv;
use crate::error::{Result, RuntimeError};
use crate::extension::Extension;
use crate::instance::{Control, Instance, Outcome};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::router::{Mailbox, Router};

/// Configuration for the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default wait for a command result.
    pub send_timeout_ms: u64,
    /// How long an in-flight handler may run after stop before its pending
    /// sends are cancelled.
    pub stop_grace_ms: u64,
    /// Queued commands per instance.
    pub mailbox_capacity: usize,
    /// Settled ids remembered for duplicate detection.
    pub resolved_history: usize,
    /// Maximum number of concurrent instances.
    pub max_extensions: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 10_000,
            stop_grace_ms: 5_000,
            mailbox_capacity: 256,
            resolved_history: 1024,
            max_extensions: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Handle for observing a running instance.
#[derive(Debug, Clone)]
pub struct ExtensionHandle {
    name: String,
    state: watch::Receiver<LifecycleState>,
}

impl ExtensionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Wait until the instance reaches `target`.
    ///
    /// Returns the state actually reached, which is `Deinited` if the
    /// instance finished without passing through `target` again.
    pub async fn wait_for(&self, target: LifecycleState) -> Result<LifecycleState> {
        let mut rx = self.state.clone();
        let reached = rx
            .wait_for(|s| *s == target || s.is_terminal())
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(*reached)
    }
}

struct RegisteredExtension {
    handle: ExtensionHandle,
    control: mpsc::Sender<Control>,
    task: JoinHandle<Outcome>,
}

/// How each instance ended after [`Runtime::shutdown`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcomes: BTreeMap<String, Outcome>,
}

impl ShutdownReport {
    /// Names of instances that ended in a fatal state.
    pub fn fatal(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == Outcome::Fatal)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes.values().all(|o| *o == Outcome::Clean)
    }
}

/// The extension runtime.
///
/// # Example
///
/// ```ignore
/// let mut runtime = Runtime::new(RuntimeConfig::default());
/// let handle = runtime.register("responder", Responder, None).await?;
/// handle.wait_for(LifecycleState::Started).await?;
///
/// let result = runtime.send(Command::new("hello").with_dest("responder")).await?;
/// runtime.shutdown().await;
/// ```
pub struct Runtime {
    config: RuntimeConfig,
    router: Arc<Router>,
    schemas: BTreeMap<String, Arc<Schema>>,
    extensions: BTreeMap<String, RegisteredExtension>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        let router = Arc::new(Router::new(config.resolved_history));
        Self {
            config,
            router,
            schemas: BTreeMap::new(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The shared command router.
    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Compile `raw` and register it as interface `interface`.
    pub fn register_schema(&mut self, interface: &str, raw: &Value) -> Result<Arc<Schema>> {
        let schema = Arc::new(Schema::compile(raw)?);
        self.schemas.insert(interface.to_string(), schema.clone());
        Ok(schema)
    }

    pub fn schema(&self, interface: &str) -> Option<Arc<Schema>> {
        self.schemas.get(interface).cloned()
    }

    /// Register an extension instance under `name` and start it.
    ///
    /// The instance runs in its own task and proceeds through configure,
    /// init and start on its own; use the returned handle to wait for it.
    /// When `interface` names a registered schema, the instance's
    /// properties and commands are validated against it.
    pub async fn register<E: Extension>(
        &mut self,
        name: &str,
        extension: E,
        interface: Option<&str>,
    ) -> Result<ExtensionHandle> {
        if self.extensions.len() >= self.config.max_extensions {
            return Err(RuntimeError::TooManyExtensions(self.config.max_extensions));
        }
        if self.extensions.contains_key(name) {
            return Err(RuntimeError::ExtensionAlreadyRegistered(name.to_string()));
        }
        let schema = match interface {
            Some(interface) => Some(self.schema(interface).ok_or_else(|| {
                exthost_core::Error::InvalidSchema {
                    message: format!("interface '{}' is not registered", interface),
                }
            })?),
            None => None,
        };

        let lifecycle = Lifecycle::new(name);
        let state = lifecycle.subscribe();
        let (tx, mailbox) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(4);

        self.router
            .attach(
                name,
                Mailbox {
                    tx,
                    state: state.clone(),
                    schema: schema.clone(),
                },
            )
            .await?;

        let properties = match schema {
            Some(schema) => PropertyStore::with_schema(schema),
            None => PropertyStore::new(),
        };
        let env = ExtensionEnv::new(
            name,
            properties,
            lifecycle,
            self.router.clone(),
            self.config.send_timeout(),
        );
        let instance = Instance::new(
            Box::new(extension),
            env,
            mailbox,
            control_rx,
            self.router.clone(),
            self.config.stop_grace(),
        );

        let task = tokio::spawn(instance.run());
        let handle = ExtensionHandle {
            name: name.to_string(),
            state,
        };
        self.extensions.insert(
            name.to_string(),
            RegisteredExtension {
                handle: handle.clone(),
                control: control_tx,
                task,
            },
        );
        tracing::debug!(extension = name, ?interface, "extension registered");
        Ok(handle)
    }

    /// Route commands named `command` issued by `from` to `to`.
    pub async fn connect(&self, from: &str, command: &str, to: &str) {
        self.router.connect(from, command, to).await;
    }

    /// Send a command from outside any extension, with the default timeout.
    pub async fn send(&self, cmd: Command) -> Result<CommandResult> {
        self.router.send(cmd, self.config.send_timeout()).await
    }

    pub fn handle(&self, name: &str) -> Option<ExtensionHandle> {
        self.extensions.get(name).map(|e| e.handle.clone())
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.keys().map(String::as_str).collect()
    }

    /// Stop one instance and wait for it to reach `Deinited`.
    pub async fn stop_extension(&mut self, name: &str) -> Result<Outcome> {
        let registered = self
            .extensions
            .remove(name)
            .ok_or_else(|| RuntimeError::ExtensionNotFound(name.to_string()))?;
        // The instance may have stopped on its own already.
        let _ = registered.control.send(Control::Stop).await;
        Ok(join(name, registered.task).await)
    }

    /// Stop every instance and wait for all of them.
    ///
    /// Instances are stopped one at a time, senders before the extensions
    /// their graph edges lead to, so an in-flight handler can still reach
    /// its peers during the grace period. Cycles fall back to name order.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let mut extensions = std::mem::take(&mut self.extensions);
        let names: Vec<String> = extensions.keys().cloned().collect();
        let order = stop_order(names, &self.router.edges().await);

        let mut report = ShutdownReport::default();
        for name in order {
            let Some(registered) = extensions.remove(&name) else {
                continue;
            };
            // The instance may have stopped on its own already.
            let _ = registered.control.send(Control::Stop).await;
            let outcome = join(&name, registered.task).await;
            report.outcomes.insert(name, outcome);
        }
        tracing::info!(fatal = ?report.fatal(), "runtime shut down");
        report
    }
}

/// Order `names` so that every edge's source comes before its destination.
fn stop_order(mut remaining: Vec<String>, edges: &[(String, String)]) -> Vec<String> {
    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let has_live_sender = |name: &String| {
            edges
                .iter()
                .any(|(from, to)| to == name && from != name && remaining.contains(from))
        };
        let next = remaining
            .iter()
            .position(|name| !has_live_sender(name))
            .unwrap_or(0);
        order.push(remaining.remove(next));
    }
    order
}

async fn join(name: &str, task: JoinHandle<Outcome>) -> Outcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(extension = name, error = %e, "extension task panicked");
            Outcome::Fatal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Responder;

    #[async_trait]
    impl Extension for Responder {
        async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
            env.return_result(CommandResult::ok(&cmd, json!("data received")))
                .await
        }
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: RuntimeConfig = serde_json::from_value(json!({"stop_grace_ms": 10})).unwrap();
        assert_eq!(config.stop_grace(), Duration::from_millis(10));
        assert_eq!(config.send_timeout_ms, RuntimeConfig::default().send_timeout_ms);
    }

    #[tokio::test]
    async fn register_and_send() {
        let mut runtime = Runtime::new(RuntimeConfig::default());
        let handle = runtime.register("responder", Responder, None).await.unwrap();
        assert_eq!(
            handle.wait_for(LifecycleState::Started).await.unwrap(),
            LifecycleState::Started
        );

        let result = runtime
            .send(Command::new("hello").with_dest("responder"))
            .await
            .unwrap();
        assert_eq!(result.payload, json!("data received"));

        let report = runtime.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(handle.state(), LifecycleState::Deinited);
    }

    #[test]
    fn senders_stop_before_their_destinations() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let edge = |a: &str, b: &str| (a.to_string(), b.to_string());

        let order = stop_order(
            names(&["a_responder", "b_proxy", "c_front"]),
            &[edge("c_front", "b_proxy"), edge("b_proxy", "a_responder")],
        );
        assert_eq!(order, names(&["c_front", "b_proxy", "a_responder"]));

        // A cycle still stops everything.
        let order = stop_order(
            names(&["x", "y", "z"]),
            &[edge("x", "y"), edge("y", "x"), edge("z", "z")],
        );
        assert_eq!(order, names(&["z", "x", "y"]));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let mut runtime = Runtime::new(RuntimeConfig::default());
        runtime.register("a", Responder, None).await.unwrap();
        assert!(matches!(
            runtime.register("a", Responder, None).await,
            Err(RuntimeError::ExtensionAlreadyRegistered(_))
        ));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let mut runtime = Runtime::new(RuntimeConfig {
            max_extensions: 1,
            ..RuntimeConfig::default()
        });
        runtime.register("a", Responder, None).await.unwrap();
        assert!(matches!(
            runtime.register("b", Responder, None).await,
            Err(RuntimeError::TooManyExtensions(1))
        ));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_interface_is_rejected() {
        let mut runtime = Runtime::new(RuntimeConfig::default());
        assert!(runtime
            .register("a", Responder, Some("missing"))
            .await
            .is_err());
        assert!(runtime.extension_names().is_empty());
    }

    #[tokio::test]
    async fn stop_extension_detaches_it() {
        let mut runtime = Runtime::new(RuntimeConfig::default());
        let handle = runtime.register("responder", Responder, None).await.unwrap();
        handle.wait_for(LifecycleState::Started).await.unwrap();

        assert_eq!(
            runtime.stop_extension("responder").await.unwrap(),
            Outcome::Clean
        );
        assert!(matches!(
            runtime
                .send(Command::new("hello").with_dest("responder"))
                .await,
            Err(RuntimeError::ExtensionNotFound(_))
        ));
        assert!(runtime.stop_extension("responder").await.is_err());
    }
}
