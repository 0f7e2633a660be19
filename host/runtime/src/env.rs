//! The per-instance environment handed to extension callbacks.

use std::sync::Arc;
use std::time::Duration;

use exthost_core::{PropertyStore, PropertyValue, ValueType};
use serde_json::Value;

use crate::command::{Command, CommandId, CommandResult, Source};
use crate::error::Result;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::router::Router;

/// An instance's window into the runtime.
///
/// The environment owns the instance's property store, so property access
/// needs no locking. Every operation is gated on the lifecycle phase and
/// fails with `LifecycleViolation` outside it.
pub struct ExtensionEnv {
    name: String,
    properties: PropertyStore,
    lifecycle: Lifecycle,
    router: Arc<Router>,
    send_timeout: Duration,
    /// Command currently being handled and whether it was answered.
    current: Option<(CommandId, bool)>,
}

impl ExtensionEnv {
    pub(crate) fn new(
        name: impl Into<String>,
        properties: PropertyStore,
        lifecycle: Lifecycle,
        router: Arc<Router>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            properties,
            lifecycle,
            router,
            send_timeout,
            current: None,
        }
    }

    /// The instance's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instance's current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub(crate) fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    pub(crate) fn begin_command(&mut self, id: CommandId) {
        self.current = Some((id, false));
    }

    /// End the current command, reporting whether it was answered.
    pub(crate) fn end_command(&mut self) -> bool {
        matches!(self.current.take(), Some((_, true)))
    }

    // Properties

    pub fn is_property_exist(&self, name: &str) -> Result<bool> {
        self.lifecycle
            .guard("is_property_exist", LifecycleState::allows_property_read)?;
        Ok(self.properties.exists(name))
    }

    pub fn get_property(&self, name: &str, expected: ValueType) -> Result<PropertyValue> {
        self.lifecycle
            .guard("get_property", LifecycleState::allows_property_read)?;
        Ok(self.properties.get(name, expected)?)
    }

    pub fn get_property_bool(&self, name: &str) -> Result<bool> {
        self.lifecycle
            .guard("get_property", LifecycleState::allows_property_read)?;
        Ok(self.properties.get_bool(name)?)
    }

    pub fn get_property_int(&self, name: &str) -> Result<i64> {
        self.lifecycle
            .guard("get_property", LifecycleState::allows_property_read)?;
        Ok(self.properties.get_int(name)?)
    }

    pub fn get_property_float(&self, name: &str) -> Result<f64> {
        self.lifecycle
            .guard("get_property", LifecycleState::allows_property_read)?;
        Ok(self.properties.get_float(name)?)
    }

    pub fn get_property_string(&self, name: &str) -> Result<String> {
        self.lifecycle
            .guard("get_property", LifecycleState::allows_property_read)?;
        Ok(self.properties.get_string(name)?)
    }

    /// Render any property as JSON, or the whole store when `name` is `None`.
    pub fn get_property_to_json(&self, name: Option<&str>) -> Result<Value> {
        self.lifecycle
            .guard("get_property", LifecycleState::allows_property_read)?;
        let Some(name) = name else {
            return Ok(self.properties.to_document());
        };
        match self.properties.value(name) {
            Some(value) => Ok(value.to_json()),
            None => Err(exthost_core::Error::NotFound {
                name: name.to_string(),
            }
            .into()),
        }
    }

    pub fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        self.lifecycle
            .guard("set_property", LifecycleState::allows_property_write)?;
        Ok(self.properties.set(name, value)?)
    }

    pub fn set_property_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.set_property(name, PropertyValue::Bool(value))
    }

    pub fn set_property_int(&mut self, name: &str, value: i64) -> Result<()> {
        self.set_property(name, PropertyValue::Int(value))
    }

    pub fn set_property_float(&mut self, name: &str, value: f64) -> Result<()> {
        self.set_property(name, PropertyValue::Float(value))
    }

    pub fn set_property_string(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        self.set_property(name, PropertyValue::String(value.into()))
    }

    /// Parse `json` and store it under `name`.
    ///
    /// Scalars keep their natural type (`"1"` is stored as an int unless
    /// the schema declares a float); objects and arrays are stored as JSON.
    pub fn set_property_from_json(&mut self, name: &str, json: &str) -> Result<()> {
        let value: Value = serde_json::from_str(json)?;
        let value = self.properties.value_from_json(name, value);
        self.set_property(name, value)
    }

    /// Populate the store from a JSON object. Only legal while configuring.
    pub fn init_property_from_json(&mut self, json: &str) -> Result<()> {
        self.lifecycle
            .guard("init_property_from_json", LifecycleState::allows_property_load)?;
        let doc: Value = serde_json::from_str(json)?;
        Ok(self.properties.load_from_document(&doc)?)
    }

    // Commands

    /// Send a command and wait for its result with the default timeout.
    pub async fn send_cmd(&mut self, cmd: Command) -> Result<CommandResult> {
        let timeout = self.send_timeout;
        self.send_cmd_with_timeout(cmd, timeout).await
    }

    /// Send a command and wait at most `timeout` for its result.
    ///
    /// The command is issued as coming from this instance; without an
    /// explicit destination the graph decides where it goes. If the
    /// instance has a schema, the command must be declared in `cmd_out`.
    pub async fn send_cmd_with_timeout(
        &mut self,
        cmd: Command,
        timeout: Duration,
    ) -> Result<CommandResult> {
        self.lifecycle
            .guard("send_cmd", LifecycleState::allows_messaging)?;
        if let Some(schema) = self.properties.schema() {
            schema.validate_outbound_payload(&cmd.name, &cmd.payload)?;
        }
        let cmd = cmd.with_source(Source::Extension(self.name.clone()));
        self.router.send(cmd, timeout).await
    }

    /// Answer a command. Results are accepted once per correlation id.
    pub async fn return_result(&mut self, result: CommandResult) -> Result<()> {
        self.lifecycle
            .guard("return_result", LifecycleState::allows_messaging)?;
        if let Some((id, answered)) = &mut self.current {
            if *id == result.correlation_id {
                *answered = true;
            }
        }
        self.router.deliver(result).await
    }
}
