//! The demo graph: `test_extension` forwards every command as `hello` to
//! `responder` and relays the answer.

use std::time::Duration;

use async_trait::async_trait;
use exthost_runtime::{
    Command, CommandResult, Extension, ExtensionEnv, Result, Runtime, RuntimeError,
};
use serde_json::{json, Value};

pub const TEST_EXTENSION: &str = "test_extension";
pub const RESPONDER: &str = "responder";

pub fn test_extension_schema() -> Value {
    json!({
        "property": {
            "properties": {
                "testKey": {"type": "string"},
                "bool_field": {"type": "bool"},
                "int_field": {"type": "int64"},
                "float_field": {"type": "float64"},
                "string_field": {"type": "string"},
                "json_field": {
                    "type": "object",
                    "properties": {"testKey": {"type": "string"}}
                }
            },
            "required": ["testKey"]
        },
        "cmd_in": [{"name": "test"}],
        "cmd_out": [{"name": "hello"}]
    })
}

pub fn responder_schema() -> Value {
    json!({"cmd_in": [{"name": "hello"}]})
}

/// Register both extensions, their schemas and the `hello` edge.
pub async fn install(runtime: &mut Runtime, delay: Duration) -> Result<()> {
    runtime.register_schema(TEST_EXTENSION, &test_extension_schema())?;
    runtime.register_schema(RESPONDER, &responder_schema())?;
    runtime
        .register(TEST_EXTENSION, TestExtension { delay }, Some(TEST_EXTENSION))
        .await?;
    runtime
        .register(RESPONDER, Responder, Some(RESPONDER))
        .await?;
    runtime.connect(TEST_EXTENSION, "hello", RESPONDER).await;
    Ok(())
}

/// Exercises the property API in every phase, then forwards commands.
pub struct TestExtension {
    pub delay: Duration,
}

impl TestExtension {
    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn check(ok: bool, what: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(RuntimeError::callback(format!("property check failed: {}", what)))
    }
}

#[async_trait]
impl Extension for TestExtension {
    async fn on_configure(&mut self, env: &mut ExtensionEnv) -> Result<()> {
        self.pause().await;
        env.init_property_from_json(r#"{"testKey": "testValue"}"#)
    }

    async fn on_init(&mut self, env: &mut ExtensionEnv) -> Result<()> {
        self.pause().await;
        env.set_property_bool("bool_field", true)?;
        env.set_property_int("int_field", 1)?;
        env.set_property_float("float_field", 1.0)?;
        env.set_property_string("string_field", "hello")?;
        env.set_property_from_json("json_field", r#"{"testKey": "testValue2"}"#)
    }

    async fn on_start(&mut self, env: &mut ExtensionEnv) -> Result<()> {
        self.pause().await;
        tracing::debug!(extension = env.name(), "on_start");

        check(!env.is_property_exist("unknown_field")?, "unknown_field absent")?;
        check(env.is_property_exist("string_field")?, "string_field present")?;
        check(env.get_property_bool("bool_field")?, "bool_field")?;
        check(env.get_property_int("int_field")? == 1, "int_field")?;
        check(env.get_property_float("float_field")? == 1.0, "float_field")?;
        check(env.get_property_string("string_field")? == "hello", "string_field")?;
        check(
            env.get_property_to_json(Some("json_field"))?["testKey"] == "testValue2",
            "json_field",
        )?;

        check(env.get_property_string("unknown_field").is_err(), "string lookup")?;
        check(env.get_property_bool("unknown_field").is_err(), "bool lookup")?;
        check(env.get_property_int("unknown_field").is_err(), "int lookup")?;
        check(env.get_property_float("unknown_field").is_err(), "float lookup")?;
        check(
            env.get_property_to_json(Some("unknown_field")).is_err(),
            "json lookup",
        )
    }

    async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
        tracing::debug!(extension = env.name(), command = %cmd.name, payload = %cmd.payload, "on_cmd");
        self.pause().await;

        let reply = env.send_cmd(Command::new("hello")).await?;
        let result = CommandResult::new(reply.status, &cmd).with_payload(reply.payload);
        env.return_result(result).await
    }

    async fn on_stop(&mut self, env: &mut ExtensionEnv) -> Result<()> {
        tracing::debug!(extension = env.name(), "on_stop");
        self.pause().await;
        Ok(())
    }

    async fn on_deinit(&mut self, _env: &mut ExtensionEnv) -> Result<()> {
        self.pause().await;
        Ok(())
    }
}

/// Answers `hello` with `"data received"`.
pub struct Responder;

#[async_trait]
impl Extension for Responder {
    async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
        env.return_result(CommandResult::ok(&cmd, json!("data received")))
            .await
    }
}
