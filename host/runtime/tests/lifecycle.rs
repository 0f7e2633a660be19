use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use exthost_runtime::{
    Command, CommandResult, Extension, ExtensionEnv, LifecycleState, Outcome, Result, Runtime,
    RuntimeConfig, RuntimeError,
};

type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Exercises the property API in every phase and records what it saw.
struct PropertyProbe {
    journal: Journal,
    fail_in: Option<&'static str>,
}

impl PropertyProbe {
    fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail_in: None,
        }
    }

    fn failing_in(journal: &Journal, phase: &'static str) -> Self {
        Self {
            journal: journal.clone(),
            fail_in: Some(phase),
        }
    }

    fn enter(&self, phase: &str) -> Result<()> {
        record(&self.journal, phase);
        if self.fail_in == Some(phase) {
            return Err(RuntimeError::callback(format!("{} failed", phase)));
        }
        Ok(())
    }
}

#[async_trait]
impl Extension for PropertyProbe {
    async fn on_configure(&mut self, env: &mut ExtensionEnv) -> Result<()> {
        self.enter("configure")?;
        assert!(env.set_property_int("int_field", 1).is_err());
        env.init_property_from_json(r#"{"testKey": "testValue"}"#)?;
        Ok(())
    }

    async fn on_init(&mut self, env: &mut ExtensionEnv) -> Result<()> {
        self.enter("init")?;
        assert_eq!(env.get_property_string("testKey")?, "testValue");

        env.set_property_from_json("testKey2", r#""testValue2""#)?;
        env.set_property_int("int_field", 1)?;
        env.set_property_bool("bool_field", true)?;
        env.set_property_float("float_field", 1.0)?;
        env.set_property_string("string_field", "hello")?;

        assert_eq!(env.get_property_string("testKey2")?, "testValue2");
        assert_eq!(env.get_property_int("int_field")?, 1);
        assert!(env.get_property_bool("bool_field")?);
        assert_eq!(env.get_property_float("float_field")?, 1.0);
        assert!(env.is_property_exist("string_field")?);
        assert!(!env.is_property_exist("unknown_field")?);
        assert!(env.get_property_int("string_field").is_err());
        Ok(())
    }

    async fn on_start(&mut self, _env: &mut ExtensionEnv) -> Result<()> {
        self.enter("start")
    }

    async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
        record(&self.journal, format!("cmd:{}", cmd.name));
        let value = env.get_property_to_json(Some("testKey"))?;
        env.return_result(CommandResult::ok(&cmd, value)).await
    }

    async fn on_stop(&mut self, _env: &mut ExtensionEnv) -> Result<()> {
        self.enter("stop")
    }

    async fn on_deinit(&mut self, env: &mut ExtensionEnv) -> Result<()> {
        record(&self.journal, format!("deinit:{}", env.state()));
        if self.fail_in == Some("deinit") {
            return Err(RuntimeError::callback("deinit failed"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn callbacks_run_in_phase_order() {
    let journal = Journal::default();
    let mut runtime = Runtime::new(RuntimeConfig::default());
    let handle = runtime
        .register("probe", PropertyProbe::new(&journal), None)
        .await
        .unwrap();
    handle.wait_for(LifecycleState::Started).await.unwrap();

    let result = runtime
        .send(Command::new("test").with_dest("probe"))
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(result.payload, json!("testValue"));

    let report = runtime.shutdown().await;
    assert!(report.is_clean());
    assert_eq!(handle.state(), LifecycleState::Deinited);
    assert_eq!(
        entries(&journal),
        vec![
            "configure",
            "init",
            "start",
            "cmd:test",
            "stop",
            "deinit:deinitializing"
        ]
    );
}

#[tokio::test]
async fn failed_init_goes_through_fatal_to_deinited() {
    let journal = Journal::default();
    let mut runtime = Runtime::new(RuntimeConfig::default());
    let handle = runtime
        .register("probe", PropertyProbe::failing_in(&journal, "init"), None)
        .await
        .unwrap();

    assert_eq!(
        handle.wait_for(LifecycleState::Started).await.unwrap(),
        LifecycleState::Deinited
    );
    assert_eq!(
        entries(&journal),
        vec!["configure", "init", "deinit:deinitializing"]
    );

    let report = runtime.shutdown().await;
    assert_eq!(report.fatal(), vec!["probe"]);
}

#[tokio::test]
async fn failed_stop_is_reported_as_fatal() {
    let journal = Journal::default();
    let mut runtime = Runtime::new(RuntimeConfig::default());
    let handle = runtime
        .register("probe", PropertyProbe::failing_in(&journal, "stop"), None)
        .await
        .unwrap();
    handle.wait_for(LifecycleState::Started).await.unwrap();

    assert_eq!(
        runtime.stop_extension("probe").await.unwrap(),
        Outcome::Fatal
    );
    assert_eq!(
        entries(&journal),
        vec!["configure", "init", "start", "stop", "deinit:deinitializing"]
    );
}

#[tokio::test]
async fn failed_deinit_still_reaches_deinited() {
    let journal = Journal::default();
    let mut runtime = Runtime::new(RuntimeConfig::default());
    let handle = runtime
        .register("probe", PropertyProbe::failing_in(&journal, "deinit"), None)
        .await
        .unwrap();
    handle.wait_for(LifecycleState::Started).await.unwrap();

    let report = runtime.shutdown().await;
    assert_eq!(handle.state(), LifecycleState::Deinited);
    // Logged only; every phase that gates the outcome succeeded.
    assert_eq!(report.outcomes.get("probe"), Some(&Outcome::Clean));
    assert_eq!(
        entries(&journal),
        vec!["configure", "init", "start", "stop", "deinit:deinitializing"]
    );
}

#[tokio::test]
async fn missing_required_property_is_fatal() {
    let journal = Journal::default();
    let mut runtime = Runtime::new(RuntimeConfig::default());
    runtime
        .register_schema(
            "probe",
            &json!({
                "property": {
                    "properties": {"api_key": {"type": "string"}},
                    "required": ["api_key"]
                }
            }),
        )
        .unwrap();
    let handle = runtime
        .register("probe", PropertyProbe::new(&journal), Some("probe"))
        .await
        .unwrap();

    assert_eq!(
        handle.wait_for(LifecycleState::Started).await.unwrap(),
        LifecycleState::Deinited
    );
    assert_eq!(entries(&journal), vec!["configure", "deinit:deinitializing"]);
    assert!(!runtime.shutdown().await.is_clean());
}

#[tokio::test]
async fn commands_to_a_stopped_instance_are_rejected() {
    let journal = Journal::default();
    let mut runtime = Runtime::new(RuntimeConfig::default());
    let handle = runtime
        .register("probe", PropertyProbe::failing_in(&journal, "start"), None)
        .await
        .unwrap();
    handle.wait_for(LifecycleState::Deinited).await.unwrap();

    let err = runtime
        .send(Command::new("test").with_dest("probe"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ExtensionNotFound(_) | RuntimeError::LifecycleViolation { .. }
    ));
    runtime.shutdown().await;
}
