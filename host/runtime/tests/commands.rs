use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use exthost_runtime::{
    Command, CommandResult, Extension, ExtensionEnv, LifecycleState, Result, Runtime,
    RuntimeConfig, RuntimeError, StatusCode,
};

/// Forwards every inbound command as "hello" and relays the reply.
struct Forwarder {
    timeout: Duration,
}

#[async_trait]
impl Extension for Forwarder {
    async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
        let reply = match env
            .send_cmd_with_timeout(Command::new("hello").with_payload(cmd.payload.clone()), self.timeout)
            .await
        {
            Ok(reply) => reply.payload,
            Err(RuntimeError::Cancelled { .. }) => json!("cancelled"),
            Err(e) => return Err(e),
        };
        env.return_result(CommandResult::ok(&cmd, reply)).await
    }
}

struct Responder;

#[async_trait]
impl Extension for Responder {
    async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
        match cmd.name.as_str() {
            "hello" => {
                env.return_result(CommandResult::ok(&cmd, json!("data received")))
                    .await
            }
            "fail" => Err(RuntimeError::callback("refused")),
            // Returns without answering.
            _ => Ok(()),
        }
    }
}

/// Sleeps on every command before answering.
struct Sleeper {
    delay: Duration,
}

#[async_trait]
impl Extension for Sleeper {
    async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        env.return_result(CommandResult::ok(&cmd, json!("slept")))
            .await
    }
}

/// Holds every command until released, then forwards it like `Forwarder`.
struct Gated {
    release: Arc<Notify>,
    inner: Forwarder,
}

#[async_trait]
impl Extension for Gated {
    async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
        self.release.notified().await;
        self.inner.on_cmd(env, cmd).await
    }
}

fn forwarder() -> Forwarder {
    Forwarder {
        timeout: Duration::from_secs(5),
    }
}

async fn started(runtime: &Runtime, names: &[&str]) {
    for name in names {
        runtime
            .handle(name)
            .unwrap()
            .wait_for(LifecycleState::Started)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn nested_command_is_routed_through_the_graph() {
    let mut runtime = Runtime::new(RuntimeConfig::default());
    runtime.register("test_extension", forwarder(), None).await.unwrap();
    runtime.register("responder", Responder, None).await.unwrap();
    runtime.connect("test_extension", "hello", "responder").await;
    started(&runtime, &["test_extension", "responder"]).await;

    let result = runtime
        .send(Command::new("test").with_dest("test_extension"))
        .await
        .unwrap();
    assert_eq!(result.status, StatusCode::Ok);
    assert_eq!(result.payload, json!("data received"));

    let stats = runtime.router().stats();
    assert_eq!(stats.delivered, 2);
    assert!(runtime.shutdown().await.is_clean());
}

#[tokio::test]
async fn sending_without_a_graph_edge_fails() {
    let mut runtime = Runtime::new(RuntimeConfig::default());
    runtime.register("test_extension", forwarder(), None).await.unwrap();
    started(&runtime, &["test_extension"]).await;

    let result = runtime
        .send(Command::new("test").with_dest("test_extension"))
        .await
        .unwrap();
    assert_eq!(result.status, StatusCode::Error);
    assert!(result.payload.as_str().unwrap().contains("no route"));
    runtime.shutdown().await;
}

#[tokio::test]
async fn unanswered_and_failed_commands_get_error_results() {
    let mut runtime = Runtime::new(RuntimeConfig::default());
    runtime.register("responder", Responder, None).await.unwrap();
    started(&runtime, &["responder"]).await;

    let silent = runtime
        .send(Command::new("ignore").with_dest("responder"))
        .await
        .unwrap();
    assert_eq!(silent.status, StatusCode::Error);

    let failed = runtime
        .send(Command::new("fail").with_dest("responder"))
        .await
        .unwrap();
    assert_eq!(failed.status, StatusCode::Error);
    assert!(failed.payload.as_str().unwrap().contains("refused"));

    // The instance keeps serving after a failed command.
    let ok = runtime
        .send(Command::new("hello").with_dest("responder"))
        .await
        .unwrap();
    assert!(ok.is_ok());
    assert!(runtime.shutdown().await.is_clean());
}

#[tokio::test]
async fn inbound_commands_are_validated_against_the_schema() {
    let mut runtime = Runtime::new(RuntimeConfig::default());
    runtime
        .register_schema(
            "responder",
            &json!({
                "cmd_in": [{
                    "name": "hello",
                    "property": {
                        "properties": {"count": {"type": "int32"}},
                        "required": ["count"]
                    }
                }]
            }),
        )
        .unwrap();
    runtime
        .register("responder", Responder, Some("responder"))
        .await
        .unwrap();
    started(&runtime, &["responder"]).await;

    let bad = runtime
        .send(
            Command::new("hello")
                .with_dest("responder")
                .with_payload(json!({"count": "two"})),
        )
        .await;
    assert!(matches!(bad, Err(RuntimeError::Property(_))));

    let undeclared = runtime
        .send(Command::new("fail").with_dest("responder"))
        .await;
    assert!(matches!(undeclared, Err(RuntimeError::Property(_))));

    let good = runtime
        .send(
            Command::new("hello")
                .with_dest("responder")
                .with_payload(json!({"count": 2})),
        )
        .await
        .unwrap();
    assert!(good.is_ok());
    runtime.shutdown().await;
}

#[tokio::test]
async fn outbound_commands_must_be_declared() {
    let mut runtime = Runtime::new(RuntimeConfig::default());
    runtime
        .register_schema("forwarder", &json!({"cmd_in": [{"name": "test"}]}))
        .unwrap();
    runtime
        .register("test_extension", forwarder(), Some("forwarder"))
        .await
        .unwrap();
    runtime.register("responder", Responder, None).await.unwrap();
    runtime.connect("test_extension", "hello", "responder").await;
    started(&runtime, &["test_extension", "responder"]).await;

    let result = runtime
        .send(Command::new("test").with_dest("test_extension"))
        .await
        .unwrap();
    assert_eq!(result.status, StatusCode::Error);
    assert!(result.payload.as_str().unwrap().contains("hello"));
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_grace_cancels_pending_sends() {
    let mut runtime = Runtime::new(RuntimeConfig {
        stop_grace_ms: 100,
        ..RuntimeConfig::default()
    });
    let caller = runtime
        .register(
            "caller",
            Forwarder {
                timeout: Duration::from_secs(3600),
            },
            None,
        )
        .await
        .unwrap();
    let sink = runtime
        .register(
            "sink",
            Sleeper {
                delay: Duration::from_secs(600),
            },
            None,
        )
        .await
        .unwrap();
    runtime.connect("caller", "hello", "sink").await;
    started(&runtime, &["caller", "sink"]).await;

    let router = runtime.router();
    let inflight = tokio::spawn(async move {
        router
            .send(
                Command::new("test").with_dest("caller"),
                Duration::from_secs(3600),
            )
            .await
    });
    caller
        .wait_for(LifecycleState::HandlingCommand)
        .await
        .unwrap();
    sink.wait_for(LifecycleState::HandlingCommand).await.unwrap();

    let report = runtime.shutdown().await;
    assert!(report.is_clean());

    // The caller's handler ran to completion after its send was cancelled.
    let result = inflight.await.unwrap().unwrap();
    assert_eq!(result.payload, json!("cancelled"));
}

#[tokio::test(start_paused = true)]
async fn queued_commands_are_rejected_on_stop() {
    let mut runtime = Runtime::new(RuntimeConfig::default());
    let sleeper = runtime
        .register(
            "sleeper",
            Sleeper {
                delay: Duration::from_secs(1),
            },
            None,
        )
        .await
        .unwrap();
    sleeper.wait_for(LifecycleState::Started).await.unwrap();

    let router = runtime.router();
    let send = |router: std::sync::Arc<exthost_runtime::Router>| async move {
        router
            .send(
                Command::new("work").with_dest("sleeper"),
                Duration::from_secs(60),
            )
            .await
    };
    let first = tokio::spawn(send(router.clone()));
    sleeper
        .wait_for(LifecycleState::HandlingCommand)
        .await
        .unwrap();
    let second = tokio::spawn(send(router.clone()));
    while router.pending_count().await < 2 {
        tokio::task::yield_now().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(runtime.shutdown().await.is_clean());

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.payload, json!("slept"));
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.status, StatusCode::Error);
    assert_eq!(second.payload, json!("extension is stopping"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_in_flight_commands_reach_their_peers() {
    let mut runtime = Runtime::new(RuntimeConfig::default());
    let release = Arc::new(Notify::new());
    let front = runtime
        .register(
            "a",
            Gated {
                release: release.clone(),
                inner: forwarder(),
            },
            None,
        )
        .await
        .unwrap();
    runtime.register("b", Responder, None).await.unwrap();
    runtime.connect("a", "hello", "b").await;
    started(&runtime, &["a", "b"]).await;

    let router = runtime.router();
    let inflight = tokio::spawn(async move {
        router
            .send(Command::new("test").with_dest("a"), Duration::from_secs(60))
            .await
    });
    front.wait_for(LifecycleState::HandlingCommand).await.unwrap();

    let shutdown = tokio::spawn(runtime.shutdown());
    tokio::time::sleep(Duration::from_millis(10)).await;
    release.notify_one();

    assert!(shutdown.await.unwrap().is_clean());
    let result = inflight.await.unwrap().unwrap();
    assert_eq!(result.status, StatusCode::Ok);
    assert_eq!(result.payload, json!("data received"));
}
