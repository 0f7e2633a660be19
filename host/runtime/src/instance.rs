//! The task that drives one extension instance through its lifecycle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use crate::command::{Command, CommandResult, StatusCode};
use crate::env::ExtensionEnv;
use crate::error::Result;
use crate::extension::Extension;
use crate::lifecycle::LifecycleState;
use crate::router::Router;

/// Requests from the runtime to a running instance.
#[derive(Debug)]
pub(crate) enum Control {
    Stop,
}

/// How an instance's lifecycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every phase callback succeeded.
    Clean,
    /// A phase callback failed, or the task panicked.
    Fatal,
}

pub(crate) struct Instance {
    extension: Box<dyn Extension>,
    env: ExtensionEnv,
    mailbox: mpsc::Receiver<Command>,
    control: mpsc::Receiver<Control>,
    router: Arc<Router>,
    stop_grace: Duration,
}

impl Instance {
    pub(crate) fn new(
        extension: Box<dyn Extension>,
        env: ExtensionEnv,
        mailbox: mpsc::Receiver<Command>,
        control: mpsc::Receiver<Control>,
        router: Arc<Router>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            extension,
            env,
            mailbox,
            control,
            router,
            stop_grace,
        }
    }

    /// Run the instance to `Deinited`.
    pub(crate) async fn run(mut self) -> Outcome {
        let outcome = match self.start_up().await {
            Ok(()) => {
                self.serve().await;
                match self.stop().await {
                    Ok(()) => Outcome::Clean,
                    Err(e) => self.fail("stop", e),
                }
            }
            Err(e) => self.fail("start up", e),
        };
        self.tear_down().await;
        outcome
    }

    async fn start_up(&mut self) -> Result<()> {
        self.advance(LifecycleState::Configuring)?;
        self.extension.on_configure(&mut self.env).await?;
        self.env.properties().check_required()?;
        self.advance(LifecycleState::Configured)?;

        self.advance(LifecycleState::Initializing)?;
        self.extension.on_init(&mut self.env).await?;
        self.advance(LifecycleState::Initialized)?;

        self.advance(LifecycleState::Started)?;
        self.extension.on_start(&mut self.env).await?;
        tracing::info!(extension = %self.env.name(), "extension started");
        Ok(())
    }

    async fn serve(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.control.recv() => break,
                next = self.mailbox.recv() => match next {
                    Some(cmd) => {
                        if self.handle(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    /// Run `on_cmd` for one command. Returns true if a stop arrived while
    /// the handler was running.
    async fn handle(&mut self, cmd: Command) -> bool {
        let Some(id) = cmd.id.clone() else {
            tracing::warn!(extension = %self.env.name(), command = %cmd.name, "command without id");
            return false;
        };
        if let Err(e) = self.advance(LifecycleState::HandlingCommand) {
            tracing::error!(error = %e, "cannot handle command");
            return false;
        }
        let name = self.env.name().to_string();
        let command = cmd.name.clone();
        tracing::debug!(extension = %name, %command, %id, "handling command");
        self.env.begin_command(id.clone());

        let mut stop_requested = false;
        let handled = {
            let control = &mut self.control;
            let router = &self.router;
            let grace_period = self.stop_grace;
            let mut cancelled = false;

            let grace = sleep(Duration::from_secs(86_400));
            tokio::pin!(grace);
            let mut handler = self.extension.on_cmd(&mut self.env, cmd);

            loop {
                tokio::select! {
                    res = &mut handler => break res,
                    _ = control.recv(), if !stop_requested => {
                        stop_requested = true;
                        grace.as_mut().reset(Instant::now() + grace_period);
                        tracing::debug!(extension = %name, "stop requested during command");
                    }
                    _ = &mut grace, if stop_requested && !cancelled => {
                        cancelled = true;
                        let count = router.cancel_owner(&name).await;
                        tracing::warn!(extension = %name, count, "stop grace elapsed, cancelling pending sends");
                    }
                }
            }
        };

        let failure = match handled {
            Ok(()) => "command handler returned without a result".to_string(),
            Err(e) => {
                tracing::warn!(extension = %name, %command, error = %e, "command handler failed");
                e.to_string()
            }
        };
        if !self.env.end_command() {
            let result = CommandResult {
                correlation_id: id,
                status: StatusCode::Error,
                payload: Value::String(failure),
            };
            // The sender may have timed out already.
            if let Err(e) = self.router.deliver(result).await {
                tracing::debug!(error = %e, "fallback result not accepted");
            }
        }

        if let Err(e) = self.advance(LifecycleState::Started) {
            tracing::error!(error = %e, "cannot leave command handling");
        }
        stop_requested
    }

    async fn stop(&mut self) -> Result<()> {
        self.advance(LifecycleState::Stopping)?;
        self.reject_queued().await;
        self.extension.on_stop(&mut self.env).await
    }

    /// Answer every command still in the mailbox with an error.
    async fn reject_queued(&mut self) {
        self.mailbox.close();
        while let Ok(cmd) = self.mailbox.try_recv() {
            let result = CommandResult::error(&cmd, "extension is stopping");
            if let Err(e) = self.router.deliver(result).await {
                tracing::debug!(error = %e, "rejection not accepted");
            }
        }
    }

    async fn tear_down(&mut self) {
        let name = self.env.name().to_string();
        if let Err(e) = self.advance(LifecycleState::Deinitializing) {
            tracing::error!(extension = %name, error = %e, "cannot deinitialize");
        }
        self.reject_queued().await;
        self.router.cancel_owner(&name).await;
        if let Err(e) = self.extension.on_deinit(&mut self.env).await {
            tracing::warn!(extension = %name, error = %e, "on_deinit failed");
        }
        if let Err(e) = self.advance(LifecycleState::Deinited) {
            tracing::error!(extension = %name, error = %e, "cannot finish deinitializing");
        }
        self.router.detach(&name).await;
        tracing::info!(extension = %name, "extension deinited");
    }

    fn fail(&self, phase: &str, error: crate::error::RuntimeError) -> Outcome {
        tracing::error!(extension = %self.env.name(), phase, %error, "phase callback failed");
        if let Err(e) = self.advance(LifecycleState::Fatal) {
            tracing::error!(error = %e, "cannot enter fatal state");
        }
        Outcome::Fatal
    }

    fn advance(&self, next: LifecycleState) -> Result<()> {
        self.env.lifecycle().advance(next)
    }
}
