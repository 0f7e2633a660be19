//! # exthost-app
//!
//! The demo host: a runtime with the demo graph installed, fronted by the
//! HTTP ingress. It runs until a client posts `close_app` or the process
//! receives Ctrl-C, then stops every extension and reports how they ended.

pub mod config;
pub mod demo;
pub mod error;

use std::net::SocketAddr;
use std::time::Duration;

use exthost_http::{CloseSignal, Ingress};
use exthost_runtime::{ExtensionHandle, LifecycleState, Runtime};
use tracing_subscriber::EnvFilter;

pub use config::{AppConfig, DemoConfig};
pub use error::{AppError, Result};

/// Process exit status of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every extension shut down cleanly.
    Clean,
    /// At least one extension ended in a fatal state.
    Fatal,
    /// The host could not start (config, bind).
    Infrastructure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::Infrastructure => 2,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| AppError::LogFilter(e.to_string()))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| AppError::LogFilter(e.to_string()))
}

/// A started host: the ingress bound and the extensions registered.
pub struct Host {
    runtime: Runtime,
    ingress: Ingress,
}

impl Host {
    /// Bind the ingress, then install the demo graph.
    ///
    /// The extensions start in the background; until one reaches `Started`
    /// the ingress answers requests for it with `503`.
    pub async fn start(config: AppConfig) -> Result<Self> {
        let mut runtime = Runtime::new(config.runtime.clone());

        let mut ingress_config = config.ingress;
        if ingress_config.target.is_none() {
            ingress_config.target = Some(demo::TEST_EXTENSION.to_string());
        }
        let ingress = Ingress::bind(ingress_config, runtime.router()).await?;

        let delay = Duration::from_millis(config.demo.delay_ms);
        if let Err(e) = demo::install(&mut runtime, delay).await {
            runtime.shutdown().await;
            return Err(e.into());
        }
        Ok(Self { runtime, ingress })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.ingress.local_addr()
    }

    /// Serve until `close_app`, Ctrl-C or an extension failing to start,
    /// then shut every extension down.
    pub async fn run(self) -> ExitStatus {
        let close = self.ingress.close_requested();
        let handles: Vec<ExtensionHandle> = self
            .runtime
            .extension_names()
            .into_iter()
            .filter_map(|name| self.runtime.handle(name))
            .collect();
        let served = self.ingress.serve(stop_signal(close, handles)).await;

        let report = self.runtime.shutdown().await;
        if let Err(e) = served {
            tracing::error!(error = %e, "ingress failed");
            return ExitStatus::Infrastructure;
        }
        if report.is_clean() {
            ExitStatus::Clean
        } else {
            tracing::error!(fatal = ?report.fatal(), "extensions ended in a fatal state");
            ExitStatus::Fatal
        }
    }
}

/// Resolves with the name of the first extension that ends before
/// reaching `Started`. Pends forever once all of them have started.
async fn start_failure(handles: Vec<ExtensionHandle>) -> String {
    for handle in &handles {
        match handle.wait_for(LifecycleState::Started).await {
            Ok(LifecycleState::Started) => {}
            _ => return handle.name().to_string(),
        }
    }
    tracing::info!(extensions = handles.len(), "all extensions started");
    std::future::pending().await
}

async fn stop_signal(close: CloseSignal, handles: Vec<ExtensionHandle>) {
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Only close_app can stop the host now.
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = close.wait() => tracing::info!("close_app received"),
        _ = interrupted => tracing::info!("interrupted"),
        name = start_failure(handles) => {
            tracing::error!(extension = %name, "extension failed to start, stopping");
        }
    }
}
