//! The axum server that feeds requests into the router.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use exthost_runtime::{Router, StatusCode as ResultStatus};
use http::StatusCode;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::IngressConfig;
use crate::error::{Error, Result};
use crate::mapping::{parse_request, FailureClass, IngressRequest};

struct IngressState {
    router: Arc<Router>,
    config: IngressConfig,
    close: watch::Sender<bool>,
}

/// A bound ingress listener.
///
/// Binding and serving are separate so callers can learn the local address
/// (and treat the host as ready) before the first request is accepted.
pub struct Ingress {
    listener: TcpListener,
    addr: SocketAddr,
    state: Arc<IngressState>,
}

impl Ingress {
    /// Bind the listener described by `config`.
    pub async fn bind(config: IngressConfig, router: Arc<Router>) -> Result<Self> {
        let listener = TcpListener::bind(config.addr())
            .await
            .map_err(|source| Error::Bind {
                addr: config.addr(),
                source,
            })?;
        let addr = listener.local_addr()?;
        let (close, _) = watch::channel(false);
        tracing::info!(%addr, target = ?config.target, "ingress listening");
        Ok(Self {
            listener,
            addr,
            state: Arc::new(IngressState {
                router,
                config,
                close,
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal that fires once a client posts `close_app`.
    pub fn close_requested(&self) -> CloseSignal {
        CloseSignal(self.state.close.subscribe())
    }

    /// Serve requests until `shutdown` completes.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = axum::Router::new()
            .route("/", post(handle_post))
            .with_state(self.state);
        let addr = self.addr;
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|source| Error::Serve { addr, source })?;
        tracing::info!(%addr, "ingress stopped");
        Ok(())
    }
}

/// Receiver side of the `close_app` request.
#[derive(Debug, Clone)]
pub struct CloseSignal(watch::Receiver<bool>);

impl CloseSignal {
    /// Wait until close is requested. Also returns if the ingress is gone.
    pub async fn wait(mut self) {
        let _ = self.0.wait_for(|closed| *closed).await;
    }

    pub fn is_requested(&self) -> bool {
        *self.0.borrow()
    }
}

async fn handle_post(State(state): State<Arc<IngressState>>, body: Bytes) -> Response {
    let cmd = match parse_request(&body, state.config.target.as_deref()) {
        Ok(IngressRequest::Command(cmd)) => cmd,
        Ok(IngressRequest::Close) => {
            tracing::info!("close requested over ingress");
            state.close.send_replace(true);
            return (StatusCode::OK, Json(Value::from("ok"))).into_response();
        }
        Err(class) => {
            tracing::debug!("rejecting malformed request");
            return failure(class);
        }
    };

    let command = cmd.name.clone();
    // The router's deadline covers both mailbox admission and the reply.
    match state.router.send(cmd, state.config.request_timeout()).await {
        Ok(result) if result.status == ResultStatus::Ok => {
            (StatusCode::OK, Json(result.payload)).into_response()
        }
        Ok(result) => {
            tracing::warn!(%command, payload = %result.payload, "command failed");
            failure(FailureClass::Internal)
        }
        Err(e) => {
            let class = FailureClass::of(&e);
            tracing::warn!(%command, error = %e, ?class, "command not completed");
            failure(class)
        }
    }
}

fn failure(class: FailureClass) -> Response {
    (class.status(), class.body()).into_response()
}
