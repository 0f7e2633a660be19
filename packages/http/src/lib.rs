//! # exthost-http
//!
//! HTTP ingress for the extension host.
//!
//! The ingress accepts `POST /` with a JSON body, turns it into a
//! [`Command`](exthost_runtime::Command), sends it through the runtime's
//! router and answers with the result payload:
//!
//! ```text
//! POST /  {"ten": {"name": "test"}}   →   200  "data received"
//! ```
//!
//! Failures are reported by class only (400, 404, 503, 504, 500); the
//! underlying error is logged, never returned to the client.
//!
//! ## Usage
//!
//! ```ignore
//! use exthost_http::{Ingress, IngressConfig};
//!
//! let ingress = Ingress::bind(IngressConfig::default(), runtime.router()).await?;
//! let close = ingress.close_requested();
//! ingress.serve(close.wait()).await?;
//! ```

pub mod config;
pub mod error;
pub mod mapping;
pub mod server;

pub use config::IngressConfig;
pub use error::{Error, Result};
pub use mapping::{parse_request, request_body, FailureClass, IngressRequest, CLOSE_APP};
pub use server::{CloseSignal, Ingress};
