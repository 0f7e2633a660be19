use std::path::PathBuf;

use thiserror::Error;

use crate::ExitStatus;

/// Errors that stop the host before or while it runs.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("cannot read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid log filter: {0}")]
    LogFilter(String),

    #[error(transparent)]
    Runtime(#[from] exthost_runtime::RuntimeError),

    #[error(transparent)]
    Ingress(#[from] exthost_http::Error),
}

impl AppError {
    /// Exit status for a host that failed with this error. Extension
    /// failures surface from [`crate::Host::run`] instead, so every error
    /// here is an infrastructure failure.
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::Infrastructure
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
