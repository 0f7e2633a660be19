use std::path::Path;

use exthost_http::IngressConfig;
use exthost_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Settings for the demo extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Simulated I/O delay inside every demo callback.
    pub delay_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { delay_ms: 500 }
    }
}

/// Everything the host binary can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub ingress: IngressConfig,
    pub demo: DemoConfig,
}

impl AppConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| AppError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| AppError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }
}
