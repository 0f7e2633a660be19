use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ingress listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub host: String,
    pub port: u16,
    /// How long a request waits for its command result.
    pub request_timeout_ms: u64,
    /// Extension that receives commands without an explicit `ten.dest`.
    pub target: Option<String>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            request_timeout_ms: 10_000,
            target: None,
        }
    }
}

impl IngressConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `host:port` as given, for binding and log output.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_demo_port() {
        let config: IngressConfig = serde_json::from_str(r#"{"target": "test_extension"}"#).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:8001");
        assert_eq!(config.target.as_deref(), Some("test_extension"));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }
}
