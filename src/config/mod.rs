//! Proxy configuration.
//!
//! Every field has a working default so a bare `readthru` starts against a
//! backend on `localhost:8080`. [`Config::validate`] is called once at
//! startup, before anything is bound or built.

use std::time::Duration;

use thiserror::Error;

use crate::cache::KeyScope;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the backend store, e.g. `http://localhost:8080`.
    pub backend_url: String,
    /// How long a fetched value may be served before it is refreshed.
    pub staleness: Duration,
    /// Address the proxy listens on.
    pub listen_addr: String,
    /// Upper bound on one backend round trip.
    pub request_timeout: Duration,
    pub key_scope: KeyScope,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080".to_string(),
            staleness: Duration::from_secs(5 * 60),
            listen_addr: "0.0.0.0:8081".to_string(),
            request_timeout: Duration::from_secs(10),
            key_scope: KeyScope::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.backend_url.trim();
        if url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "backend_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "backend_url",
                reason: format!("{url:?} is not an http(s) URL"),
            });
        }
        if self.staleness.as_secs() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "staleness",
                reason: "must be at least one second".to_string(),
            });
        }
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "listen_addr",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}
