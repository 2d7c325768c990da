use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use proto::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Service configuration loaded from a TOML file
///
/// Every field has a default so an absent file yields a runnable
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the QUIC endpoint binds to.
    pub listen: String,
    /// Bound on downlink delivery, in milliseconds.
    pub send_timeout_ms: u64,
    /// PEM certificate path; a self-signed certificate is generated when unset.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key path; required together with `tls_cert`.
    pub tls_key: Option<PathBuf>,
    /// Log level used when `RUST_LOG` is not set.
    pub log_level: String,
    /// PID file path override.
    pub pid_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8881".to_string(),
            send_timeout_ms: 1000,
            tls_cert: None,
            tls_key: None,
            log_level: "info".to_string(),
            pid_file: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            debug!("no config file given, using defaults");
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::Toml(e.to_string()))?;
        config.validate()?;
        debug!("config loaded from {}", path.display());
        Ok(config)
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                field: "listen".to_string(),
                reason: format!("not a socket address: {}", self.listen),
            })
    }

    /// Downlink delivery bound as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "send_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "tls_cert".to_string(),
                reason: "tls_cert and tls_key must be set together".to_string(),
            });
        }
        Ok(())
    }
}
