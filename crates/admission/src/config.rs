use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_STATUS_TIMEOUT;
use crate::error::AdmissionError;

/// Service configuration. Every field has a default, so a config file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Address the HTTP admission endpoint listens on.
    pub listen_addr: String,
    /// Directory scanned for agent control sockets.
    pub sockets_dir: PathBuf,
    /// How long a verified identity is cached, and how long a socket scan
    /// is trusted before the directory is read again.
    #[serde(with = "humantime_serde")]
    pub expire_time: Duration,
    /// Period of the background cache purge.
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
    /// Deadline for one agent status query.
    #[serde(with = "humantime_serde")]
    pub status_timeout: Duration,
    /// How long in-flight requests may take to finish on shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    /// Turn on debug-level logging.
    pub debug: bool,
}

fn default_listen_addr() -> String {
    "127.0.0.1:15300".to_string()
}

fn default_sockets_dir() -> PathBuf {
    PathBuf::from("/run/derp-admit")
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            sockets_dir: default_sockets_dir(),
            expire_time: Duration::from_secs(60),
            purge_interval: Duration::from_secs(30),
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            shutdown_grace: Duration::from_secs(10),
            debug: false,
        }
    }
}

impl AdmissionConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, AdmissionError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AdmissionError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, AdmissionError> {
        toml::from_str(raw).map_err(|e| AdmissionError::Config(e.to_string()))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AdmissionError> {
        self.listen_addr.parse().map_err(|e| {
            AdmissionError::Config(format!("invalid listen_addr '{}': {}", self.listen_addr, e))
        })
    }

    pub fn validate(&self) -> Result<(), AdmissionError> {
        self.socket_addr()?;
        for (name, value) in [
            ("expire_time", self.expire_time),
            ("purge_interval", self.purge_interval),
            ("status_timeout", self.status_timeout),
            ("shutdown_grace", self.shutdown_grace),
        ] {
            if value.is_zero() {
                return Err(AdmissionError::Config(format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }
}
