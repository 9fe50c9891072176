use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("failed to scan socket directory {path}: {reason}")]
    DirectoryScan { path: PathBuf, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("status query timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid node key: {0}")]
    InvalidNodeKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("purge task already running")]
    AlreadyRunning,

    #[error("purge task not running")]
    NotRunning,
}

impl AdmissionError {
    /// Whether the error came from talking to an agent rather than from
    /// local setup.
    pub fn is_agent_failure(&self) -> bool {
        matches!(
            self,
            AdmissionError::Transport(_) | AdmissionError::Protocol(_) | AdmissionError::Timeout(_)
        )
    }
}
