//! Discovery of local agents from their control sockets.
//!
//! The socket directory changes only when agents start or stop, so the list
//! of agents is rebuilt at most once per expiry interval. Between rescans
//! every request probes the same list.

use std::os::unix::fs::FileTypeExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::agent::{AgentHandle, StatusConnector};
use crate::error::AdmissionError;
use crate::identity::NodeIdentity;

struct DirectorySnapshot {
    agents: Arc<[Arc<AgentHandle>]>,
    /// `None` until the first successful scan.
    expires_at: Option<Instant>,
}

impl DirectorySnapshot {
    fn is_fresh(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now < at)
    }
}

pub struct AgentDirectory {
    sockets_dir: PathBuf,
    expire_time: Duration,
    status_timeout: Duration,
    connector: Arc<dyn StatusConnector>,
    snapshot: RwLock<DirectorySnapshot>,
}

impl AgentDirectory {
    pub fn new(
        sockets_dir: impl Into<PathBuf>,
        expire_time: Duration,
        status_timeout: Duration,
        connector: Arc<dyn StatusConnector>,
    ) -> Self {
        Self {
            sockets_dir: sockets_dir.into(),
            expire_time,
            status_timeout,
            connector,
            snapshot: RwLock::new(DirectorySnapshot {
                agents: Arc::from(Vec::new()),
                expires_at: None,
            }),
        }
    }

    /// The current agent list, rescanning first if it has expired.
    ///
    /// A failed rescan keeps the previous list when there is one; the error
    /// only surfaces if no scan has ever succeeded.
    pub async fn agents(&self) -> Result<Arc<[Arc<AgentHandle>]>, AdmissionError> {
        {
            let snapshot = self.snapshot.read().await;
            if snapshot.is_fresh(Instant::now()) {
                return Ok(snapshot.agents.clone());
            }
        }

        let mut snapshot = self.snapshot.write().await;
        // Another request may have rescanned while we waited for the lock.
        if snapshot.is_fresh(Instant::now()) {
            return Ok(snapshot.agents.clone());
        }

        match self.scan().await {
            Ok(agents) => {
                tracing::debug!(
                    dir = %self.sockets_dir.display(),
                    agents = agents.len(),
                    "rescanned agent sockets"
                );
                *snapshot = DirectorySnapshot {
                    agents: agents.into(),
                    expires_at: Some(Instant::now() + self.expire_time),
                };
                Ok(snapshot.agents.clone())
            }
            Err(e) if snapshot.expires_at.is_some() => {
                tracing::warn!(
                    error = %e,
                    agents = snapshot.agents.len(),
                    "socket rescan failed, keeping previous agent list"
                );
                Ok(snapshot.agents.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Find the first agent that affirms `id`.
    ///
    /// Agents are probed one at a time in discovery order. An agent that
    /// fails to answer is skipped; if nobody matched, the first such failure
    /// is returned so it is not mistaken for a clean miss.
    pub async fn resolve(
        &self,
        id: &NodeIdentity,
    ) -> Result<Option<Arc<AgentHandle>>, AdmissionError> {
        let agents = self.agents().await?;

        let mut first_error = None;
        for agent in agents.iter() {
            match agent.verify_identity(id, self.status_timeout).await {
                Ok(true) => return Ok(Some(agent.clone())),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        socket = %agent.socket().display(),
                        nodekey = %id,
                        error = %e,
                        "agent probe failed, trying next"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn scan(&self) -> Result<Vec<Arc<AgentHandle>>, AdmissionError> {
        let scan_error = |e: std::io::Error| AdmissionError::DirectoryScan {
            path: self.sockets_dir.clone(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(&self.sockets_dir)
            .await
            .map_err(scan_error)?;

        let mut sockets = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(scan_error)? {
            // DirEntry::file_type does not follow symlinks.
            match entry.file_type().await {
                Ok(ft) if ft.is_socket() => sockets.push(entry.path()),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "skipping unreadable entry");
                }
            }
        }
        sockets.sort();

        Ok(sockets
            .into_iter()
            .map(|socket| {
                tracing::debug!(socket = %socket.display(), "create agent handle");
                let source = self.connector.connect(&socket);
                Arc::new(AgentHandle::new(socket, source))
            })
            .collect())
    }
}
