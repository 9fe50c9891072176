//! A single local network agent and the seam used to query it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AdmissionError;
use crate::identity::NodeIdentity;

/// Deadline for one status query when the caller has no better value.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(15);

/// What an agent reported about itself and its peers at query time.
#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub self_identity: Option<NodeIdentity>,
    pub peer_identities: HashSet<NodeIdentity>,
}

impl StatusSnapshot {
    pub fn new(self_identity: NodeIdentity, peers: impl IntoIterator<Item = NodeIdentity>) -> Self {
        Self {
            self_identity: Some(self_identity),
            peer_identities: peers.into_iter().collect(),
        }
    }
}

/// Fetches a status snapshot from one agent.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self) -> Result<StatusSnapshot, AdmissionError>;
}

/// Builds a [`StatusSource`] for a discovered agent socket.
pub trait StatusConnector: Send + Sync {
    fn connect(&self, socket: &Path) -> Arc<dyn StatusSource>;
}

/// One discovered agent. Queries against it are serialized.
pub struct AgentHandle {
    socket: PathBuf,
    source: Arc<dyn StatusSource>,
    query_lock: Mutex<()>,
}

impl AgentHandle {
    pub fn new(socket: PathBuf, source: Arc<dyn StatusSource>) -> Self {
        Self {
            socket,
            source,
            query_lock: Mutex::new(()),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Ask the agent whether `id` is itself or one of its peers.
    ///
    /// Waits for any query already in flight against this agent, then issues
    /// exactly one status request bounded by `deadline`. Transport, protocol
    /// and timeout failures are returned as errors; the caller decides
    /// whether they are fatal.
    pub async fn verify_identity(
        &self,
        id: &NodeIdentity,
        deadline: Duration,
    ) -> Result<bool, AdmissionError> {
        let _guard = self.query_lock.lock().await;

        tracing::debug!(socket = %self.socket.display(), "fetching agent status");
        let status = tokio::time::timeout(deadline, self.source.status())
            .await
            .map_err(|_| AdmissionError::Timeout(deadline))??;

        if status.self_identity.as_ref() == Some(id) {
            tracing::debug!(
                socket = %self.socket.display(),
                kind = "self-connect",
                nodekey = %id,
                "agent verify"
            );
            return Ok(true);
        }

        let known = status.peer_identities.contains(id);
        tracing::debug!(
            socket = %self.socket.display(),
            kind = "peers",
            ok = known,
            nodekey = %id,
            "agent verify"
        );
        Ok(known)
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("socket", &self.socket)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scriptable agent. The snapshot can be swapped between queries.
    pub struct FakeAgent {
        snapshot: Mutex<Result<StatusSnapshot, String>>,
        queries: AtomicUsize,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl FakeAgent {
        pub fn new(snapshot: StatusSnapshot) -> Arc<Self> {
            Self::with_delay(snapshot, Duration::ZERO)
        }

        pub fn with_delay(snapshot: StatusSnapshot, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Mutex::new(Ok(snapshot)),
                queries: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay,
            })
        }

        pub fn failing(reason: &str) -> Arc<Self> {
            let agent = Self::new(StatusSnapshot::default());
            agent.set_failure(reason);
            agent
        }

        pub fn set_snapshot(&self, snapshot: StatusSnapshot) {
            *self.snapshot.lock().unwrap() = Ok(snapshot);
        }

        pub fn set_failure(&self, reason: &str) {
            *self.snapshot.lock().unwrap() = Err(reason.to_string());
        }

        pub fn query_count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for FakeAgent {
        async fn status(&self) -> Result<StatusSnapshot, AdmissionError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.snapshot
                .lock()
                .unwrap()
                .clone()
                .map_err(AdmissionError::Transport)
        }
    }

    /// Connector that hands out pre-registered fakes by socket file name.
    #[derive(Default)]
    pub struct FakeConnector {
        agents: Mutex<HashMap<String, Arc<FakeAgent>>>,
    }

    impl FakeConnector {
        pub fn register(&self, name: &str, agent: Arc<FakeAgent>) {
            self.agents.lock().unwrap().insert(name.to_string(), agent);
        }
    }

    impl StatusConnector for FakeConnector {
        fn connect(&self, socket: &Path) -> Arc<dyn StatusSource> {
            let name = socket
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match self.agents.lock().unwrap().get(&name) {
                Some(agent) => agent.clone(),
                None => FakeAgent::failing("no such agent"),
            }
        }
    }

    pub fn key(n: u8) -> NodeIdentity {
        NodeIdentity::from_bytes([n; 32])
    }
}
