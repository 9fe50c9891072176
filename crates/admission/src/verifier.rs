//! Resolution of a node identity to the local agent that knows it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::StatusConnector;
use crate::cache::IdentityCache;
use crate::config::AdmissionConfig;
use crate::directory::AgentDirectory;
use crate::error::AdmissionError;
use crate::identity::NodeIdentity;
use crate::local_api::LocalApiConnector;

/// Owns the identity cache and the agent directory.
///
/// Constructed once at startup and shared with the HTTP layer behind an
/// `Arc`.
pub struct Verifier {
    cache: IdentityCache,
    directory: AgentDirectory,
    status_timeout: Duration,
    purge_interval: Duration,
}

impl Verifier {
    pub fn new(cache: IdentityCache, directory: AgentDirectory, status_timeout: Duration) -> Self {
        Self {
            purge_interval: cache.ttl(),
            cache,
            directory,
            status_timeout,
        }
    }

    /// Build a verifier that talks to real agents over their sockets.
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::with_connector(config, Arc::new(LocalApiConnector))
    }

    pub fn with_connector(config: &AdmissionConfig, connector: Arc<dyn StatusConnector>) -> Self {
        let cache = IdentityCache::new(config.expire_time);
        let directory = AgentDirectory::new(
            config.sockets_dir.clone(),
            config.expire_time,
            config.status_timeout,
            connector,
        );
        Self::new(cache, directory, config.status_timeout).with_purge_interval(config.purge_interval)
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Start background cache maintenance.
    pub async fn start(&self) -> Result<(), AdmissionError> {
        self.cache.start_purge(self.purge_interval).await
    }

    /// Stop background cache maintenance.
    pub async fn shutdown(&self) -> Result<(), AdmissionError> {
        self.cache.stop_purge().await
    }

    /// Socket path of the agent that knows `id`, or `None` if no agent does.
    ///
    /// A cached answer is re-checked against its agent before it is trusted;
    /// if the agent no longer vouches for `id` the entry is dropped and every
    /// agent is probed again.
    pub async fn resolve(&self, id: &NodeIdentity) -> Result<Option<PathBuf>, AdmissionError> {
        if let Some(cached) = self.cache.get(id) {
            match cached.verify_identity(id, self.status_timeout).await {
                Ok(true) => {
                    tracing::debug!(nodekey = %id, socket = %cached.socket().display(), "cache hit");
                    return Ok(Some(cached.socket().to_path_buf()));
                }
                Ok(false) => {
                    tracing::debug!(
                        nodekey = %id,
                        socket = %cached.socket().display(),
                        "cached agent no longer knows node, evicting"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        nodekey = %id,
                        socket = %cached.socket().display(),
                        error = %e,
                        "cached agent unreachable, evicting"
                    );
                }
            }
            self.cache.delete(id);
        }

        match self.directory.resolve(id).await? {
            Some(handle) => {
                let socket = handle.socket().to_path_buf();
                self.cache.set(*id, handle);
                Ok(Some(socket))
            }
            None => Ok(None),
        }
    }
}
