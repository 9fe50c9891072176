//! Time-bounded memory of which agent vouched for which node.
//!
//! Entries expire a fixed TTL after insertion; reads never extend them. A
//! background task purges expired entries so idle keys do not accumulate
//! between requests.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::agent::AgentHandle;
use crate::error::AdmissionError;
use crate::identity::NodeIdentity;

struct CacheEntry {
    handle: Arc<AgentHandle>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct PurgeTask {
    shutdown_tx: watch::Sender<()>,
    join: JoinHandle<()>,
}

pub struct IdentityCache {
    entries: Arc<DashMap<NodeIdentity, CacheEntry>>,
    ttl: Duration,
    purge: Mutex<Option<PurgeTask>>,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            purge: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The agent that last affirmed `id`, if that was less than one TTL ago.
    pub fn get(&self, id: &NodeIdentity) -> Option<Arc<AgentHandle>> {
        let now = Instant::now();
        {
            let entry = self.entries.get(id)?;
            if entry.is_live(now) {
                return Some(entry.handle.clone());
            }
        }
        self.entries.remove_if(id, |_, entry| !entry.is_live(now));
        None
    }

    /// Insert or overwrite, restarting the TTL.
    pub fn set(&self, id: NodeIdentity, handle: Arc<AgentHandle>) {
        self.entries.insert(
            id,
            CacheEntry {
                handle,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn delete(&self, id: &NodeIdentity) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Entries currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge_expired(&self.entries)
    }

    /// Spawn the periodic purge task on the current runtime.
    pub async fn start_purge(&self, interval: Duration) -> Result<(), AdmissionError> {
        if interval.is_zero() {
            return Err(AdmissionError::Config(
                "purge interval must be greater than zero".to_string(),
            ));
        }

        let mut purge = self.purge.lock().await;
        if purge.is_some() {
            return Err(AdmissionError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let entries = self.entries.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = purge_expired(&entries);
                        if removed > 0 {
                            tracing::debug!(removed, remaining = entries.len(), "purged expired identities");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        tracing::debug!(interval = ?interval, "identity cache purge started");
        *purge = Some(PurgeTask { shutdown_tx, join });
        Ok(())
    }

    /// Stop the purge task and wait for it to exit.
    pub async fn stop_purge(&self) -> Result<(), AdmissionError> {
        let task = self.purge.lock().await.take();
        match task {
            Some(task) => {
                let _ = task.shutdown_tx.send(());
                if let Err(e) = task.join.await {
                    tracing::warn!(error = %e, "identity cache purge task ended abnormally");
                }
                tracing::debug!("identity cache purge stopped");
                Ok(())
            }
            None => Err(AdmissionError::NotRunning),
        }
    }

    pub async fn is_purging(&self) -> bool {
        self.purge.lock().await.is_some()
    }
}

fn purge_expired(entries: &DashMap<NodeIdentity, CacheEntry>) -> usize {
    let now = Instant::now();
    let mut removed = 0;
    entries.retain(|_, entry| {
        let live = entry.is_live(now);
        if !live {
            removed += 1;
        }
        live
    });
    removed
}
