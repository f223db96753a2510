//! Identity-keyed host registry
//!
//! The registry is the only shared mutable structure in lanwatch. It owns
//! every [`HostEntry`]; callers get [`HostRef`] handles. All mutation goes
//! through one registry-wide lock, so a reader never sees an entry halfway
//! through a merge and there is never more than one entry per identity.
//!
//! Two upsert flavours exist on purpose. [`HostRegistry::upsert`] may create
//! entries and is used by the assembler, which only sees addresses that
//! answered on the wire. [`HostRegistry::merge_existing`] never creates and is
//! used for router metadata, which can list devices that have long left.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::host::{HostEntry, HostRef, HostUpdate};
use crate::identity::Identity;
use crate::liveness::{supervise, LivenessConfig};
use crate::tasks::TaskStats;

/// Result of a supervisor's staleness check
#[derive(Debug)]
pub enum Eviction {
    /// The entry was refreshed recently enough
    Fresh { dwell: Duration },
    /// The entry was stale and has been removed
    Evicted(HostRef),
    /// No entry of the supervisor's generation exists
    Missing,
    /// Shutdown was requested; nothing was removed
    ShuttingDown,
}

struct RegistryInner {
    hosts: RwLock<HashMap<Identity, HostRef>>,
    next_generation: AtomicU64,
    liveness: LivenessConfig,
    shutdown: CancellationToken,
    supervisors: TaskTracker,
    stats: Arc<TaskStats>,
}

/// Process-scoped host registry; cloning yields another handle to the same
/// registry
#[derive(Clone)]
pub struct HostRegistry {
    inner: Arc<RegistryInner>,
}

impl HostRegistry {
    /// Create an empty registry.
    ///
    /// `shutdown` is observed by every liveness supervisor the registry
    /// spawns.
    pub fn new(liveness: LivenessConfig, shutdown: CancellationToken) -> Self {
        Self::with_stats(liveness, shutdown, TaskStats::new())
    }

    /// Create an empty registry whose supervisors report into `stats`
    pub fn with_stats(
        liveness: LivenessConfig,
        shutdown: CancellationToken,
        stats: Arc<TaskStats>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                hosts: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                liveness,
                shutdown,
                supervisors: TaskTracker::new(),
                stats,
            }),
        }
    }

    /// Token every liveness supervisor observes; cancelling it stops them
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<TaskStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Number of liveness supervisors still running
    pub fn supervisor_count(&self) -> usize {
        self.inner.supervisors.len()
    }

    /// Create the entry for `identity` or merge `update` into it
    pub async fn upsert(&self, identity: Identity, update: HostUpdate) -> HostRef {
        let now = Instant::now();
        let mut hosts = self.inner.hosts.write().await;

        if let Some(host) = hosts.get(&identity) {
            host.merge(update, now);
            return Arc::clone(host);
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let supervisor = self.inner.supervisors.spawn(self.inner.stats.instrument(supervise(
            self.clone(),
            identity.clone(),
            generation,
            self.inner.liveness,
            self.inner.shutdown.clone(),
        )));

        let host = Arc::new(HostEntry::new(identity.clone(), generation, update, supervisor));
        debug!(host = %host, generation, "New host created");
        hosts.insert(identity, Arc::clone(&host));
        host
    }

    /// Merge `update` into an existing entry; never creates one
    pub async fn merge_existing(&self, identity: &Identity, update: HostUpdate) -> Option<HostRef> {
        let now = Instant::now();
        let hosts = self.inner.hosts.write().await;
        let host = hosts.get(identity)?;
        host.merge(update, now);
        Some(Arc::clone(host))
    }

    pub async fn get(&self, identity: &Identity) -> Option<HostRef> {
        self.inner.hosts.read().await.get(identity).cloned()
    }

    /// Consistent point-in-time view of all entries
    pub async fn snapshot(&self) -> HashMap<Identity, HostRef> {
        self.inner.hosts.read().await.clone()
    }

    /// Remove an entry; a no-op returning `None` if it is already gone
    pub async fn remove(&self, identity: &Identity) -> Option<HostRef> {
        let removed = self.inner.hosts.write().await.remove(identity);
        if let Some(host) = &removed {
            info!(host = %host, "Host removed from registry");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.hosts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.hosts.read().await.is_empty()
    }

    /// Remove the entry of the given generation if its dwell exceeds
    /// `stale_after`.
    ///
    /// Dwell is computed under the write lock, so a refresh that lands
    /// before the lock is taken keeps the entry alive.
    pub(crate) async fn evict_if_stale(
        &self,
        identity: &Identity,
        generation: u64,
        stale_after: Duration,
    ) -> Eviction {
        let mut hosts = self.inner.hosts.write().await;

        if self.inner.shutdown.is_cancelled() {
            return Eviction::ShuttingDown;
        }

        let dwell = match hosts.get(identity) {
            Some(host) if host.generation() == generation => host.dwell(),
            _ => return Eviction::Missing,
        };

        if dwell <= stale_after {
            return Eviction::Fresh { dwell };
        }

        match hosts.remove(identity) {
            Some(host) => Eviction::Evicted(host),
            None => Eviction::Missing,
        }
    }

    /// Wait for every liveness supervisor to finish.
    ///
    /// Supervisors only finish on eviction or shutdown, so callers cancel
    /// the shutdown token first. Entries created after this returns still get
    /// supervisors.
    pub async fn wait_supervisors(&self) {
        let supervisors = &self.inner.supervisors;
        supervisors.close();
        supervisors.wait().await;
        supervisors.reopen();
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRegistry")
            .field("liveness", &self.inner.liveness)
            .field("supervisors", &self.inner.supervisors.len())
            .finish_non_exhaustive()
    }
}
