//! Per-host liveness supervision
//!
//! Every host entry gets exactly one supervisor task, spawned by the
//! registry when the entry is created. The supervisor wakes on a fixed poll
//! interval and asks the registry to evict its entry once the entry's dwell
//! time (time since last refresh) exceeds the staleness threshold. It holds
//! only the identity and generation of its entry, never the entry itself.
//!
//! Shutdown is global, not a per-host death: a cancelled supervisor exits
//! without touching the registry.

use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::identity::Identity;
use crate::registry::{Eviction, HostRegistry};
use crate::tasks::TaskOutcome;

/// Default poll interval between staleness checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Default dwell after which a silent host is evicted
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

/// Liveness supervision timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often each supervisor checks its entry
    pub poll_interval: Duration,
    /// Dwell time after which the entry is evicted
    pub stale_after: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Why a liveness supervisor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessExit {
    /// The entry went stale and was removed from the registry
    Evicted,
    /// Shutdown was requested; the entry was left in place
    Cancelled,
    /// The entry disappeared or was replaced by a newer generation
    Orphaned,
}

impl TaskOutcome for LivenessExit {
    fn was_cancelled(&self) -> bool {
        matches!(self, LivenessExit::Cancelled)
    }
}

pub(crate) async fn supervise(
    registry: HostRegistry,
    identity: Identity,
    generation: u64,
    config: LivenessConfig,
    cancel: CancellationToken,
) -> LivenessExit {
    let mut ticker = interval_at(Instant::now() + config.poll_interval, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(mac = %identity, generation, "Liveness supervisor started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let eviction = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            eviction = registry.evict_if_stale(&identity, generation, config.stale_after) => eviction,
        };

        match eviction {
            Eviction::Fresh { dwell } => {
                trace!(mac = %identity, dwell_secs = dwell.as_secs(), "Host still fresh");
            }
            Eviction::Evicted(host) => {
                warn!(
                    host = %host,
                    dwell_secs = host.dwell().as_secs(),
                    "Host went silent, evicted"
                );
                return LivenessExit::Evicted;
            }
            Eviction::Missing => {
                debug!(mac = %identity, generation, "Host entry gone, supervisor exiting");
                return LivenessExit::Orphaned;
            }
            Eviction::ShuttingDown => break,
        }
    }

    debug!(mac = %identity, "Liveness supervisor cancelled");
    LivenessExit::Cancelled
}
