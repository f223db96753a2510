//! Fleet monitor: periodic, read-only report on the registry and pipeline

use lanwatch_core::{HostRef, HostRegistry, Identity, TaskCounts, TaskStats};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pipeline::{StageExit, StageResult};
use crate::queue::QueueGauge;

/// One monitor cycle's findings
#[derive(Debug, Clone)]
pub struct FleetReport {
    pub hosts: usize,
    /// Hosts present now but not in the previous cycle
    pub arrivals: Vec<HostRef>,
    /// Identities present in the previous cycle but gone now
    pub departures: Vec<Identity>,
    /// Hosts whose fields changed since they were last reported
    pub updated: Vec<HostRef>,
    pub address_queue: usize,
    pub resolved_queue: usize,
    pub tasks: TaskCounts,
}

impl FleetReport {
    pub fn membership_changed(&self) -> bool {
        !self.arrivals.is_empty() || !self.departures.is_empty()
    }
}

impl fmt::Display for FleetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "active: {} cancelled: {} done: {} address_queue: {} resolved_queue: {} hosts: {}",
            self.tasks.active,
            self.tasks.cancelled,
            self.tasks.finished,
            self.address_queue,
            self.resolved_queue,
            self.hosts
        )
    }
}

/// Watches registry membership and pipeline health
pub struct FleetMonitor {
    registry: HostRegistry,
    stats: Arc<TaskStats>,
    address_queue: QueueGauge,
    resolved_queue: QueueGauge,
    previous: HashSet<Identity>,
}

impl FleetMonitor {
    pub fn new(registry: HostRegistry, address_queue: QueueGauge, resolved_queue: QueueGauge) -> Self {
        Self {
            stats: registry.stats(),
            registry,
            address_queue,
            resolved_queue,
            previous: HashSet::new(),
        }
    }

    /// Take one report and log it.
    ///
    /// Clears the dirty flag of every host it reports as updated; otherwise
    /// leaves the registry untouched.
    pub async fn observe(&mut self) -> FleetReport {
        let snapshot = self.registry.snapshot().await;
        let current: HashSet<Identity> = snapshot.keys().cloned().collect();

        let mut departures: Vec<Identity> = self.previous.difference(&current).cloned().collect();
        departures.sort();

        let mut arrivals: Vec<HostRef> = current
            .difference(&self.previous)
            .filter_map(|identity| snapshot.get(identity).cloned())
            .collect();
        arrivals.sort_by(|a, b| a.identity().cmp(b.identity()));

        let mut updated: Vec<HostRef> = snapshot
            .values()
            .filter(|host| host.take_dirty())
            .cloned()
            .collect();
        updated.sort_by(|a, b| a.identity().cmp(b.identity()));

        let report = FleetReport {
            hosts: snapshot.len(),
            arrivals,
            departures,
            updated,
            address_queue: self.address_queue.depth(),
            resolved_queue: self.resolved_queue.depth(),
            tasks: self.stats.counts(),
        };

        debug!("{}", report);
        for mac in &report.departures {
            info!(mac = %mac, "Host departed");
        }
        for host in &report.arrivals {
            info!(host = %host, "Host arrived");
        }
        for host in &report.updated {
            info!(host = %host, "Host updated");
        }
        if report.membership_changed() {
            info!("{}", report);
        }

        self.previous = current;
        report
    }

    /// Report every `period` until cancelled
    pub async fn run(mut self, period: Duration, cancel: CancellationToken) -> StageResult {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
                _ = ticker.tick() => {}
            }
            self.observe().await;
        }
    }
}
