//! The discovery pipeline
//!
//! Four long-running stages chained by bounded queues:
//!
//! ```text
//! scan --(addresses)--> resolve --(address, identity)--> assemble --> registry
//!                                                  enrich --merge only--^
//! ```
//!
//! plus the [`FleetMonitor`] watching the registry. Every stage observes the
//! same cancellation token at each suspension point and returns
//! [`StageExit::Cancelled`] without further side effects once it fires. A
//! fatal stage error cancels the token, so the remaining stages and all
//! liveness supervisors wind down too.

use lanwatch_core::{normalize, HostRegistry, HostUpdate, Identity, TaskOutcome, TaskStats};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::arp::{AddressResolver, Resolution};
use crate::error::DiscoveryError;
use crate::monitor::FleetMonitor;
use crate::queue::{self, QueueReceiver, QueueSender};
use crate::router::MetadataSource;
use crate::scanner::HostScanner;

/// Pipeline timing and sizing
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Period between network sweeps
    pub scan_interval: Duration,
    /// Upper bound on one sweep; a slower sweep yields no results
    pub scan_timeout: Duration,
    /// Pause after queueing each discovered address
    pub scan_pace: Duration,
    /// Period between router metadata fetches
    pub enrich_interval: Duration,
    /// Period between fleet monitor reports
    pub monitor_interval: Duration,
    /// Capacity of each inter-stage queue
    pub queue_capacity: usize,
}

impl PipelineConfig {
    /// Reject zero periods and capacities, which tokio channels and
    /// intervals cannot work with
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        let checks = [
            (self.scan_interval.is_zero(), "scan_interval must be positive"),
            (self.enrich_interval.is_zero(), "enrich_interval must be positive"),
            (self.monitor_interval.is_zero(), "monitor_interval must be positive"),
            (self.queue_capacity == 0, "queue_capacity must be positive"),
        ];
        match checks.into_iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(DiscoveryError::InvalidConfig(reason)),
            None => Ok(()),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            scan_timeout: Duration::from_secs(60),
            scan_pace: Duration::ZERO,
            enrich_interval: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(5),
            queue_capacity: 256,
        }
    }
}

/// External collaborators the stages call out to
#[derive(Clone)]
pub struct Collaborators {
    pub scanner: Arc<dyn HostScanner>,
    pub resolver: Arc<dyn AddressResolver>,
    /// Router metadata; enrichment is skipped when absent
    pub metadata: Option<Arc<dyn MetadataSource>>,
}

/// An address paired with the identity it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    pub address: String,
    pub identity: Identity,
}

/// Why a stage stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageExit {
    /// Shutdown was requested
    Cancelled,
    /// The neighbouring stage went away
    Disconnected,
}

impl TaskOutcome for StageExit {
    fn was_cancelled(&self) -> bool {
        matches!(self, StageExit::Cancelled)
    }
}

pub type StageResult = Result<StageExit, DiscoveryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Scan,
    Resolve,
    Assemble,
    Enrich,
    Monitor,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Scan => "scan",
            Stage::Resolve => "resolve",
            Stage::Assemble => "assemble",
            Stage::Enrich => "enrich",
            Stage::Monitor => "monitor",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The assembled discovery pipeline
pub struct Pipeline {
    config: PipelineConfig,
    registry: HostRegistry,
    collaborators: Collaborators,
    cancel: CancellationToken,
}

impl Pipeline {
    /// `cancel` is the process-wide shutdown signal. When the pipeline stops
    /// it also cancels the registry's own shutdown token, so the liveness
    /// supervisors stop with it even if that token is unrelated to `cancel`.
    pub fn new(
        config: PipelineConfig,
        registry: HostRegistry,
        collaborators: Collaborators,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            collaborators,
            cancel,
        }
    }

    /// Run every stage until cancelled or until one fails.
    ///
    /// Returns only after all stages and all liveness supervisors have
    /// stopped. The first fatal stage error is returned. An invalid
    /// configuration is rejected before anything is spawned.
    pub async fn run(self) -> Result<(), DiscoveryError> {
        let Self {
            config,
            registry,
            collaborators,
            cancel,
        } = self;

        config.validate()?;

        let (address_tx, address_rx, address_gauge) = queue::bounded(config.queue_capacity);
        let (resolved_tx, resolved_rx, resolved_gauge) = queue::bounded(config.queue_capacity);

        let mut stages = StageSet::new(registry.stats());

        stages.spawn(
            Stage::Scan,
            scan_stage(
                Arc::clone(&collaborators.scanner),
                address_tx,
                config.clone(),
                cancel.clone(),
            ),
        );
        stages.spawn(
            Stage::Resolve,
            resolve_stage(
                Arc::clone(&collaborators.resolver),
                address_rx,
                resolved_tx,
                cancel.clone(),
            ),
        );
        stages.spawn(
            Stage::Assemble,
            assemble_stage(registry.clone(), resolved_rx, cancel.clone()),
        );
        match &collaborators.metadata {
            Some(source) => stages.spawn(
                Stage::Enrich,
                enrich_stage(
                    registry.clone(),
                    Arc::clone(source),
                    config.enrich_interval,
                    cancel.clone(),
                ),
            ),
            None => info!("No router metadata source configured, enrichment disabled"),
        }
        let monitor = FleetMonitor::new(registry.clone(), address_gauge, resolved_gauge);
        stages.spawn(
            Stage::Monitor,
            monitor.run(config.monitor_interval, cancel.clone()),
        );

        info!(stages = stages.len(), "Discovery pipeline started");

        let failure = stages.join_all(&cancel).await;

        debug!("Waiting for liveness supervisors");
        registry.shutdown_token().cancel();
        registry.wait_supervisors().await;

        let counts = registry.stats().counts();
        info!(
            finished = counts.finished,
            cancelled = counts.cancelled,
            active = counts.active,
            "Discovery pipeline stopped"
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Stage tasks keyed by task id so a panic can be attributed
struct StageSet {
    tasks: JoinSet<StageResult>,
    names: HashMap<tokio::task::Id, Stage>,
    stats: Arc<TaskStats>,
}

impl StageSet {
    fn new(stats: Arc<TaskStats>) -> Self {
        Self {
            tasks: JoinSet::new(),
            names: HashMap::new(),
            stats,
        }
    }

    fn spawn<F>(&mut self, stage: Stage, task: F)
    where
        F: Future<Output = StageResult> + Send + 'static,
    {
        let handle = self.tasks.spawn(self.stats.instrument(task));
        self.names.insert(handle.id(), stage);
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Drain every stage, cancelling the rest on the first failure
    async fn join_all(&mut self, cancel: &CancellationToken) -> Option<DiscoveryError> {
        let mut failure = None;

        while let Some(joined) = self.tasks.join_next_with_id().await {
            match joined {
                Ok((id, Ok(exit))) => {
                    debug!(stage = self.stage(id), exit = ?exit, "Stage stopped");
                }
                Ok((id, Err(e))) => {
                    error!(stage = self.stage(id), error = %e, "Stage failed, stopping pipeline");
                    failure.get_or_insert(e);
                    cancel.cancel();
                }
                Err(e) => {
                    let stage = self.stage(e.id());
                    error!(stage, error = %e, "Stage panicked, stopping pipeline");
                    failure.get_or_insert(DiscoveryError::StagePanicked(stage));
                    cancel.cancel();
                }
            }
        }

        failure
    }

    fn stage(&self, id: tokio::task::Id) -> &'static str {
        self.names.get(&id).map_or("unknown", Stage::name)
    }
}

/// Sweep the network periodically and queue every address that answered
pub async fn scan_stage(
    scanner: Arc<dyn HostScanner>,
    addresses: QueueSender<String>,
    config: PipelineConfig,
    cancel: CancellationToken,
) -> StageResult {
    let mut ticker = interval(config.scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
            _ = ticker.tick() => {}
        }

        let sweep = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
            sweep = tokio::time::timeout(config.scan_timeout, scanner.sweep()) => sweep,
        };

        let found = match sweep {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(error = %e, "Sweep failed, no results this round");
                continue;
            }
            Err(_) => {
                warn!(
                    timeout_secs = config.scan_timeout.as_secs(),
                    "Sweep timed out, no results this round"
                );
                continue;
            }
        };

        debug!(found = found.len(), "Sweep finished");

        for address in found {
            debug!(ip = %address, "Active address");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
                sent = addresses.send(address) => {
                    if sent.is_err() {
                        return Ok(StageExit::Disconnected);
                    }
                }
            }

            if !config.scan_pace.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
                    _ = tokio::time::sleep(config.scan_pace) => {}
                }
            }
        }
    }
}

/// Resolve queued addresses to identities one at a time.
///
/// "Not found" and probe failures are skipped. Output the resolver cannot
/// parse is fatal: it means the environment changed under the parser.
pub async fn resolve_stage(
    resolver: Arc<dyn AddressResolver>,
    mut addresses: QueueReceiver<String>,
    resolved: QueueSender<ResolvedHost>,
    cancel: CancellationToken,
) -> StageResult {
    loop {
        let queried = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
            next = addresses.recv() => match next {
                Some(address) => address,
                None => return Ok(StageExit::Disconnected),
            },
        };

        let resolution = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
            resolution = resolver.resolve(&queried) => resolution,
        };

        let (address, mac) = match resolution {
            Resolution::Resolved { address, mac } => (address, mac),
            Resolution::NotFound => {
                debug!(ip = %queried, "No hardware address for address");
                continue;
            }
            Resolution::Failed(e) => {
                warn!(ip = %queried, error = %e, "Address resolution failed");
                continue;
            }
            Resolution::Unrecognized { output } => {
                return Err(DiscoveryError::ShapeViolation {
                    address: queried,
                    output,
                });
            }
        };

        let Some(identity) = normalize(&mac) else {
            debug!(ip = %address, mac = %mac, "Ignoring malformed hardware address");
            continue;
        };

        trace!(ip = %address, mac = %identity, "Resolved address");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
            sent = resolved.send(ResolvedHost { address, identity }) => {
                if sent.is_err() {
                    return Ok(StageExit::Disconnected);
                }
            }
        }
    }
}

/// Upsert resolved hosts into the registry; the only stage that creates
/// entries
pub async fn assemble_stage(
    registry: HostRegistry,
    mut resolved: QueueReceiver<ResolvedHost>,
    cancel: CancellationToken,
) -> StageResult {
    loop {
        let ResolvedHost { address, identity } = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
            next = resolved.recv() => match next {
                Some(host) => host,
                None => return Ok(StageExit::Disconnected),
            },
        };

        let host = registry
            .upsert(identity, HostUpdate::new().with_address(address))
            .await;
        trace!(host = %host, "Host refreshed");
    }
}

/// Periodically merge router metadata into hosts already in the registry
pub async fn enrich_stage(
    registry: HostRegistry,
    source: Arc<dyn MetadataSource>,
    period: Duration,
    cancel: CancellationToken,
) -> StageResult {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
            _ = ticker.tick() => {}
        }

        let fetch = {
            let source = Arc::clone(&source);
            tokio::task::spawn_blocking(move || source.attached_devices())
        };

        // an abandoned fetch finishes on the blocking pool and is discarded
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StageExit::Cancelled),
            joined = fetch => joined,
        };

        let records = match joined {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!(error = %e, "Router metadata fetch failed, no updates this round");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Router metadata fetch panicked, no updates this round");
                continue;
            }
        };

        let total = records.len();
        let mut merged = 0;
        for record in records {
            let Some(identity) = normalize(&record.mac) else {
                debug!(mac = %record.mac, "Ignoring malformed hardware address from router");
                continue;
            };

            let update = HostUpdate {
                address: None,
                display_name: record.name,
                device_class: record.device_class,
            };
            match registry.merge_existing(&identity, update).await {
                Some(_) => merged += 1,
                None => trace!(mac = %identity, "Router lists unknown host, ignoring"),
            }
        }

        debug!(records = total, merged, "Router metadata merged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use async_trait::async_trait;
    use lanwatch_core::LivenessConfig;
    use std::sync::Mutex;

    /// Resolver answering from a fixed script, one entry per call
    struct ScriptedResolver {
        script: Mutex<Vec<Resolution>>,
    }

    impl ScriptedResolver {
        fn new(mut script: Vec<Resolution>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
            })
        }
    }

    #[async_trait]
    impl AddressResolver for ScriptedResolver {
        async fn resolve(&self, _address: &str) -> Resolution {
            self.script.lock().unwrap().pop().unwrap_or(Resolution::NotFound)
        }
    }

    fn resolved(address: &str, mac: &str) -> Resolution {
        Resolution::Resolved {
            address: address.to_string(),
            mac: mac.to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_skips_soft_failures() {
        let resolver = ScriptedResolver::new(vec![
            Resolution::NotFound,
            Resolution::Failed(ProbeError::Timeout {
                command: "arp -a 10.0.0.2".to_string(),
                timeout_secs: 60,
            }),
            resolved("10.0.0.3", "<incomplete>"),
            resolved("10.0.0.4", "AA:bb:cc:00:11:22"),
        ]);
        let (address_tx, address_rx, _) = queue::bounded(8);
        let (resolved_tx, mut resolved_rx, _) = queue::bounded(8);
        for n in 1..=4 {
            address_tx.send(format!("10.0.0.{}", n)).await.unwrap();
        }
        drop(address_tx);

        let exit = resolve_stage(resolver, address_rx, resolved_tx, CancellationToken::new()).await;
        assert_eq!(exit.unwrap(), StageExit::Disconnected);

        let host = resolved_rx.recv().await.unwrap();
        assert_eq!(host.address, "10.0.0.4");
        assert_eq!(host.identity.as_str(), "aa:bb:cc:00:11:22");
        assert!(resolved_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_fails_loudly_on_unknown_output() {
        let resolver = ScriptedResolver::new(vec![Resolution::Unrecognized {
            output: "garbage".to_string(),
        }]);
        let (address_tx, address_rx, _) = queue::bounded(8);
        let (resolved_tx, _resolved_rx, _) = queue::bounded(8);
        address_tx.send("10.0.0.1".to_string()).await.unwrap();

        let exit = resolve_stage(resolver, address_rx, resolved_tx, CancellationToken::new()).await;
        match exit {
            Err(DiscoveryError::ShapeViolation { address, output }) => {
                assert_eq!(address, "10.0.0.1");
                assert_eq!(output, "garbage");
            }
            other => panic!("unexpected exit: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stages_stop_on_cancel() {
        let cancel = CancellationToken::new();
        let registry = HostRegistry::new(LivenessConfig::default(), cancel.clone());
        let (_resolved_tx, resolved_rx, _) = queue::bounded(8);

        let assemble = tokio::spawn(assemble_stage(registry, resolved_rx, cancel.clone()));
        cancel.cancel();
        assert_eq!(assemble.await.unwrap().unwrap(), StageExit::Cancelled);
    }

    #[tokio::test]
    async fn test_assemble_upserts_in_order() {
        let cancel = CancellationToken::new();
        let registry = HostRegistry::new(LivenessConfig::default(), cancel.clone());
        let (resolved_tx, resolved_rx, _) = queue::bounded(8);
        let identity = Identity::parse("aa:bb:cc:00:11:22").unwrap();
        for address in ["10.0.0.1", "10.0.0.2"] {
            resolved_tx
                .send(ResolvedHost {
                    address: address.to_string(),
                    identity: identity.clone(),
                })
                .await
                .unwrap();
        }
        drop(resolved_tx);

        let exit = assemble_stage(registry.clone(), resolved_rx, cancel.clone()).await;
        assert_eq!(exit.unwrap(), StageExit::Disconnected);

        let host = registry.get(&identity).await.unwrap();
        assert_eq!(host.address().as_deref(), Some("10.0.0.2"));
        assert!(host.take_dirty());
        assert_eq!(registry.len().await, 1);
        cancel.cancel();
    }

    #[test]
    fn test_config_rejects_zero_periods() {
        PipelineConfig::default().validate().unwrap();

        let config = PipelineConfig {
            monitor_interval: Duration::ZERO,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DiscoveryError::InvalidConfig(reason)) if reason.starts_with("monitor_interval")
        ));

        // pacing and sweep timeout may be zero
        let config = PipelineConfig {
            scan_pace: Duration::ZERO,
            scan_timeout: Duration::ZERO,
            ..PipelineConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_stage_exit_outcome() {
        assert!(StageExit::Cancelled.was_cancelled());
        assert!(!StageExit::Disconnected.was_cancelled());
        assert_eq!(Stage::Resolve.to_string(), "resolve");
    }
}
