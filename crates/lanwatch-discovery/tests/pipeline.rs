//! End-to-end pipeline tests with in-memory collaborators

use async_trait::async_trait;
use lanwatch_core::{normalize, HostRegistry, HostUpdate, Identity, LivenessConfig};
use lanwatch_discovery::{
    AddressResolver, Collaborators, DeviceRecord, DiscoveryError, HostScanner, MetadataSource,
    Pipeline, PipelineConfig, ProbeError, Resolution,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Returns its addresses on the first sweep and nothing afterwards
struct OneShotScanner {
    addresses: Mutex<Option<Vec<String>>>,
}

impl OneShotScanner {
    fn new(addresses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            addresses: Mutex::new(Some(addresses.iter().map(|a| a.to_string()).collect())),
        })
    }
}

#[async_trait]
impl HostScanner for OneShotScanner {
    async fn sweep(&self) -> Result<Vec<String>, ProbeError> {
        Ok(self.addresses.lock().unwrap().take().unwrap_or_default())
    }
}

/// Never finishes a sweep
#[derive(Default)]
struct HangingScanner {
    sweeps: AtomicUsize,
}

#[async_trait]
impl HostScanner for HangingScanner {
    async fn sweep(&self) -> Result<Vec<String>, ProbeError> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

enum Answer {
    Mac(&'static str),
    NotFound,
    Garbage,
}

/// Answers from a fixed address table
struct TableResolver {
    table: HashMap<&'static str, Answer>,
}

impl TableResolver {
    fn new(entries: Vec<(&'static str, Answer)>) -> Arc<Self> {
        Arc::new(Self {
            table: entries.into_iter().collect(),
        })
    }
}

#[async_trait]
impl AddressResolver for TableResolver {
    async fn resolve(&self, address: &str) -> Resolution {
        match self.table.get(address) {
            Some(Answer::Mac(mac)) => Resolution::Resolved {
                address: address.to_string(),
                mac: mac.to_string(),
            },
            Some(Answer::Garbage) => Resolution::Unrecognized {
                output: "something unexpected".to_string(),
            },
            Some(Answer::NotFound) | None => Resolution::NotFound,
        }
    }
}

/// Router stand-in returning a fixed device list
struct StaticRouter {
    records: Vec<DeviceRecord>,
    calls: AtomicUsize,
}

impl StaticRouter {
    fn new(records: Vec<DeviceRecord>) -> Arc<Self> {
        Arc::new(Self {
            records,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MetadataSource for StaticRouter {
    fn attached_devices(&self) -> anyhow::Result<Vec<DeviceRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

fn record(mac: &str, name: &str, class: &str) -> DeviceRecord {
    DeviceRecord {
        mac: mac.to_string(),
        name: Some(name.to_string()),
        device_class: Some(class.to_string()),
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        scan_interval: Duration::from_millis(50),
        scan_timeout: Duration::from_millis(100),
        scan_pace: Duration::ZERO,
        enrich_interval: Duration::from_millis(30),
        monitor_interval: Duration::from_millis(20),
        queue_capacity: 16,
    }
}

struct Harness {
    registry: HostRegistry,
    cancel: CancellationToken,
    pipeline: JoinHandle<Result<(), DiscoveryError>>,
}

fn start(collaborators: Collaborators) -> Harness {
    let cancel = CancellationToken::new();
    let registry = HostRegistry::new(LivenessConfig::default(), cancel.child_token());
    let pipeline = Pipeline::new(fast_config(), registry.clone(), collaborators, cancel.clone());
    Harness {
        registry,
        cancel,
        pipeline: tokio::spawn(pipeline.run()),
    }
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn mac(raw: &str) -> Identity {
    normalize(raw).unwrap()
}

#[tokio::test]
async fn test_discovered_address_becomes_host() {
    let harness = start(Collaborators {
        scanner: OneShotScanner::new(&["192.168.1.5"]),
        resolver: TableResolver::new(vec![("192.168.1.5", Answer::Mac("AA:bb:cc:00:11:22"))]),
        metadata: None,
    });
    let id = mac("aa:bb:cc:00:11:22");

    let registry = harness.registry.clone();
    eventually(|| {
        let registry = registry.clone();
        let id = id.clone();
        async move { registry.get(&id).await.is_some() }
    })
    .await;

    let host = harness.registry.get(&id).await.unwrap();
    assert_eq!(host.address().as_deref(), Some("192.168.1.5"));
    assert!(host.is_supervised());

    harness.cancel.cancel();
    harness.pipeline.await.unwrap().unwrap();

    // shutdown is not an eviction
    assert!(harness.registry.get(&id).await.is_some());
    assert!(!host.is_supervised());
    assert_eq!(harness.registry.supervisor_count(), 0);
    assert_eq!(harness.registry.stats().counts().active, 0);
}

#[tokio::test]
async fn test_soft_failures_do_not_stop_pipeline() {
    let harness = start(Collaborators {
        scanner: OneShotScanner::new(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
        resolver: TableResolver::new(vec![
            ("10.0.0.1", Answer::NotFound),
            ("10.0.0.2", Answer::Mac("<incomplete>")),
            ("10.0.0.3", Answer::Mac("aa:bb:cc:00:00:03")),
        ]),
        metadata: None,
    });

    let registry = harness.registry.clone();
    eventually(|| {
        let registry = registry.clone();
        async move { registry.get(&mac("aa:bb:cc:00:00:03")).await.is_some() }
    })
    .await;

    assert_eq!(harness.registry.len().await, 1);
    assert!(!harness.pipeline.is_finished());

    harness.cancel.cancel();
    harness.pipeline.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_enrichment_never_creates_hosts() {
    let router = StaticRouter::new(vec![record("de:ad:be:ef:00:01", "ghost", "wireless")]);
    let harness = start(Collaborators {
        scanner: OneShotScanner::new(&[]),
        resolver: TableResolver::new(Vec::new()),
        metadata: Some(router.clone()),
    });

    let calls = router.clone();
    eventually(|| {
        let calls = calls.clone();
        async move { calls.calls() >= 2 }
    })
    .await;

    assert_eq!(harness.registry.len().await, 0);

    harness.cancel.cancel();
    harness.pipeline.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_enrichment_names_known_hosts() {
    let router = StaticRouter::new(vec![
        record("AA:BB:CC:00:11:22", "nas", "wired"),
        record("not-a-mac", "broken", "wired"),
    ]);
    let harness = start(Collaborators {
        scanner: OneShotScanner::new(&["192.168.1.5"]),
        resolver: TableResolver::new(vec![("192.168.1.5", Answer::Mac("aa:bb:cc:00:11:22"))]),
        metadata: Some(router),
    });
    let id = mac("aa:bb:cc:00:11:22");

    let registry = harness.registry.clone();
    eventually(|| {
        let registry = registry.clone();
        let id = id.clone();
        async move {
            match registry.get(&id).await {
                Some(host) => host.display_name().as_deref() == Some("nas"),
                None => false,
            }
        }
    })
    .await;

    let host = harness.registry.get(&id).await.unwrap();
    assert_eq!(host.device_class().as_deref(), Some("wired"));
    assert_eq!(host.address().as_deref(), Some("192.168.1.5"));
    assert_eq!(harness.registry.len().await, 1);

    harness.cancel.cancel();
    harness.pipeline.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unrecognized_resolver_output_stops_pipeline() {
    let harness = start(Collaborators {
        scanner: OneShotScanner::new(&["192.168.1.9"]),
        resolver: TableResolver::new(vec![("192.168.1.9", Answer::Garbage)]),
        metadata: None,
    });

    let result = tokio::time::timeout(Duration::from_secs(5), harness.pipeline)
        .await
        .expect("pipeline did not stop")
        .unwrap();

    match result {
        Err(DiscoveryError::ShapeViolation { address, .. }) => assert_eq!(address, "192.168.1.9"),
        other => panic!("unexpected pipeline result: {:?}", other),
    }
    assert!(harness.cancel.is_cancelled());
}

#[tokio::test]
async fn test_failure_stops_supervisors_on_unrelated_token() {
    let registry_token = CancellationToken::new();
    let registry = HostRegistry::new(LivenessConfig::default(), registry_token.clone());
    registry
        .upsert(mac("aa:bb:cc:00:00:01"), HostUpdate::new().with_address("10.0.0.1"))
        .await;
    assert_eq!(registry.supervisor_count(), 1);

    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(
        fast_config(),
        registry.clone(),
        Collaborators {
            scanner: OneShotScanner::new(&["10.0.0.2", "10.0.0.3"]),
            resolver: TableResolver::new(vec![
                ("10.0.0.2", Answer::Mac("aa:bb:cc:00:00:02")),
                ("10.0.0.3", Answer::Garbage),
            ]),
            metadata: None,
        },
        cancel.clone(),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), pipeline.run())
        .await
        .expect("pipeline did not stop");

    assert!(matches!(result, Err(DiscoveryError::ShapeViolation { .. })));
    assert!(registry_token.is_cancelled());
    assert_eq!(registry.supervisor_count(), 0);
    // stopping is not evicting
    assert!(registry.get(&mac("aa:bb:cc:00:00:01")).await.is_some());
}

#[tokio::test]
async fn test_zero_queue_capacity_is_rejected() {
    let cancel = CancellationToken::new();
    let registry = HostRegistry::new(LivenessConfig::default(), cancel.child_token());
    let config = PipelineConfig {
        queue_capacity: 0,
        ..fast_config()
    };
    let pipeline = Pipeline::new(
        config,
        registry.clone(),
        Collaborators {
            scanner: OneShotScanner::new(&["10.0.0.1"]),
            resolver: TableResolver::new(Vec::new()),
            metadata: None,
        },
        cancel,
    );

    assert!(matches!(
        pipeline.run().await,
        Err(DiscoveryError::InvalidConfig(_))
    ));
    assert_eq!(registry.stats().counts().active, 0);
}

#[tokio::test]
async fn test_hanging_sweep_times_out_and_retries() {
    let scanner = Arc::new(HangingScanner::default());
    let harness = start(Collaborators {
        scanner: scanner.clone(),
        resolver: TableResolver::new(Vec::new()),
        metadata: None,
    });

    let sweeps = scanner.clone();
    eventually(|| {
        let sweeps = sweeps.clone();
        async move { sweeps.sweeps.load(Ordering::SeqCst) >= 2 }
    })
    .await;
    assert!(!harness.pipeline.is_finished());

    harness.cancel.cancel();
    harness.pipeline.await.unwrap().unwrap();
}
