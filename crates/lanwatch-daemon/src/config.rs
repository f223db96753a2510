//! Configuration loading and validation

use anyhow::{ensure, Context, Result};
use lanwatch_core::LivenessConfig;
use lanwatch_discovery::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub pipeline: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// nmap target, usually a CIDR range
    #[serde(default = "default_target")]
    pub target: String,
    /// Seconds between sweeps
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,
    /// Sweeps running longer than this yield nothing
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
    /// Pause after each discovered address, in milliseconds
    #[serde(default = "default_pace")]
    pub pace_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            interval_secs: default_scan_interval(),
            timeout_secs: default_command_timeout(),
            pace_ms: default_pace(),
        }
    }
}

fn default_target() -> String {
    "192.168.1.0/24".to_string()
}

fn default_scan_interval() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    60
}

fn default_pace() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Timeout for one `arp` lookup
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Merge router metadata into known hosts
    #[serde(default)]
    pub enabled: bool,
    /// Router endpoint returning the attached device list as JSON
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// JSON secrets file holding the router login
    #[serde(default = "default_secrets_path")]
    pub secrets_path: PathBuf,
    /// Key of the router entry inside the secrets file
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    #[serde(default = "default_enrich_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            secrets_path: default_secrets_path(),
            secret_key: default_secret_key(),
            interval_secs: default_enrich_interval(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_endpoint() -> String {
    "http://routerlogin.net/api/devices".to_string()
}

fn default_secrets_path() -> PathBuf {
    PathBuf::from("passwords.json")
}

fn default_secret_key() -> String {
    lanwatch_discovery::router::DEFAULT_SECRET_KEY.to_string()
}

fn default_enrich_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessSection {
    /// Seconds between staleness checks of one host
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// A host unrefreshed for longer than this is evicted
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_poll_interval() -> u64 {
    lanwatch_core::liveness::DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_stale_after() -> u64 {
    lanwatch_core::liveness::DEFAULT_STALE_AFTER.as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
        }
    }
}

fn default_monitor_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Capacity of each inter-stage queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to daily rotated files
    #[serde(default = "default_true")]
    pub file_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
    /// Rotated files to keep
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_enabled: true,
            directory: default_log_dir(),
            file_prefix: default_log_prefix(),
            max_files: default_max_files(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_prefix() -> String {
    "lanwatch".to_string()
}

fn default_max_files() -> usize {
    10
}

impl Config {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.scan.target.trim().is_empty(), "scan.target must not be empty");
        ensure!(self.scan.interval_secs > 0, "scan.interval_secs must be positive");
        ensure!(self.scan.timeout_secs > 0, "scan.timeout_secs must be positive");
        ensure!(self.resolver.timeout_secs > 0, "resolver.timeout_secs must be positive");
        if self.enrichment.enabled {
            ensure!(
                self.enrichment.interval_secs > 0,
                "enrichment.interval_secs must be positive"
            );
            ensure!(
                self.enrichment.timeout_secs > 0,
                "enrichment.timeout_secs must be positive"
            );
        }
        ensure!(
            self.liveness.poll_interval_secs > 0,
            "liveness.poll_interval_secs must be positive"
        );
        ensure!(
            self.liveness.stale_after_secs > 0,
            "liveness.stale_after_secs must be positive"
        );
        ensure!(self.monitor.interval_secs > 0, "monitor.interval_secs must be positive");
        ensure!(
            self.pipeline.queue_capacity > 0,
            "pipeline.queue_capacity must be positive"
        );
        if self.logging.file_enabled {
            ensure!(self.logging.max_files > 0, "logging.max_files must be positive");
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            scan_interval: Duration::from_secs(self.scan.interval_secs),
            scan_timeout: Duration::from_secs(self.scan.timeout_secs),
            scan_pace: Duration::from_millis(self.scan.pace_ms),
            enrich_interval: Duration::from_secs(self.enrichment.interval_secs),
            monitor_interval: Duration::from_secs(self.monitor.interval_secs),
            queue_capacity: self.pipeline.queue_capacity,
        }
    }

    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig {
            poll_interval: Duration::from_secs(self.liveness.poll_interval_secs),
            stale_after: Duration::from_secs(self.liveness.stale_after_secs),
        }
    }
}

/// Load configuration from file; `None` when the file does not exist
pub fn load_config(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(config))
}
