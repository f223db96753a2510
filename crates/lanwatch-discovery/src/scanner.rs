//! Subnet sweep collaborators
//!
//! A sweep produces the raw network addresses that answered. The default
//! implementation shells out to `nmap -sP` and reads its report lines.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::command::run_command;
use crate::error::ProbeError;

/// Source of raw addresses for the scan stage
#[async_trait]
pub trait HostScanner: Send + Sync {
    /// Sweep the network once, returning every address that answered
    async fn sweep(&self) -> Result<Vec<String>, ProbeError>;
}

const REPORT_PREFIX: &str = "Nmap scan report for";

/// Ping sweep using `nmap -sP <target>`
#[derive(Debug, Clone)]
pub struct NmapScanner {
    target: String,
    timeout: Duration,
}

impl NmapScanner {
    /// `target` is anything nmap accepts, e.g. `192.168.1.0/24`
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HostScanner for NmapScanner {
    async fn sweep(&self) -> Result<Vec<String>, ProbeError> {
        let output = run_command("nmap", &["-sP", &self.target], self.timeout)
            .await?
            .require_success()?;

        let addresses = parse_nmap_report(&output.stdout);
        debug!(target = %self.target, found = addresses.len(), "nmap sweep finished");
        Ok(addresses)
    }
}

/// Extract addresses from `nmap -sP` output
pub fn parse_nmap_report(stdout: &str) -> Vec<String> {
    stdout.lines().filter_map(parse_report_line).collect()
}

fn parse_report_line(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(REPORT_PREFIX)?.trim();
    if rest.is_empty() {
        return None;
    }

    // "hostname (address)" when nmap resolved a name
    let address = match (rest.rfind('('), rest.strip_suffix(')')) {
        (Some(open), Some(inner)) => &inner[open + 1..],
        _ => rest,
    };

    let address = address.trim();
    (!address.is_empty()).then(|| address.to_string())
}
