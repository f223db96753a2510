//! Address to hardware identity resolution via the ARP cache

use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;

use crate::command::{run_command, CommandOutput};
use crate::error::ProbeError;

/// Outcome of resolving one network address
#[derive(Debug)]
pub enum Resolution {
    /// The probe answered with an address and a raw hardware address
    Resolved { address: String, mac: String },
    /// The probe ran but has no entry for the address
    NotFound,
    /// The probe itself failed (spawn error, timeout, non-zero exit)
    Failed(ProbeError),
    /// The probe succeeded but its output has an unknown shape
    Unrecognized { output: String },
}

/// Resolves network addresses to raw hardware addresses
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, address: &str) -> Resolution;
}

/// Resolver that asks the system `arp` utility
#[derive(Debug, Clone)]
pub struct ArpResolver {
    timeout: Duration,
}

impl ArpResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AddressResolver for ArpResolver {
    async fn resolve(&self, address: &str) -> Resolution {
        // BSD arp takes the host directly, net-tools wants -a
        let args: Vec<&str> = if cfg!(target_os = "macos") {
            vec![address]
        } else {
            vec!["-a", address]
        };

        let output = match run_command("arp", &args, self.timeout)
            .await
            .and_then(CommandOutput::require_success)
        {
            Ok(output) => output,
            Err(e) => return Resolution::Failed(e),
        };

        trace!(address, stdout = %output.stdout, "arp answered");
        parse_arp_output(&output.stdout)
    }
}

/// Interpret the output of a successful `arp` lookup
pub fn parse_arp_output(stdout: &str) -> Resolution {
    if stdout.contains("no match found") || stdout.contains("no entry") {
        return Resolution::NotFound;
    }

    match stdout.lines().find_map(parse_arp_line) {
        Some((address, mac)) => Resolution::Resolved { address, mac },
        None => Resolution::Unrecognized {
            output: stdout.trim().to_string(),
        },
    }
}

/// Parse a line of the form `? (192.168.1.5) at aa:bb:cc:00:11:22 [ether] on eth0`
fn parse_arp_line(line: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    // name, (address), "at", mac, and at least one trailing field
    if parts.len() < 5 || parts[2] != "at" {
        return None;
    }

    let address = parts[1].strip_prefix('(')?.strip_suffix(')')?;
    if address.is_empty() {
        return None;
    }

    Some((address.to_string(), parts[3].to_string()))
}
