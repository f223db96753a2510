//! Host entries tracked by the registry

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::identity::Identity;
use crate::liveness::LivenessExit;

/// Shared handle to a registry-owned host entry
pub type HostRef = Arc<HostEntry>;

/// Field values offered to the registry by a discovery source.
///
/// Absent values never overwrite present ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostUpdate {
    pub address: Option<String>,
    pub display_name: Option<String>,
    pub device_class: Option<String>,
}

impl HostUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_device_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = Some(class.into());
        self
    }
}

#[derive(Debug)]
struct HostState {
    address: Option<String>,
    display_name: Option<String>,
    device_class: Option<String>,
    last_refresh: Instant,
    dirty: bool,
}

/// A single tracked device
#[derive(Debug)]
pub struct HostEntry {
    identity: Identity,
    generation: u64,
    created_at: DateTime<Utc>,
    created_instant: Instant,
    state: Mutex<HostState>,
    liveness_task: JoinHandle<LivenessExit>,
}

impl HostEntry {
    pub(crate) fn new(
        identity: Identity,
        generation: u64,
        update: HostUpdate,
        liveness_task: JoinHandle<LivenessExit>,
    ) -> Self {
        let now = Instant::now();
        Self {
            identity,
            generation,
            created_at: Utc::now(),
            created_instant: now,
            state: Mutex::new(HostState {
                address: update.address,
                display_name: update.display_name,
                device_class: update.device_class,
                last_refresh: now,
                dirty: false,
            }),
            liveness_task,
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Registry sequence number; a re-created entry gets a new one
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wall-clock time the entry was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn address(&self) -> Option<String> {
        self.state().address.clone()
    }

    pub fn display_name(&self) -> Option<String> {
        self.state().display_name.clone()
    }

    pub fn device_class(&self) -> Option<String> {
        self.state().device_class.clone()
    }

    pub fn last_refresh(&self) -> Instant {
        self.state().last_refresh
    }

    /// Time since the last successful refresh
    pub fn dwell(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_refresh())
    }

    pub fn uptime(&self) -> Duration {
        Instant::now().saturating_duration_since(self.created_instant)
    }

    /// Read and clear the change flag.
    ///
    /// Expected to have a single consumer (the fleet monitor).
    pub fn take_dirty(&self) -> bool {
        std::mem::take(&mut self.state().dirty)
    }

    /// Whether the liveness supervisor for this entry is still running
    pub fn is_supervised(&self) -> bool {
        !self.liveness_task.is_finished()
    }

    /// Merge an update into the entry, returning whether any field changed.
    ///
    /// `last_refresh` moves forward even when nothing changed.
    pub(crate) fn merge(&self, update: HostUpdate, now: Instant) -> bool {
        let mut state = self.state();
        let mut changed = false;
        changed |= merge_field(&self.identity, "address", &mut state.address, update.address);
        changed |= merge_field(
            &self.identity,
            "display_name",
            &mut state.display_name,
            update.display_name,
        );
        changed |= merge_field(
            &self.identity,
            "device_class",
            &mut state.device_class,
            update.device_class,
        );
        if changed {
            state.dirty = true;
        }
        state.last_refresh = state.last_refresh.max(now);
        changed
    }
}

fn merge_field(
    identity: &Identity,
    field: &'static str,
    current: &mut Option<String>,
    offered: Option<String>,
) -> bool {
    match offered {
        Some(value) if current.as_deref() != Some(value.as_str()) => {
            debug!(
                mac = %identity,
                field,
                old = current.as_deref().unwrap_or("-"),
                new = %value,
                "Host field changed"
            );
            *current = Some(value);
            true
        }
        _ => false,
    }
}

impl fmt::Display for HostEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(
            f,
            "Host(mac={}, ip={}, name={}, uptime={}s)",
            self.identity,
            state.address.as_deref().unwrap_or("-"),
            state.display_name.as_deref().unwrap_or("-"),
            self.uptime().as_secs()
        )
    }
}
