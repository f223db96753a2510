//! lanwatch core - host identity, registry and liveness supervision
//!
//! This crate provides the foundational types for lanwatch:
//! - Canonical hardware identities for deduplicating devices
//! - Host entries with merge-gated updates and change tracking
//! - The identity-keyed host registry
//! - Per-entry liveness supervisors that evict silent hosts

pub mod host;
pub mod identity;
pub mod liveness;
pub mod registry;
pub mod tasks;

pub use host::{HostEntry, HostRef, HostUpdate};
pub use identity::{normalize, Identity, IdentityError};
pub use liveness::{LivenessConfig, LivenessExit};
pub use registry::{Eviction, HostRegistry};
pub use tasks::{TaskCounts, TaskOutcome, TaskStats};
