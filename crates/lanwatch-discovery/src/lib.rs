//! lanwatch discovery - the pipeline that feeds the host registry
//!
//! This crate provides:
//! - Collaborator traits for sweeping, ARP resolution and router metadata,
//!   with default implementations backed by `nmap`, `arp` and a router HTTP API
//! - Bounded inter-stage queues with observable depth
//! - The four-stage discovery pipeline (scan, resolve, assemble, enrich)
//! - The fleet monitor reporting arrivals, departures and changes

pub mod arp;
pub mod command;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod router;
pub mod scanner;

pub use arp::{AddressResolver, ArpResolver, Resolution};
pub use error::{DiscoveryError, ProbeError};
pub use monitor::{FleetMonitor, FleetReport};
pub use pipeline::{Collaborators, Pipeline, PipelineConfig, ResolvedHost, Stage, StageExit};
pub use router::{DeviceRecord, MetadataSource, RouterClient};
pub use scanner::{HostScanner, NmapScanner};
