//! Discovery error types

use thiserror::Error;

/// Soft failure of an external probe. Logged and skipped, never fatal.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
    #[error("`{command}` exited with status {status}: {stderr}")]
    ExitStatus {
        command: String,
        status: i32,
        stderr: String,
    },
}

/// Fatal pipeline errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// A probe succeeded but its output did not have the expected shape.
    /// The environment no longer matches what the parser was written for.
    #[error("Unrecognized resolver output for {address}: {output:?}")]
    ShapeViolation { address: String, output: String },
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("Pipeline stage {0} panicked")]
    StagePanicked(&'static str),
}
