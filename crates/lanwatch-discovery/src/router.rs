//! Router metadata collaborators
//!
//! Routers know friendly names and connection types for attached devices.
//! The lookup is blocking and may be slow, so the enrichment stage runs it on
//! the blocking thread pool. Router data can be stale: it is only ever merged
//! into hosts the pipeline has already seen.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Well-known secret name holding the router credentials
pub const DEFAULT_SECRET_KEY: &str = "router";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to read secrets file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse secrets file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Secret {0:?} not found")]
    MissingSecret(String),
}

/// One device as reported by the router
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceRecord {
    /// Raw hardware address, not yet normalized
    pub mac: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type", alias = "device_class")]
    pub device_class: Option<String>,
}

/// Blocking source of device metadata
pub trait MetadataSource: Send + Sync {
    fn attached_devices(&self) -> anyhow::Result<Vec<DeviceRecord>>;
}

/// Router login
#[derive(Clone, Deserialize)]
pub struct RouterCredentials {
    #[serde(default = "default_username")]
    pub username: String,
    pub password: String,
}

fn default_username() -> String {
    "admin".to_string()
}

impl std::fmt::Debug for RouterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Load the credentials stored under `key` in a JSON secrets file such as
/// `{"router": {"password": "..."}}`
pub fn load_credentials(path: &Path, key: &str) -> Result<RouterCredentials, MetadataError> {
    let content = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let json_error = |source| MetadataError::Json {
        path: path.to_path_buf(),
        source,
    };

    let mut secrets: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&content).map_err(json_error)?;
    let secret = secrets
        .remove(key)
        .ok_or_else(|| MetadataError::MissingSecret(key.to_string()))?;
    serde_json::from_value(secret).map_err(json_error)
}

/// Router HTTP API client.
///
/// Fetches a JSON array of `{"mac", "name", "type"}` objects from `endpoint`
/// using basic auth. Credentials are re-read on every call so a rotated
/// password is picked up without a restart.
#[derive(Debug, Clone)]
pub struct RouterClient {
    endpoint: String,
    secrets_path: PathBuf,
    secret_key: String,
    timeout: Duration,
}

impl RouterClient {
    pub fn new(
        endpoint: impl Into<String>,
        secrets_path: impl Into<PathBuf>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            secrets_path: secrets_path.into(),
            secret_key: secret_key.into(),
            timeout,
        }
    }
}

impl MetadataSource for RouterClient {
    fn attached_devices(&self) -> anyhow::Result<Vec<DeviceRecord>> {
        let credentials = load_credentials(&self.secrets_path, &self.secret_key)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        let devices: Vec<DeviceRecord> = client
            .get(&self.endpoint)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()?
            .error_for_status()?
            .json()?;

        debug!(endpoint = %self.endpoint, devices = devices.len(), "Fetched router device list");
        Ok(devices)
    }
}
