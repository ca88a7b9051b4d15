//! Quorum client configuration file handling.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::QuorumError;

/// JSON configuration for a quorum client instance.
#[derive(Debug, Clone, Deserialize)]
pub struct QuorumConfig {
    /// Base URL of the SMS service.
    pub url: String,
    /// CA bundle for verifying the service certificate.
    #[serde(default)]
    pub cafile: String,
    /// Client certificate presented to the service (PEM).
    #[serde(default)]
    pub clientcert: String,
    /// Client private key (PEM).
    #[serde(default)]
    pub clientkey: String,
    /// Poll interval, e.g. `"30s"`.
    pub timeout: String,
    /// Talk plain HTTP; development only.
    #[serde(default)]
    pub disable_tls: bool,
}

impl QuorumConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, QuorumError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| QuorumError::Config(format!("unable to read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| QuorumError::Config(format!("unable to parse {}: {e}", path.display())))
    }

    /// The poll interval parsed as a duration.
    pub fn poll_interval(&self) -> Result<Duration, QuorumError> {
        humantime::parse_duration(&self.timeout)
            .map_err(|e| QuorumError::Config(format!("bad timeout {:?}: {e}", self.timeout)))
    }
}
