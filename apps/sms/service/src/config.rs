//! Service configuration file handling.

use std::path::Path;

use serde::Deserialize;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("unable to read config file {0}")]
    Read(String, #[source] std::io::Error),

    /// The config file is not the expected JSON shape.
    #[error("unable to parse config file {0}")]
    Parse(String, #[source] serde_json::Error),

    /// No engine address is available from config or environment.
    #[error("no engine address configured")]
    MissingEngineAddress,
}

/// JSON configuration for the service process.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// CA bundle used for the client-cert pool.
    pub cafile: String,
    /// Server certificate chain (PEM).
    pub servercert: String,
    /// Server private key (PEM, optionally encrypted PKCS#8).
    pub serverkey: String,
    /// Base64-framed passphrase for an encrypted `serverkey`.
    #[serde(default)]
    pub password: String,
    /// Address of the sealable KV engine.
    #[serde(default)]
    pub smsdbaddress: String,
    /// Pre-provisioned root token for engines initialized out of band.
    #[serde(default)]
    pub vaulttoken: String,
    /// Serve plain HTTP; development only.
    #[serde(default)]
    pub disable_tls: bool,
    /// Environment variable consulted when `smsdbaddress` is empty.
    #[serde(default)]
    pub smsdburlenv: String,
}

impl ServiceConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(path.display().to_string(), e))
    }

    /// Resolve the engine address: the literal config value, or the contents
    /// of the environment variable named by `smsdburlenv`.
    pub fn engine_address(&self) -> Result<String, ConfigError> {
        if !self.smsdbaddress.is_empty() {
            return Ok(self.smsdbaddress.clone());
        }
        if !self.smsdburlenv.is_empty() {
            if let Ok(addr) = std::env::var(&self.smsdburlenv) {
                if !addr.is_empty() {
                    return Ok(addr);
                }
            }
        }
        Err(ConfigError::MissingEngineAddress)
    }
}
