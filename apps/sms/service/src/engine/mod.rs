//! Capability surface of the sealable key-value engine.
//!
//! The backend only ever talks to the engine through [`SealedKv`]; the
//! concrete transport ([`http::HttpKv`] in production, an in-memory engine
//! in tests) never leaks past this module.

pub mod http;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Engine-level failures, classified the way the backend needs to react to
/// them.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine could not be reached at all.
    #[error("engine unreachable: {0}")]
    Transport(String),

    /// The engine answered but rejected the request.
    #[error("engine rejected request ({status}): {message}")]
    Api {
        /// HTTP status returned by the engine.
        status: u16,
        /// Engine-provided error text.
        message: String,
    },

    /// The addressed path, mount, or role does not exist.
    #[error("path not found")]
    NotFound,

    /// The engine is sealed and cannot serve data requests.
    #[error("engine is sealed")]
    Sealed,

    /// The engine response could not be decoded.
    #[error("malformed engine response")]
    Decode,
}

/// Parameters for one-time engine initialization.
#[derive(Debug, Clone, Serialize)]
pub struct InitOpts {
    /// Number of master-key shards to produce.
    pub secret_shares: u32,
    /// Shards required to unseal.
    pub secret_threshold: u32,
    /// One PGP public key (base64 framed) per shard; each produced shard
    /// comes back encrypted to the matching key.
    pub pgp_keys: Vec<String>,
    /// PGP public key the root token is encrypted to.
    pub root_token_pgp_key: String,
}

/// Result of engine initialization.
#[derive(Debug, Clone, Deserialize)]
pub struct InitOutput {
    /// Encrypted shards, base64 framed, one per requested share.
    pub keys: Vec<String>,
    /// Encrypted root token, base64 framed.
    pub root_token: String,
}

/// Seal-state report.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SealStatus {
    /// Whether the engine currently refuses data operations.
    pub sealed: bool,
    /// Shards required to unseal.
    #[serde(default)]
    pub t: u32,
    /// Total shards produced at init.
    #[serde(default)]
    pub n: u32,
    /// Valid shards submitted so far in the current unseal attempt.
    #[serde(default)]
    pub progress: u32,
}

/// The opaque sealable KV capability the secret backend builds on.
///
/// Calls that require authentication take the token explicitly; the engine
/// client itself is stateless with respect to identity.
#[async_trait]
pub trait SealedKv: Send + Sync {
    /// Whether the engine has ever been initialized.
    async fn init_status(&self) -> Result<bool, EngineError>;

    /// One-time initialization producing encrypted shards and root token.
    async fn init(&self, opts: InitOpts) -> Result<InitOutput, EngineError>;

    /// Current seal state.
    async fn seal_status(&self) -> Result<SealStatus, EngineError>;

    /// Submit one plaintext shard towards unsealing.
    async fn unseal(&self, shard: &str) -> Result<SealStatus, EngineError>;

    /// Mount a KV store at `path`.
    async fn mount(&self, token: &str, path: &str, description: &str) -> Result<(), EngineError>;

    /// Remove the mount at `path`.
    async fn unmount(&self, token: &str, path: &str) -> Result<(), EngineError>;

    /// List enabled auth methods by mount point.
    async fn list_auth(&self, token: &str) -> Result<Vec<String>, EngineError>;

    /// Enable the approle auth method; enabling an already-enabled method is
    /// an engine-side error surfaced as [`EngineError::Api`].
    async fn enable_approle(&self, token: &str) -> Result<(), EngineError>;

    /// Install or replace a named ACL policy.
    async fn put_policy(&self, token: &str, name: &str, rules: &str) -> Result<(), EngineError>;

    /// Read the document at a logical path.
    async fn read(&self, token: &str, path: &str) -> Result<Map<String, Value>, EngineError>;

    /// Write a document to a logical path.
    async fn write(
        &self,
        token: &str,
        path: &str,
        data: &Map<String, Value>,
    ) -> Result<(), EngineError>;

    /// Delete the document at a logical path.
    async fn delete(&self, token: &str, path: &str) -> Result<(), EngineError>;

    /// List child names under a logical path.
    async fn list(&self, token: &str, path: &str) -> Result<Vec<String>, EngineError>;

    /// Create or update an approle role.
    async fn create_role(
        &self,
        token: &str,
        role: &str,
        token_ttl: &str,
        policies: &[String],
    ) -> Result<(), EngineError>;

    /// Read the role-id of an approle role.
    async fn read_role_id(&self, token: &str, role: &str) -> Result<String, EngineError>;

    /// Mint a fresh secret-id for an approle role.
    async fn generate_secret_id(&self, token: &str, role: &str) -> Result<String, EngineError>;

    /// Exchange a (role-id, secret-id) pair for a short-lived token.
    async fn approle_login(&self, role_id: &str, secret_id: &str) -> Result<String, EngineError>;

    /// Revoke a token.
    async fn revoke_token(&self, token: &str, revoke: &str) -> Result<(), EngineError>;
}
