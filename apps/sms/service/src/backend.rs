//! The secret backend: bootstrap of a sealed engine, role-based token
//! lifecycle, domain and secret CRUD, and the quorum shard handout.
//!
//! One instance exists per process. A single mutex guards token refresh,
//! role bootstrap, and shard-list mutation; data-path engine calls run
//! outside the lock so concurrent CRUD requests do not serialize on it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::engine::{EngineError, InitOpts, SealedKv};
use sms_crypto::{files, pgp};

/// Shards produced at engine initialization.
const SECRET_SHARES: u32 = 3;
/// Shards required to unseal.
const SECRET_THRESHOLD: u32 = 3;
/// Interval between engine init-status probes during bootstrap.
const INIT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Temp tokens are reissued after this long; the engine role mints them
/// with a 60 minute TTL, so a 50 minute window keeps a safety margin.
const TOKEN_REFRESH_WINDOW: Duration = Duration::from_secs(50 * 60);
/// TTL requested for approle-minted tokens.
const ROLE_TOKEN_TTL: &str = "60m";

/// A named namespace of secrets, realized as a KV mount.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SecretDomain {
    /// Server-generated id, also recorded in the internal domain.
    pub uuid: String,
    /// Mount leaf name.
    pub name: String,
}

/// A named secret: an opaque JSON document stored under a domain.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Secret {
    /// Path leaf under the domain mount.
    pub name: String,
    /// Uninterpreted key-value payload.
    pub values: Map<String, Value>,
}

/// Failures of backend operations, classified for the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Quorum registration arrived after the shard list was exhausted.
    #[error("Invalid operation")]
    InvalidOperation,

    /// The addressed domain or secret does not exist.
    #[error("not found")]
    NotFound,

    /// A domain with the requested name is already mounted.
    #[error("domain name already in use")]
    DomainExists,

    /// The engine is sealed; data operations are unavailable.
    #[error("backend is sealed")]
    Sealed,

    /// Domain creation was rolled back; the caller should retry.
    #[error("domain bookkeeping failed, please retry")]
    Retry,

    /// Token or role bootstrap could not complete.
    #[error("auth bootstrap incomplete: {0}")]
    Auth(&'static str),

    /// Unrecoverable bootstrap failure; the process must not serve.
    #[error("fatal: {0}")]
    Fatal(&'static str),

    /// Engine-level failure (transport or API).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Shard or token crypto failed, or credential persistence failed.
    #[error("crypto failure")]
    Crypto(#[from] sms_crypto::CryptoError),
}

/// Mutable backend state guarded by the backend mutex.
#[derive(Default)]
struct BackendState {
    init_role_done: bool,
    internal_mounted: bool,
    root_token: Option<String>,
    /// Encrypted shards awaiting handout; `None` once exhausted.
    shards: Option<Vec<String>>,
    /// Service PGP private key, held only while shards remain.
    service_priv_key: Option<String>,
    role_id: String,
    secret_id: String,
    temp_token: Option<String>,
    token_issued_at: Option<Instant>,
    #[cfg(test)]
    test_token_age: Option<Duration>,
}

/// Age of the current temp token, if any.
fn token_age(st: &BackendState) -> Option<Duration> {
    #[cfg(test)]
    if let Some(age) = st.test_token_age {
        return Some(age);
    }
    st.token_issued_at.map(|issued_at| issued_at.elapsed())
}

/// The secret backend over a sealable KV engine.
pub struct Backend {
    engine: Arc<dyn SealedKv>,
    auth_dir: PathBuf,
    policy_name: String,
    mount_prefix: String,
    internal_domain: String,
    role_name: String,
    state: Mutex<BackendState>,
}

impl Backend {
    /// Create a backend over `engine`. Role credentials are persisted under
    /// `auth_dir`; `root_token` seeds the bootstrap when the engine was
    /// initialized out of band.
    pub fn new(engine: Arc<dyn SealedKv>, auth_dir: PathBuf, root_token: Option<String>) -> Self {
        Self {
            engine,
            auth_dir,
            policy_name: "smsvaultpolicy".to_string(),
            mount_prefix: "sms".to_string(),
            internal_domain: "smsinternaldomain".to_string(),
            role_name: "sms-role".to_string(),
            state: Mutex::new(BackendState {
                root_token: root_token.filter(|t| !t.is_empty()),
                ..BackendState::default()
            }),
        }
    }

    /// Bootstrap the engine connection.
    ///
    /// Polls init status until the engine gives a definitive answer. A
    /// virgin engine is initialized with [`SECRET_SHARES`] shards, each
    /// encrypted to a service PGP key generated here and held only in
    /// memory; the root token comes back encrypted the same way.
    pub async fn init(&self) -> Result<(), BackendError> {
        let initialized = loop {
            match self.engine.init_status().await {
                Ok(status) => break status,
                Err(e) => {
                    tracing::warn!(error = %e, "engine not ready, retrying init status probe");
                    tokio::time::sleep(INIT_POLL_INTERVAL).await;
                }
            }
        };

        if initialized {
            tracing::info!("engine already initialized, skipping shard generation");
            return Ok(());
        }

        let (pub_b64, priv_b64) = pgp::generate_keypair()?;
        let output = self
            .engine
            .init(InitOpts {
                secret_shares: SECRET_SHARES,
                secret_threshold: SECRET_THRESHOLD,
                pgp_keys: vec![pub_b64.clone(); SECRET_SHARES as usize],
                root_token_pgp_key: pub_b64,
            })
            .await?;

        if output.keys.is_empty() || output.root_token.is_empty() {
            return Err(BackendError::Fatal("engine init returned an empty response"));
        }

        let root_token = pgp::decrypt(&output.root_token, &priv_b64)?;

        let mut st = self.state.lock().await;
        st.root_token = Some(root_token);
        st.shards = Some(output.keys);
        st.service_priv_key = Some(priv_b64);
        tracing::info!(shards = SECRET_SHARES, "engine initialized, awaiting quorum registration");
        Ok(())
    }

    /// Current seal state of the engine.
    pub async fn get_status(&self) -> Result<bool, BackendError> {
        let status = self.engine.seal_status().await?;
        Ok(status.sealed)
    }

    /// Submit one plaintext shard towards unsealing. Pure passthrough; the
    /// engine tracks threshold progress.
    pub async fn unseal(&self, shard: &str) -> Result<(), BackendError> {
        let status = self.engine.unseal(shard).await?;
        tracing::info!(progress = status.progress, sealed = status.sealed, "unseal shard accepted");
        Ok(())
    }

    /// Hand out one shard to a registering quorum client.
    ///
    /// Pops the newest remaining shard, decrypts it with the service key and
    /// re-encrypts it to the caller's public key. Once the list drains the
    /// service private key is dropped and further registrations fail.
    pub async fn register_quorum(&self, caller_pub_b64: &str) -> Result<String, BackendError> {
        let mut st = self.state.lock().await;

        let priv_key = st
            .service_priv_key
            .clone()
            .ok_or(BackendError::InvalidOperation)?;
        let shards = st
            .shards
            .as_mut()
            .filter(|s| !s.is_empty())
            .ok_or(BackendError::InvalidOperation)?;

        // LIFO: the Nth registration deterministically receives shard L-N.
        let ciphertext = shards.pop().ok_or(BackendError::InvalidOperation)?;
        let remaining = shards.len();

        let plaintext = pgp::decrypt(&ciphertext, &priv_key)?;
        let reencrypted = pgp::encrypt(&plaintext, caller_pub_b64)?;

        if remaining == 0 {
            st.shards = None;
            st.service_priv_key = None;
            tracing::info!("all shards handed out, dropping service private key");
        } else {
            tracing::info!(remaining, "shard handed out");
        }

        Ok(reencrypted)
    }

    /// Create a domain: mount a KV store at `<prefix>/<name>` and record the
    /// generated UUID in the internal domain. If the record write fails the
    /// mount is rolled back so the operation can be retried atomically.
    pub async fn create_secret_domain(&self, name: &str) -> Result<SecretDomain, BackendError> {
        let name = name.trim();
        let token = self.check_token().await?;

        let mount_path = format!("{}/{}", self.mount_prefix, name);
        match self
            .engine
            .mount(&token, &mount_path, &format!("Mount point for domain: {name}"))
            .await
        {
            Ok(()) => {}
            Err(EngineError::Api { message, .. }) if message.contains("existing mount") => {
                return Err(BackendError::DomainExists)
            }
            Err(e) => return Err(map_data_err(e)),
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.write_internal_record(&token, name, &uuid).await {
            tracing::warn!(domain = name, error = %e, "internal record write failed, rolling back mount");
            if let Err(e) = self.engine.unmount(&token, &mount_path).await {
                tracing::error!(domain = name, error = %e, "rollback unmount failed");
            }
            return Err(BackendError::Retry);
        }

        Ok(SecretDomain {
            uuid,
            name: name.to_string(),
        })
    }

    /// Record `<name> -> uuid` inside the internal housekeeping domain,
    /// mounting it on first use.
    async fn write_internal_record(
        &self,
        token: &str,
        name: &str,
        uuid: &str,
    ) -> Result<(), BackendError> {
        let internal_path = format!("{}/{}", self.mount_prefix, self.internal_domain);

        let needs_mount = {
            let st = self.state.lock().await;
            !st.internal_mounted
        };
        if needs_mount {
            match self
                .engine
                .mount(&token, &internal_path, "SMS internal bookkeeping")
                .await
            {
                // A mount surviving from an earlier run is success.
                Ok(()) => {}
                Err(EngineError::Api { message, .. }) if message.contains("existing mount") => {}
                Err(e) => return Err(map_data_err(e)),
            }
            self.state.lock().await.internal_mounted = true;
        }

        let mut record = Map::new();
        record.insert("uuid".to_string(), Value::String(uuid.to_string()));
        self.engine
            .write(&token, &format!("{internal_path}/{name}"), &record)
            .await
            .map_err(map_data_err)
    }

    /// Delete a domain by unmounting it. The internal UUID record is
    /// intentionally left in place.
    pub async fn delete_secret_domain(&self, name: &str) -> Result<(), BackendError> {
        let name = name.trim();
        let token = self.check_token().await?;
        self.engine
            .unmount(&token, &format!("{}/{}", self.mount_prefix, name))
            .await
            .map_err(map_data_err)
    }

    /// Store a secret under `domain`.
    pub async fn create_secret(&self, domain: &str, secret: &Secret) -> Result<(), BackendError> {
        let token = self.check_token().await?;
        self.engine
            .write(&token, &self.secret_path(domain, &secret.name), &secret.values)
            .await
            .map_err(map_data_err)
    }

    /// Fetch a secret by domain and name.
    pub async fn get_secret(&self, domain: &str, name: &str) -> Result<Secret, BackendError> {
        let token = self.check_token().await?;
        let values = self
            .engine
            .read(&token, &self.secret_path(domain, name))
            .await
            .map_err(map_data_err)?;
        Ok(Secret {
            name: name.to_string(),
            values,
        })
    }

    /// List the names of secrets stored under `domain`.
    pub async fn list_secret(&self, domain: &str) -> Result<Vec<String>, BackendError> {
        let token = self.check_token().await?;
        self.engine
            .list(&token, &format!("{}/{}", self.mount_prefix, domain.trim()))
            .await
            .map_err(map_data_err)
    }

    /// Delete a secret by domain and name.
    pub async fn delete_secret(&self, domain: &str, name: &str) -> Result<(), BackendError> {
        let token = self.check_token().await?;
        self.engine
            .delete(&token, &self.secret_path(domain, name))
            .await
            .map_err(map_data_err)
    }

    fn secret_path(&self, domain: &str, name: &str) -> String {
        format!("{}/{}/{}", self.mount_prefix, domain.trim(), name.trim())
    }

    /// Ensure a live temp token, reissuing via approle login when the
    /// current one is past the refresh window. Serialized by the backend
    /// mutex so concurrent requests cannot race a refresh.
    async fn check_token(&self) -> Result<String, BackendError> {
        let mut st = self.state.lock().await;
        self.init_role(&mut st).await?;

        if let (Some(token), Some(age)) = (&st.temp_token, token_age(&st)) {
            if age < TOKEN_REFRESH_WINDOW {
                return Ok(token.clone());
            }
        }

        let token = self
            .engine
            .approle_login(&st.role_id, &st.secret_id)
            .await?;
        st.temp_token = Some(token.clone());
        st.token_issued_at = Some(Instant::now());
        #[cfg(test)]
        {
            st.test_token_age = None;
        }
        tracing::info!("issued fresh approle token");
        Ok(token)
    }

    /// One-time role bootstrap. Idempotent: short-circuits when already done
    /// in this process or when credentials survive on disk from an earlier
    /// run. Otherwise installs the service policy and approle with the root
    /// token, persists the credentials, and revokes the root token. Any
    /// failure leaves the done-flag clear so the next caller retries.
    async fn init_role(&self, st: &mut BackendState) -> Result<(), BackendError> {
        if st.init_role_done {
            return Ok(());
        }

        let role_path = self.auth_dir.join("role");
        let secret_path = self.auth_dir.join("secret");
        if role_path.exists() && secret_path.exists() {
            st.role_id = files::read_trimmed(&role_path)?;
            st.secret_id = files::read_trimmed(&secret_path)?;
            st.init_role_done = true;
            tracing::info!("role credentials restored from disk");
            return Ok(());
        }

        let root = st
            .root_token
            .clone()
            .ok_or(BackendError::Auth("no root token available for role bootstrap"))?;

        let rules = format!(
            "path \"{prefix}/*\" {{ capabilities = [\"create\", \"read\", \"update\", \"delete\", \"list\"] }}\n\
             path \"sys/mounts/{prefix}*\" {{ capabilities = [\"update\", \"delete\", \"create\"] }}",
            prefix = self.mount_prefix
        );
        self.engine
            .put_policy(&root, &self.policy_name, &rules)
            .await?;

        // An earlier partial bootstrap may have left approle enabled.
        let auth_methods = self.engine.list_auth(&root).await?;
        if !auth_methods.iter().any(|m| m.starts_with("approle")) {
            match self.engine.enable_approle(&root).await {
                Ok(()) => {}
                Err(EngineError::Api { message, .. }) if message.contains("already in use") => {}
                Err(e) => return Err(e.into()),
            }
        }

        let policies = vec!["default".to_string(), self.policy_name.clone()];
        self.engine
            .create_role(&root, &self.role_name, ROLE_TOKEN_TTL, &policies)
            .await?;
        let role_id = self.engine.read_role_id(&root, &self.role_name).await?;
        let secret_id = self
            .engine
            .generate_secret_id(&root, &self.role_name)
            .await?;

        files::write_owner_only(&role_path, &role_id)?;
        files::write_owner_only(&secret_path, &secret_id)?;

        self.engine.revoke_token(&root, &root).await?;

        st.role_id = role_id;
        st.secret_id = secret_id;
        st.root_token = None;
        st.init_role_done = true;
        tracing::info!("role bootstrap complete, root token revoked");
        Ok(())
    }

    /// Test hook: pretend the current temp token is `age` old.
    #[cfg(test)]
    pub(crate) async fn age_token(&self, age: Duration) {
        self.state.lock().await.test_token_age = Some(age);
    }
}

fn map_data_err(e: EngineError) -> BackendError {
    match e {
        EngineError::NotFound => BackendError::NotFound,
        EngineError::Sealed => BackendError::Sealed,
        other => BackendError::Engine(other),
    }
}
