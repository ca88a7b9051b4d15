//! Quorum client: a long-running peer holding one encrypted shard of the
//! SMS master key.
//!
//! Each tick performs, strictly in order: seal-status poll, registration if
//! this instance holds no shard yet, then shard decrypt and unseal
//! submission. A transport failure skips the remainder of the tick; nothing
//! about the persisted state changes on failure, so the next sealed
//! observation retries.

pub mod cli;
pub mod client;
pub mod config;
pub mod identity;

use std::path::PathBuf;

use client::SmsClient;
use config::QuorumConfig;
use identity::Identity;
use sms_crypto::pgp;

/// Quorum client failures.
#[derive(Debug, thiserror::Error)]
pub enum QuorumError {
    /// Configuration is unreadable or invalid.
    #[error("config error: {0}")]
    Config(String),

    /// The service could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a failure status.
    #[error("service rejected request ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Service-provided error text.
        message: String,
    },

    /// A service response could not be decoded.
    #[error("malformed service response")]
    Decode,

    /// Key or shard crypto failed.
    #[error(transparent)]
    Crypto(#[from] sms_crypto::CryptoError),
}

/// Everything `run` needs, threaded explicitly from `main`.
pub struct QuorumOpts {
    /// Parsed configuration file.
    pub config: QuorumConfig,
    /// Root of the identity tree; per-instance files live under
    /// `<auth_dir>/<pod_name>/`.
    pub auth_dir: PathBuf,
    /// Directory name for this instance, normally the pod hostname.
    pub pod_name: String,
}

/// Load identity and drive the tick loop forever.
pub async fn run(opts: QuorumOpts) -> Result<(), QuorumError> {
    let interval = opts.config.poll_interval()?;
    let mut identity = Identity::load_or_create(&opts.auth_dir.join(&opts.pod_name))?;
    let client = SmsClient::new(&opts.config)?;

    tracing::info!(id = %identity.id, interval = ?interval, "quorum client started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = tick(&client, &mut identity).await {
            tracing::warn!(error = %e, "tick failed, retrying next interval");
        }
    }
}

/// One pass of the state machine: poll, maybe register, maybe unseal.
pub async fn tick(client: &SmsClient, identity: &mut Identity) -> Result<(), QuorumError> {
    let sealed = client.seal_status().await?;
    if !sealed {
        return Ok(());
    }

    if !identity.registered() {
        tracing::info!(id = %identity.id, "sealed and unregistered, registering with SMS");
        let shard = client.register(&identity.pub_key, &identity.id).await?;
        identity.store_shard(&shard)?;
    }

    let ciphertext = identity.shard.as_deref().ok_or(QuorumError::Decode)?;
    let plaintext = pgp::decrypt(ciphertext, &identity.priv_key)?;
    client.unseal(&plaintext).await?;
    tracing::info!(id = %identity.id, "unseal shard submitted");
    Ok(())
}
