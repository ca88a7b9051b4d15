//! Per-instance quorum client identity, persisted across restarts.
//!
//! The id file, not the hostname, is the identity: pod restarts change the
//! hostname but keep the volume. Keys and the received shard live next to it
//! so an instance that already registered can keep driving unseals without
//! ever talking to the registration endpoint again.

use std::path::{Path, PathBuf};

use sms_crypto::{files, pgp};

use crate::QuorumError;

const ID_FILE: &str = "id";
const PUB_KEY_FILE: &str = "pbkey";
const PRIV_KEY_FILE: &str = "prkey";
const SHARD_FILE: &str = "shard";

/// Stable identity of one quorum client instance.
#[derive(Debug)]
pub struct Identity {
    /// Generated-once UUID naming this instance.
    pub id: String,
    /// Base64-framed PGP public key; sent with registration.
    pub pub_key: String,
    /// Base64-framed PGP private key; decrypts the shard.
    pub priv_key: String,
    /// Encrypted shard received from the service, if registered.
    pub shard: Option<String>,
    dir: PathBuf,
}

impl Identity {
    /// Load the identity persisted under `dir`, generating and persisting
    /// any missing piece.
    pub fn load_or_create(dir: &Path) -> Result<Self, QuorumError> {
        let id = match files::read_trimmed(&dir.join(ID_FILE)) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!("no client id found, generating one");
                let id = uuid::Uuid::new_v4().to_string();
                files::write_owner_only(&dir.join(ID_FILE), &id)?;
                id
            }
        };

        let keys = files::read_trimmed(&dir.join(PRIV_KEY_FILE))
            .and_then(|priv_key| {
                files::read_trimmed(&dir.join(PUB_KEY_FILE)).map(|pub_key| (pub_key, priv_key))
            });
        let (pub_key, priv_key) = match keys {
            Ok(pair) => pair,
            Err(_) => {
                tracing::warn!("no keypair found, generating one");
                let (pub_key, priv_key) = pgp::generate_keypair()?;
                files::write_owner_only(&dir.join(PUB_KEY_FILE), &pub_key)?;
                files::write_owner_only(&dir.join(PRIV_KEY_FILE), &priv_key)?;
                (pub_key, priv_key)
            }
        };

        let shard = files::read_trimmed(&dir.join(SHARD_FILE)).ok();
        if shard.is_none() {
            tracing::warn!("no shard file found, will register with SMS");
        }

        Ok(Self {
            id,
            pub_key,
            priv_key,
            shard,
            dir: dir.to_path_buf(),
        })
    }

    /// Whether this instance already holds a shard.
    pub fn registered(&self) -> bool {
        self.shard.is_some()
    }

    /// Persist a freshly received shard and mark this instance registered.
    pub fn store_shard(&mut self, shard: &str) -> Result<(), QuorumError> {
        files::write_owner_only(&self.dir.join(SHARD_FILE), shard)?;
        self.shard = Some(shard.to_string());
        Ok(())
    }
}
