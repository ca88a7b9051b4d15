//! In-memory [`SealedKv`] used by backend and handler unit tests.
//!
//! Implements just enough engine semantics to be honest about the contract:
//! real PGP encryption of shards at init, seal-state gating of data calls,
//! token validation, and mount bookkeeping.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{EngineError, InitOpts, InitOutput, SealStatus, SealedKv};
use sms_crypto::pgp;

#[derive(Default)]
struct MockState {
    initialized: bool,
    sealed: bool,
    threshold: u32,
    shares: u32,
    shard_plaintexts: Vec<String>,
    submitted: HashSet<String>,
    root_token: Option<String>,
    root_revoked: bool,
    temp_tokens: HashSet<String>,
    /// mount path -> (secret leaf -> document)
    mounts: BTreeMap<String, BTreeMap<String, Map<String, Value>>>,
    policies: BTreeMap<String, String>,
    roles: BTreeMap<String, (String, String)>,
    auth_methods: HashSet<String>,
    write_faults: HashSet<String>,
}

/// Configurable in-memory engine.
pub struct MockEngine {
    state: Mutex<MockState>,
    auto_unseal: bool,
    logins: AtomicUsize,
}

impl MockEngine {
    /// A virgin engine: uninitialized and sealed.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                sealed: true,
                ..MockState::default()
            }),
            auto_unseal: false,
            logins: AtomicUsize::new(0),
        }
    }

    /// A virgin engine that unseals itself as soon as it is initialized,
    /// for tests that exercise the data path rather than the quorum.
    pub fn new_unsealed() -> Self {
        Self {
            auto_unseal: true,
            ..Self::new()
        }
    }

    /// Mark the engine initialized out of band, as if by an earlier run.
    pub fn force_initialized(&self) {
        let mut st = self.state.lock().unwrap();
        st.initialized = true;
        st.sealed = false;
    }

    /// Force logical writes at `path` to fail until cleared.
    pub fn fail_writes_at(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .write_faults
            .insert(path.to_string());
    }

    /// Clear all forced write faults.
    pub fn clear_write_faults(&self) {
        self.state.lock().unwrap().write_faults.clear();
    }

    /// Whether a mount exists at `path`.
    pub fn has_mount(&self, path: &str) -> bool {
        self.state.lock().unwrap().mounts.contains_key(path)
    }

    /// All current mount paths.
    pub fn mount_names(&self) -> Vec<String> {
        self.state.lock().unwrap().mounts.keys().cloned().collect()
    }

    /// Number of approle logins served so far.
    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Whether the root token has been revoked.
    pub fn root_token_revoked(&self) -> bool {
        self.state.lock().unwrap().root_revoked
    }

    fn seal_status_locked(st: &MockState) -> SealStatus {
        SealStatus {
            sealed: st.sealed,
            t: st.threshold,
            n: st.shares,
            progress: st.submitted.len() as u32,
        }
    }

    fn check_token(st: &MockState, token: &str) -> Result<(), EngineError> {
        let is_root = st.root_token.as_deref() == Some(token) && !st.root_revoked;
        if is_root || st.temp_tokens.contains(token) {
            Ok(())
        } else {
            Err(EngineError::Api {
                status: 403,
                message: "permission denied".to_string(),
            })
        }
    }

    fn data_ready(st: &MockState, token: &str) -> Result<(), EngineError> {
        if st.sealed {
            return Err(EngineError::Sealed);
        }
        Self::check_token(st, token)
    }

    /// Resolve `path` to its mount and leaf.
    fn split_path<'a>(st: &MockState, path: &'a str) -> Option<(String, &'a str)> {
        st.mounts
            .keys()
            .filter(|mount| {
                path.len() > mount.len() + 1
                    && path.starts_with(mount.as_str())
                    && path.as_bytes()[mount.len()] == b'/'
            })
            .max_by_key(|mount| mount.len())
            .map(|mount| (mount.clone(), &path[mount.len() + 1..]))
    }
}

#[async_trait]
impl SealedKv for MockEngine {
    async fn init_status(&self) -> Result<bool, EngineError> {
        Ok(self.state.lock().unwrap().initialized)
    }

    async fn init(&self, opts: InitOpts) -> Result<InitOutput, EngineError> {
        let mut st = self.state.lock().unwrap();
        if st.initialized {
            return Err(EngineError::Api {
                status: 400,
                message: "engine is already initialized".to_string(),
            });
        }
        if opts.pgp_keys.len() != opts.secret_shares as usize {
            return Err(EngineError::Api {
                status: 400,
                message: "pgp key count must match share count".to_string(),
            });
        }

        let mut keys = Vec::with_capacity(opts.pgp_keys.len());
        for (i, pgp_key) in opts.pgp_keys.iter().enumerate() {
            let plaintext = format!("shard-{i}-{}", uuid::Uuid::new_v4());
            let ct = pgp::encrypt(&plaintext, pgp_key).map_err(|_| EngineError::Api {
                status: 400,
                message: "unusable pgp key".to_string(),
            })?;
            st.shard_plaintexts.push(plaintext);
            keys.push(ct);
        }

        let root_plain = format!("root-{}", uuid::Uuid::new_v4());
        let root_token =
            pgp::encrypt(&root_plain, &opts.root_token_pgp_key).map_err(|_| EngineError::Api {
                status: 400,
                message: "unusable root token pgp key".to_string(),
            })?;

        st.initialized = true;
        st.sealed = !self.auto_unseal;
        st.threshold = opts.secret_threshold;
        st.shares = opts.secret_shares;
        st.root_token = Some(root_plain);

        Ok(InitOutput { keys, root_token })
    }

    async fn seal_status(&self) -> Result<SealStatus, EngineError> {
        let st = self.state.lock().unwrap();
        Ok(Self::seal_status_locked(&st))
    }

    async fn unseal(&self, shard: &str) -> Result<SealStatus, EngineError> {
        let mut st = self.state.lock().unwrap();
        if !st.initialized {
            return Err(EngineError::Api {
                status: 400,
                message: "engine is not initialized".to_string(),
            });
        }
        if !st.sealed {
            return Ok(Self::seal_status_locked(&st));
        }
        if !st.shard_plaintexts.iter().any(|s| s == shard) {
            return Err(EngineError::Api {
                status: 400,
                message: "invalid unseal shard".to_string(),
            });
        }

        st.submitted.insert(shard.to_string());
        if st.submitted.len() as u32 >= st.threshold {
            st.sealed = false;
            st.submitted.clear();
        }
        Ok(Self::seal_status_locked(&st))
    }

    async fn mount(&self, token: &str, path: &str, _description: &str) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        if st.mounts.contains_key(path) {
            return Err(EngineError::Api {
                status: 400,
                message: format!("existing mount at {path}/"),
            });
        }
        st.mounts.insert(path.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn unmount(&self, token: &str, path: &str) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        st.mounts
            .remove(path)
            .map(|_| ())
            .ok_or(EngineError::NotFound)
    }

    async fn list_auth(&self, token: &str) -> Result<Vec<String>, EngineError> {
        let st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        Ok(st.auth_methods.iter().cloned().collect())
    }

    async fn enable_approle(&self, token: &str) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        if !st.auth_methods.insert("approle/".to_string()) {
            return Err(EngineError::Api {
                status: 400,
                message: "path is already in use at approle/".to_string(),
            });
        }
        Ok(())
    }

    async fn put_policy(&self, token: &str, name: &str, rules: &str) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        st.policies.insert(name.to_string(), rules.to_string());
        Ok(())
    }

    async fn read(&self, token: &str, path: &str) -> Result<Map<String, Value>, EngineError> {
        let st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        let (mount, leaf) = Self::split_path(&st, path).ok_or(EngineError::NotFound)?;
        st.mounts[&mount]
            .get(leaf)
            .cloned()
            .ok_or(EngineError::NotFound)
    }

    async fn write(
        &self,
        token: &str,
        path: &str,
        data: &Map<String, Value>,
    ) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        if st.write_faults.contains(path) {
            return Err(EngineError::Api {
                status: 500,
                message: "forced write fault".to_string(),
            });
        }
        let (mount, leaf) = Self::split_path(&st, path).ok_or(EngineError::NotFound)?;
        let leaf = leaf.to_string();
        st.mounts
            .get_mut(&mount)
            .expect("mount resolved above")
            .insert(leaf, data.clone());
        Ok(())
    }

    async fn delete(&self, token: &str, path: &str) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        let (mount, leaf) = Self::split_path(&st, path).ok_or(EngineError::NotFound)?;
        let leaf = leaf.to_string();
        st.mounts
            .get_mut(&mount)
            .expect("mount resolved above")
            .remove(&leaf)
            .map(|_| ())
            .ok_or(EngineError::NotFound)
    }

    async fn list(&self, token: &str, path: &str) -> Result<Vec<String>, EngineError> {
        let st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        let mount = st.mounts.get(path).ok_or(EngineError::NotFound)?;
        Ok(mount.keys().cloned().collect())
    }

    async fn create_role(
        &self,
        token: &str,
        role: &str,
        _token_ttl: &str,
        _policies: &[String],
    ) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        let creds = (
            format!("role-id-{}", uuid::Uuid::new_v4()),
            format!("secret-id-{}", uuid::Uuid::new_v4()),
        );
        st.roles.insert(role.to_string(), creds);
        Ok(())
    }

    async fn read_role_id(&self, token: &str, role: &str) -> Result<String, EngineError> {
        let st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        st.roles
            .get(role)
            .map(|(role_id, _)| role_id.clone())
            .ok_or(EngineError::NotFound)
    }

    async fn generate_secret_id(&self, token: &str, role: &str) -> Result<String, EngineError> {
        let st = self.state.lock().unwrap();
        Self::data_ready(&st, token)?;
        st.roles
            .get(role)
            .map(|(_, secret_id)| secret_id.clone())
            .ok_or(EngineError::NotFound)
    }

    async fn approle_login(&self, role_id: &str, secret_id: &str) -> Result<String, EngineError> {
        let mut st = self.state.lock().unwrap();
        if st.sealed {
            return Err(EngineError::Sealed);
        }
        let valid = st
            .roles
            .values()
            .any(|(r, s)| r == role_id && s == secret_id);
        if !valid {
            return Err(EngineError::Api {
                status: 400,
                message: "invalid role or secret id".to_string(),
            });
        }

        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("temp-token-{n}");
        st.temp_tokens.insert(token.clone());
        Ok(token)
    }

    async fn revoke_token(&self, token: &str, revoke: &str) -> Result<(), EngineError> {
        let mut st = self.state.lock().unwrap();
        Self::check_token(&st, token)?;
        if st.root_token.as_deref() == Some(revoke) {
            st.root_revoked = true;
        }
        st.temp_tokens.remove(revoke);
        Ok(())
    }
}
