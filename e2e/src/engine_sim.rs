//! In-process simulator of the sealable KV engine, serving the same REST
//! surface the service's engine client speaks.
//!
//! Seal semantics are real: init produces PGP-encrypted shards, data routes
//! refuse to serve while sealed, and unseal counts distinct valid shards up
//! to the threshold.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use sms_crypto::pgp;

const TOKEN_HEADER: &str = "x-vault-token";

#[derive(Default)]
struct SimState {
    initialized: bool,
    sealed: bool,
    threshold: u32,
    shares: u32,
    shard_plaintexts: Vec<String>,
    submitted: HashSet<String>,
    root_token: Option<String>,
    root_revoked: bool,
    temp_tokens: HashSet<String>,
    mounts: BTreeMap<String, BTreeMap<String, Map<String, Value>>>,
    policies: BTreeMap<String, String>,
    roles: BTreeMap<String, (String, String)>,
    auth_methods: HashSet<String>,
    login_count: usize,
}

/// Handle to a running engine simulator.
pub struct EngineSim {
    state: Arc<Mutex<SimState>>,
}

impl EngineSim {
    /// Create a virgin engine: uninitialized and sealed.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                sealed: true,
                ..SimState::default()
            })),
        }
    }

    /// Serve the engine API on a free localhost port and return its address.
    pub async fn spawn(&self) -> SocketAddr {
        let app = router(self.state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Reseal the engine, as a process restart of a real engine would.
    pub fn reseal(&self) {
        let mut st = self.state.lock().unwrap();
        st.sealed = true;
        st.submitted.clear();
    }

    /// Unseal directly, for scenarios that exercise the data path without a
    /// quorum.
    pub fn force_unseal(&self) {
        self.state.lock().unwrap().sealed = false;
    }

    /// Whether the engine is currently sealed.
    pub fn sealed(&self) -> bool {
        self.state.lock().unwrap().sealed
    }

    /// All current mount paths.
    pub fn mount_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .mounts
            .keys()
            .cloned()
            .collect()
    }

    /// Approle logins served so far.
    pub fn login_count(&self) -> usize {
        self.state.lock().unwrap().login_count
    }
}

impl Default for EngineSim {
    fn default() -> Self {
        Self::new()
    }
}

type Shared = Arc<Mutex<SimState>>;

fn errors(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "errors": [message] }))).into_response()
}

fn authed(st: &SimState, headers: &HeaderMap) -> Result<(), Response> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let is_root = st.root_token.as_deref() == Some(token) && !st.root_revoked;
    if is_root || st.temp_tokens.contains(token) {
        Ok(())
    } else {
        Err(errors(StatusCode::FORBIDDEN, "permission denied"))
    }
}

fn data_ready(st: &SimState, headers: &HeaderMap) -> Result<(), Response> {
    if st.sealed {
        return Err(errors(StatusCode::SERVICE_UNAVAILABLE, "engine is sealed"));
    }
    authed(st, headers)
}

fn seal_status_body(st: &SimState) -> Value {
    json!({
        "sealed": st.sealed,
        "t": st.threshold,
        "n": st.shares,
        "progress": st.submitted.len(),
    })
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/v1/sys/init", get(init_status).put(init))
        .route("/v1/sys/seal-status", get(seal_status))
        .route("/v1/sys/unseal", put(unseal))
        .route("/v1/sys/auth", get(list_auth))
        .route("/v1/sys/auth/approle", post(enable_approle))
        .route("/v1/sys/policies/acl/{name}", put(put_policy))
        .route("/v1/sys/mounts/{*path}", post(mount).delete(unmount))
        .route("/v1/auth/approle/login", post(approle_login))
        .route("/v1/auth/approle/role/{role}", post(create_role))
        .route("/v1/auth/approle/role/{role}/role-id", get(read_role_id))
        .route(
            "/v1/auth/approle/role/{role}/secret-id",
            post(generate_secret_id),
        )
        .route("/v1/auth/token/revoke", post(revoke_token))
        .route(
            "/v1/{*path}",
            get(logical_read).put(logical_write).delete(logical_delete),
        )
        .with_state(state)
}

async fn init_status(State(state): State<Shared>) -> Json<Value> {
    let st = state.lock().unwrap();
    Json(json!({ "initialized": st.initialized }))
}

#[derive(Deserialize)]
struct InitBody {
    secret_shares: u32,
    secret_threshold: u32,
    pgp_keys: Vec<String>,
    root_token_pgp_key: String,
}

async fn init(State(state): State<Shared>, Json(body): Json<InitBody>) -> Response {
    let mut st = state.lock().unwrap();
    if st.initialized {
        return errors(StatusCode::BAD_REQUEST, "engine is already initialized");
    }
    if body.pgp_keys.len() != body.secret_shares as usize {
        return errors(
            StatusCode::BAD_REQUEST,
            "pgp key count must match share count",
        );
    }

    let mut keys = Vec::with_capacity(body.pgp_keys.len());
    for (i, pgp_key) in body.pgp_keys.iter().enumerate() {
        let plaintext = format!("shard-{i}-{}", uuid::Uuid::new_v4());
        match pgp::encrypt(&plaintext, pgp_key) {
            Ok(ct) => {
                st.shard_plaintexts.push(plaintext);
                keys.push(ct);
            }
            Err(_) => return errors(StatusCode::BAD_REQUEST, "unusable pgp key"),
        }
    }

    let root_plain = format!("root-{}", uuid::Uuid::new_v4());
    let root_token = match pgp::encrypt(&root_plain, &body.root_token_pgp_key) {
        Ok(ct) => ct,
        Err(_) => return errors(StatusCode::BAD_REQUEST, "unusable root token pgp key"),
    };

    st.initialized = true;
    st.sealed = true;
    st.threshold = body.secret_threshold;
    st.shares = body.secret_shares;
    st.root_token = Some(root_plain);

    Json(json!({ "keys": keys, "root_token": root_token })).into_response()
}

async fn seal_status(State(state): State<Shared>) -> Json<Value> {
    let st = state.lock().unwrap();
    Json(seal_status_body(&st))
}

#[derive(Deserialize)]
struct UnsealBody {
    key: String,
}

async fn unseal(State(state): State<Shared>, Json(body): Json<UnsealBody>) -> Response {
    let mut st = state.lock().unwrap();
    if !st.initialized {
        return errors(StatusCode::BAD_REQUEST, "engine is not initialized");
    }
    if !st.sealed {
        return Json(seal_status_body(&st)).into_response();
    }
    if !st.shard_plaintexts.iter().any(|s| s == &body.key) {
        return errors(StatusCode::BAD_REQUEST, "invalid unseal shard");
    }

    st.submitted.insert(body.key);
    if st.submitted.len() as u32 >= st.threshold {
        st.sealed = false;
        st.submitted.clear();
    }
    Json(seal_status_body(&st)).into_response()
}

async fn list_auth(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    let body: Map<String, Value> = st
        .auth_methods
        .iter()
        .map(|m| (m.clone(), json!({ "type": "approle" })))
        .collect();
    Json(Value::Object(body)).into_response()
}

async fn enable_approle(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    if !st.auth_methods.insert("approle/".to_string()) {
        return errors(StatusCode::BAD_REQUEST, "path is already in use at approle/");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn put_policy(
    State(state): State<Shared>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    let rules = body["policy"].as_str().unwrap_or_default().to_string();
    st.policies.insert(name, rules);
    StatusCode::NO_CONTENT.into_response()
}

async fn mount(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    if st.mounts.contains_key(&path) {
        return errors(
            StatusCode::BAD_REQUEST,
            &format!("existing mount at {path}/"),
        );
    }
    st.mounts.insert(path, BTreeMap::new());
    StatusCode::NO_CONTENT.into_response()
}

async fn unmount(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    match st.mounts.remove(&path) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => errors(StatusCode::NOT_FOUND, "no mount at path"),
    }
}

async fn approle_login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut st = state.lock().unwrap();
    if st.sealed {
        return errors(StatusCode::SERVICE_UNAVAILABLE, "engine is sealed");
    }
    let role_id = body["role_id"].as_str().unwrap_or_default();
    let secret_id = body["secret_id"].as_str().unwrap_or_default();
    let valid = st
        .roles
        .values()
        .any(|(r, s)| r == role_id && s == secret_id);
    if !valid {
        return errors(StatusCode::BAD_REQUEST, "invalid role or secret id");
    }

    st.login_count += 1;
    let token = format!("temp-token-{}", st.login_count);
    st.temp_tokens.insert(token.clone());
    Json(json!({ "auth": { "client_token": token } })).into_response()
}

async fn create_role(
    State(state): State<Shared>,
    Path(role): Path<String>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    let creds = (
        format!("role-id-{}", uuid::Uuid::new_v4()),
        format!("secret-id-{}", uuid::Uuid::new_v4()),
    );
    st.roles.insert(role, creds);
    StatusCode::NO_CONTENT.into_response()
}

async fn read_role_id(
    State(state): State<Shared>,
    Path(role): Path<String>,
    headers: HeaderMap,
) -> Response {
    let st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    match st.roles.get(&role) {
        Some((role_id, _)) => Json(json!({ "data": { "role_id": role_id } })).into_response(),
        None => errors(StatusCode::NOT_FOUND, "unknown role"),
    }
}

async fn generate_secret_id(
    State(state): State<Shared>,
    Path(role): Path<String>,
    headers: HeaderMap,
) -> Response {
    let st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    match st.roles.get(&role) {
        Some((_, secret_id)) => {
            Json(json!({ "data": { "secret_id": secret_id } })).into_response()
        }
        None => errors(StatusCode::NOT_FOUND, "unknown role"),
    }
}

async fn revoke_token(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = authed(&st, &headers) {
        return resp;
    }
    let revoke = body["token"].as_str().unwrap_or_default().to_string();
    if st.root_token.as_deref() == Some(revoke.as_str()) {
        st.root_revoked = true;
    }
    st.temp_tokens.remove(&revoke);
    StatusCode::NO_CONTENT.into_response()
}

/// Resolve a logical path to its mount and leaf.
fn split_path<'a>(st: &SimState, path: &'a str) -> Option<(String, &'a str)> {
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

async fn logical_read(
    State(state): State<Shared>,
    Path(path): Path<String>,
    Query(query): Query<std::collections::HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }

    if query.get("list").map(String::as_str) == Some("true") {
        return match st.mounts.get(&path) {
            Some(mount) => {
                let keys: Vec<&String> = mount.keys().collect();
                Json(json!({ "data": { "keys": keys } })).into_response()
            }
            None => errors(StatusCode::NOT_FOUND, "no mount at path"),
        };
    }

    match split_path(&st, &path).and_then(|(mount, leaf)| st.mounts[&mount].get(leaf)) {
        Some(doc) => Json(json!({ "data": doc })).into_response(),
        None => errors(StatusCode::NOT_FOUND, "no value at path"),
    }
}

async fn logical_write(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    match split_path(&st, &path) {
        Some((mount, leaf)) => {
            let leaf = leaf.to_string();
            st.mounts.get_mut(&mount).unwrap().insert(leaf, body);
            StatusCode::NO_CONTENT.into_response()
        }
        None => errors(StatusCode::NOT_FOUND, "no mount for path"),
    }
}

async fn logical_delete(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut st = state.lock().unwrap();
    if let Err(resp) = data_ready(&st, &headers) {
        return resp;
    }
    match split_path(&st, &path) {
        Some((mount, leaf)) => {
            let leaf = leaf.to_string();
            match st.mounts.get_mut(&mount).unwrap().remove(&leaf) {
                Some(_) => StatusCode::NO_CONTENT.into_response(),
                None => errors(StatusCode::NOT_FOUND, "no value at path"),
            }
        }
        None => errors(StatusCode::NOT_FOUND, "no mount for path"),
    }
}
