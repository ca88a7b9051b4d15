//! REST surface of the service: translates HTTP requests into backend
//! operations and backend errors into status codes.
//!
//! Mapping policy: malformed request bodies are 400, everything the backend
//! rejects (including missing domains and secrets) surfaces as 500 with an
//! opaque message.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::backend::{Backend, BackendError, Secret};

/// Build the service router over a shared backend.
pub fn router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/v1/sms/quorum/status", get(quorum_status))
        .route("/v1/sms/quorum/register", post(quorum_register))
        .route("/v1/sms/quorum/unseal", post(quorum_unseal))
        .route("/v1/sms/healthcheck", get(healthcheck))
        .route("/v1/sms/domain", post(create_domain))
        .route("/v1/sms/domain/{domain}", delete(delete_domain))
        .route(
            "/v1/sms/domain/{domain}/secret",
            post(create_secret).get(list_secret),
        )
        .route(
            "/v1/sms/domain/{domain}/secret/{name}",
            get(get_secret).delete(delete_secret),
        )
        .route("/v1/sms/login", post(login))
        .with_state(backend)
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<BackendError> for ApiError {
    fn from(e: BackendError) -> Self {
        // Backend failures, not-found included, are opaque 500s.
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

fn bad_request(rejection: JsonRejection) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        message: rejection.body_text(),
    }
}

#[derive(Serialize)]
struct SealStatusBody {
    sealstatus: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterBody {
    pgpkey: String,
    quorumid: String,
}

#[derive(Serialize)]
struct ShardBody {
    shard: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UnsealBody {
    unsealshard: String,
}

#[derive(Deserialize)]
struct DomainBody {
    name: String,
}

#[derive(Deserialize)]
struct SecretBody {
    name: String,
    values: Map<String, Value>,
}

#[derive(Serialize)]
struct SecretNamesBody {
    secretnames: Vec<String>,
}

async fn quorum_status(
    State(backend): State<Arc<Backend>>,
) -> Result<Json<SealStatusBody>, ApiError> {
    let sealed = backend.get_status().await?;
    Ok(Json(SealStatusBody { sealstatus: sealed }))
}

async fn quorum_register(
    State(backend): State<Arc<Backend>>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<Json<ShardBody>, ApiError> {
    let Json(req) = body.map_err(bad_request)?;
    tracing::info!(quorum_id = %req.quorumid, "quorum client registering");
    let shard = backend.register_quorum(&req.pgpkey).await?;
    Ok(Json(ShardBody { shard }))
}

async fn quorum_unseal(
    State(backend): State<Arc<Backend>>,
    body: Result<Json<UnsealBody>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = body.map_err(bad_request)?;
    backend.unseal(&req.unsealshard).await?;
    Ok(StatusCode::OK)
}

/// Live round-trip probe: sealed is a failure; on an unsealed backend a
/// throwaway domain is created and deleted so the whole data path is
/// exercised.
async fn healthcheck(State(backend): State<Arc<Backend>>) -> Result<StatusCode, ApiError> {
    let sealed = backend.get_status().await?;
    if sealed {
        return Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "backend is sealed".to_string(),
        });
    }

    let probe = format!("healthcheck-{}", uuid::Uuid::new_v4());
    backend.create_secret_domain(&probe).await?;
    backend.delete_secret_domain(&probe).await?;
    Ok(StatusCode::OK)
}

async fn create_domain(
    State(backend): State<Arc<Backend>>,
    body: Result<Json<DomainBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body.map_err(bad_request)?;
    let domain = backend.create_secret_domain(&req.name).await?;
    Ok((StatusCode::CREATED, Json(domain)).into_response())
}

async fn delete_domain(
    State(backend): State<Arc<Backend>>,
    Path(domain): Path<String>,
) -> Result<StatusCode, ApiError> {
    backend.delete_secret_domain(&domain).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_secret(
    State(backend): State<Arc<Backend>>,
    Path(domain): Path<String>,
    body: Result<Json<SecretBody>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = body.map_err(bad_request)?;
    let secret = Secret {
        name: req.name,
        values: req.values,
    };
    backend.create_secret(&domain, &secret).await?;
    Ok(StatusCode::CREATED)
}

async fn list_secret(
    State(backend): State<Arc<Backend>>,
    Path(domain): Path<String>,
) -> Result<Json<SecretNamesBody>, ApiError> {
    let secretnames = backend.list_secret(&domain).await?;
    Ok(Json(SecretNamesBody { secretnames }))
}

async fn get_secret(
    State(backend): State<Arc<Backend>>,
    Path((domain, name)): Path<(String, String)>,
) -> Result<Json<Secret>, ApiError> {
    let secret = backend.get_secret(&domain, &name).await?;
    Ok(Json(secret))
}

async fn delete_secret(
    State(backend): State<Arc<Backend>>,
    Path((domain, name)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    backend.delete_secret(&domain, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reserved; present so callers can probe the route.
async fn login() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use axum::body::Body;
    use axum::http::Request;
    use tempdir::TempDir;
    use tower::ServiceExt as _;

    async fn ready_router(engine: Arc<MockEngine>, tmp: &TempDir) -> Router {
        let backend = Backend::new(engine, tmp.path().join("auth"), None);
        backend.init().await.unwrap();
        router(Arc::new(backend))
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn status_reports_seal_state() {
        let tmp = TempDir::new("sms-handler").unwrap();
        let app = ready_router(Arc::new(MockEngine::new_unsealed()), &tmp).await;

        let resp = app.oneshot(get_req("/v1/sms/quorum/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({ "sealstatus": false }));
    }

    #[tokio::test]
    async fn register_rejects_unknown_fields() {
        let tmp = TempDir::new("sms-handler").unwrap();
        let app = ready_router(Arc::new(MockEngine::new()), &tmp).await;

        let resp = app
            .oneshot(json_post(
                "/v1/sms/quorum/register",
                r#"{"pgpkey":"x","quorumid":"y","extra":true}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unseal_rejects_malformed_json() {
        let tmp = TempDir::new("sms-handler").unwrap();
        let app = ready_router(Arc::new(MockEngine::new()), &tmp).await;

        let resp = app
            .oneshot(json_post("/v1/sms/quorum/unseal", "{not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn domain_and_secret_crud_over_http() {
        let tmp = TempDir::new("sms-handler").unwrap();
        let app = ready_router(Arc::new(MockEngine::new_unsealed()), &tmp).await;

        let resp = app
            .clone()
            .oneshot(json_post("/v1/sms/domain", r#"{"name":"d"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["name"], "d");
        assert!(body["uuid"].as_str().is_some_and(|u| !u.is_empty()));

        let resp = app
            .clone()
            .oneshot(json_post(
                "/v1/sms/domain/d/secret",
                r#"{"name":"s","values":{"a":1,"b":"x"}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app
            .clone()
            .oneshot(get_req("/v1/sms/domain/d/secret/s"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({ "name": "s", "values": { "a": 1, "b": "x" } })
        );

        let resp = app
            .clone()
            .oneshot(get_req("/v1/sms/domain/d/secret"))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({ "secretnames": ["s"] }));

        let resp = app
            .clone()
            .oneshot(delete_req("/v1/sms/domain/d/secret/s"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = app
            .clone()
            .oneshot(delete_req("/v1/sms/domain/d"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        // Missing secret surfaces as an opaque 500 per source policy.
        let resp = app
            .oneshot(get_req("/v1/sms/domain/d/secret/s"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn healthcheck_sealed_is_500() {
        let tmp = TempDir::new("sms-handler").unwrap();
        let app = ready_router(Arc::new(MockEngine::new()), &tmp).await;

        let resp = app.oneshot(get_req("/v1/sms/healthcheck")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn healthcheck_unsealed_round_trips_and_cleans_up() {
        let tmp = TempDir::new("sms-handler").unwrap();
        let engine = Arc::new(MockEngine::new_unsealed());
        let app = ready_router(engine.clone(), &tmp).await;

        let resp = app.oneshot(get_req("/v1/sms/healthcheck")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(engine
            .mount_names()
            .iter()
            .all(|m| !m.contains("healthcheck-")));
    }

    #[tokio::test]
    async fn login_is_reserved_noop() {
        let tmp = TempDir::new("sms-handler").unwrap();
        let app = ready_router(Arc::new(MockEngine::new()), &tmp).await;

        let resp = app
            .oneshot(json_post("/v1/sms/login", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn exhausted_shards_register_is_500_invalid_operation() {
        let tmp = TempDir::new("sms-handler").unwrap();
        let engine = Arc::new(MockEngine::new());
        let app = ready_router(engine, &tmp).await;

        let (client_pub, _) = sms_crypto::pgp::generate_keypair().unwrap();
        for _ in 0..3 {
            let resp = app
                .clone()
                .oneshot(json_post(
                    "/v1/sms/quorum/register",
                    &serde_json::to_string(
                        &json!({ "pgpkey": client_pub, "quorumid": "q" }),
                    )
                    .unwrap(),
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = app
            .oneshot(json_post(
                "/v1/sms/quorum/register",
                &serde_json::to_string(&json!({ "pgpkey": client_pub, "quorumid": "q" })).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "Invalid operation");
    }
}
