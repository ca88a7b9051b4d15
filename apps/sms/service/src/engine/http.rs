//! REST client for a Vault-compatible sealable KV engine.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{EngineError, InitOpts, InitOutput, SealStatus, SealedKv};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Bound on any single engine round trip.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// [`SealedKv`] implementation speaking the engine's HTTP API.
pub struct HttpKv {
    base: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct InitStatusBody {
    initialized: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct DataEnvelope {
    data: Map<String, Value>,
}

#[derive(Deserialize)]
struct ListData {
    keys: Vec<String>,
}

#[derive(Deserialize)]
struct ListEnvelope {
    data: ListData,
}

#[derive(Deserialize)]
struct AuthBody {
    client_token: String,
}

#[derive(Deserialize)]
struct LoginEnvelope {
    auth: AuthBody,
}

impl HttpKv {
    /// Build a client for the engine at `address` (scheme and authority,
    /// e.g. `http://127.0.0.1:8200`).
    pub fn new(address: &str) -> Self {
        Self {
            base: address.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base, path)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status.as_u16() == 404 {
            return Err(EngineError::NotFound);
        }
        if status.as_u16() == 503 {
            return Err(EngineError::Sealed);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.errors.join("; "),
            Err(_) => String::new(),
        };
        Err(EngineError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, EngineError> {
        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.without_url().to_string()))?;
        Self::check(resp).await
    }

    async fn send_authed(
        &self,
        req: reqwest::RequestBuilder,
        token: &str,
    ) -> Result<reqwest::Response, EngineError> {
        self.send(req.header(TOKEN_HEADER, token)).await
    }
}

#[async_trait]
impl SealedKv for HttpKv {
    async fn init_status(&self) -> Result<bool, EngineError> {
        let resp = self.send(self.client.get(self.url("sys/init"))).await?;
        let body: InitStatusBody = resp.json().await.map_err(|_| EngineError::Decode)?;
        Ok(body.initialized)
    }

    async fn init(&self, opts: InitOpts) -> Result<InitOutput, EngineError> {
        let resp = self
            .send(self.client.put(self.url("sys/init")).json(&opts))
            .await?;
        resp.json().await.map_err(|_| EngineError::Decode)
    }

    async fn seal_status(&self) -> Result<SealStatus, EngineError> {
        let resp = self
            .send(self.client.get(self.url("sys/seal-status")))
            .await?;
        resp.json().await.map_err(|_| EngineError::Decode)
    }

    async fn unseal(&self, shard: &str) -> Result<SealStatus, EngineError> {
        let resp = self
            .send(
                self.client
                    .put(self.url("sys/unseal"))
                    .json(&json!({ "key": shard })),
            )
            .await?;
        resp.json().await.map_err(|_| EngineError::Decode)
    }

    async fn mount(&self, token: &str, path: &str, description: &str) -> Result<(), EngineError> {
        self.send_authed(
            self.client
                .post(self.url(&format!("sys/mounts/{path}")))
                .json(&json!({ "type": "kv", "description": description })),
            token,
        )
        .await
        .map(|_| ())
    }

    async fn unmount(&self, token: &str, path: &str) -> Result<(), EngineError> {
        self.send_authed(
            self.client.delete(self.url(&format!("sys/mounts/{path}"))),
            token,
        )
        .await
        .map(|_| ())
    }

    async fn list_auth(&self, token: &str) -> Result<Vec<String>, EngineError> {
        let resp = self
            .send_authed(self.client.get(self.url("sys/auth")), token)
            .await?;
        let body: Map<String, Value> = resp.json().await.map_err(|_| EngineError::Decode)?;
        Ok(body.keys().cloned().collect())
    }

    async fn enable_approle(&self, token: &str) -> Result<(), EngineError> {
        self.send_authed(
            self.client
                .post(self.url("sys/auth/approle"))
                .json(&json!({ "type": "approle" })),
            token,
        )
        .await
        .map(|_| ())
    }

    async fn put_policy(&self, token: &str, name: &str, rules: &str) -> Result<(), EngineError> {
        self.send_authed(
            self.client
                .put(self.url(&format!("sys/policies/acl/{name}")))
                .json(&json!({ "policy": rules })),
            token,
        )
        .await
        .map(|_| ())
    }

    async fn read(&self, token: &str, path: &str) -> Result<Map<String, Value>, EngineError> {
        let resp = self
            .send_authed(self.client.get(self.url(path)), token)
            .await?;
        let body: DataEnvelope = resp.json().await.map_err(|_| EngineError::Decode)?;
        Ok(body.data)
    }

    async fn write(
        &self,
        token: &str,
        path: &str,
        data: &Map<String, Value>,
    ) -> Result<(), EngineError> {
        self.send_authed(self.client.put(self.url(path)).json(data), token)
            .await
            .map(|_| ())
    }

    async fn delete(&self, token: &str, path: &str) -> Result<(), EngineError> {
        self.send_authed(self.client.delete(self.url(path)), token)
            .await
            .map(|_| ())
    }

    async fn list(&self, token: &str, path: &str) -> Result<Vec<String>, EngineError> {
        let resp = self
            .send_authed(
                self.client.get(self.url(path)).query(&[("list", "true")]),
                token,
            )
            .await?;
        let body: ListEnvelope = resp.json().await.map_err(|_| EngineError::Decode)?;
        Ok(body.data.keys)
    }

    async fn create_role(
        &self,
        token: &str,
        role: &str,
        token_ttl: &str,
        policies: &[String],
    ) -> Result<(), EngineError> {
        self.send_authed(
            self.client
                .post(self.url(&format!("auth/approle/role/{role}")))
                .json(&json!({ "token_ttl": token_ttl, "policies": policies })),
            token,
        )
        .await
        .map(|_| ())
    }

    async fn read_role_id(&self, token: &str, role: &str) -> Result<String, EngineError> {
        let resp = self
            .send_authed(
                self.client
                    .get(self.url(&format!("auth/approle/role/{role}/role-id"))),
                token,
            )
            .await?;
        let body: DataEnvelope = resp.json().await.map_err(|_| EngineError::Decode)?;
        body.data
            .get("role_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(EngineError::Decode)
    }

    async fn generate_secret_id(&self, token: &str, role: &str) -> Result<String, EngineError> {
        let resp = self
            .send_authed(
                self.client
                    .post(self.url(&format!("auth/approle/role/{role}/secret-id")))
                    .json(&json!({})),
                token,
            )
            .await?;
        let body: DataEnvelope = resp.json().await.map_err(|_| EngineError::Decode)?;
        body.data
            .get("secret_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(EngineError::Decode)
    }

    async fn approle_login(&self, role_id: &str, secret_id: &str) -> Result<String, EngineError> {
        let resp = self
            .send(
                self.client
                    .post(self.url("auth/approle/login"))
                    .json(&json!({ "role_id": role_id, "secret_id": secret_id })),
            )
            .await?;
        let body: LoginEnvelope = resp.json().await.map_err(|_| EngineError::Decode)?;
        Ok(body.auth.client_token)
    }

    async fn revoke_token(&self, token: &str, revoke: &str) -> Result<(), EngineError> {
        self.send_authed(
            self.client
                .post(self.url("auth/token/revoke"))
                .json(&json!({ "token": revoke })),
            token,
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn serve(app: Router) -> HttpKv {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        HttpKv::new(&format!("http://{addr}"))
    }

    #[tokio::test]
    async fn decodes_init_and_seal_status() {
        let app = Router::new()
            .route(
                "/v1/sys/init",
                get(|| async { Json(json!({ "initialized": true })) }),
            )
            .route(
                "/v1/sys/seal-status",
                get(|| async { Json(json!({ "sealed": true, "t": 3, "n": 3, "progress": 1 })) }),
            );
        let kv = serve(app).await;

        assert!(kv.init_status().await.unwrap());
        let status = kv.seal_status().await.unwrap();
        assert!(status.sealed);
        assert_eq!((status.t, status.n, status.progress), (3, 3, 1));
    }

    #[tokio::test]
    async fn maps_status_codes_to_error_kinds() {
        let app = Router::new()
            .route(
                "/v1/{*path}",
                get(|| async { (StatusCode::NOT_FOUND, Json(json!({ "errors": [] }))) }),
            )
            .route(
                "/v1/sys/seal-status",
                get(|| async {
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(json!({ "errors": ["engine is sealed"] })),
                    )
                }),
            )
            .route(
                "/v1/sys/auth",
                get(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "errors": ["first", "second"] })),
                    )
                }),
            );
        let kv = serve(app).await;

        let err = kv.read("t", "sms/missing/leaf").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound));

        let err = kv.seal_status().await.unwrap_err();
        assert!(matches!(err, EngineError::Sealed));

        let err = kv.list_auth("t").await.unwrap_err();
        match err {
            EngineError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "first; second");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_engine_is_transport_error() {
        let kv = HttpKv::new("http://127.0.0.1:1");
        let err = kv.init_status().await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
    }

    #[tokio::test]
    async fn parses_login_and_role_envelopes() {
        let app = Router::new()
            .route(
                "/v1/auth/approle/role/sms-role/role-id",
                get(|| async { Json(json!({ "data": { "role_id": "rid" } })) }),
            )
            .route(
                "/v1/auth/approle/login",
                axum::routing::post(|| async {
                    Json(json!({ "auth": { "client_token": "tok" } }))
                }),
            );
        let kv = serve(app).await;

        assert_eq!(kv.read_role_id("t", "sms-role").await.unwrap(), "rid");
        assert_eq!(kv.approle_login("rid", "sid").await.unwrap(), "tok");
    }
}
