//! HTTP client for the SMS quorum endpoints.

use std::path::Path;

use serde::Deserialize;
use serde_json::json;

use sms_crypto::tls;

use crate::config::QuorumConfig;
use crate::QuorumError;

/// Client bound to one SMS service instance.
pub struct SmsClient {
    base: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct SealStatusBody {
    sealstatus: bool,
}

#[derive(Deserialize)]
struct ShardBody {
    shard: String,
}

impl SmsClient {
    /// Build the transport from config: CA pool and optional client
    /// certificate pair, TLS 1.2 floor. With `disable_tls` the client speaks
    /// plain HTTP for development setups.
    pub fn new(config: &QuorumConfig) -> Result<Self, QuorumError> {
        let builder = if config.disable_tls {
            reqwest::Client::builder()
        } else {
            let client_pair = (!config.clientcert.is_empty() && !config.clientkey.is_empty())
                .then(|| (Path::new(&config.clientcert), Path::new(&config.clientkey)));
            tls::client_config(Path::new(&config.cafile), client_pair)?
        };

        Ok(Self {
            base: config.url.trim_end_matches('/').to_string(),
            http: builder
                .build()
                .map_err(|e| QuorumError::Transport(e.without_url().to_string()))?,
        })
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, QuorumError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(QuorumError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Poll the service seal status.
    pub async fn seal_status(&self) -> Result<bool, QuorumError> {
        let resp = self
            .http
            .get(format!("{}/v1/sms/quorum/status", self.base))
            .send()
            .await
            .map_err(|e| QuorumError::Transport(e.without_url().to_string()))?;
        let body: SealStatusBody = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|_| QuorumError::Decode)?;
        Ok(body.sealstatus)
    }

    /// Register this client and receive its encrypted shard.
    pub async fn register(&self, pgp_pub: &str, quorum_id: &str) -> Result<String, QuorumError> {
        let resp = self
            .http
            .post(format!("{}/v1/sms/quorum/register", self.base))
            .json(&json!({ "pgpkey": pgp_pub, "quorumid": quorum_id }))
            .send()
            .await
            .map_err(|e| QuorumError::Transport(e.without_url().to_string()))?;
        let body: ShardBody = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|_| QuorumError::Decode)?;
        Ok(body.shard)
    }

    /// Submit the decrypted shard towards unsealing.
    pub async fn unseal(&self, shard: &str) -> Result<(), QuorumError> {
        let resp = self
            .http
            .post(format!("{}/v1/sms/quorum/unseal", self.base))
            .json(&json!({ "unsealshard": shard }))
            .send()
            .await
            .map_err(|e| QuorumError::Transport(e.without_url().to_string()))?;
        Self::check(resp).await.map(|_| ())
    }
}
