//! Batch uploader: reads domain/secret JSON files from a directory and
//! replays them against the SMS REST API, one domain create followed by its
//! secret creates per entry.

pub mod cli;

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Preloader failures.
#[derive(Debug, thiserror::Error)]
pub enum PreloadError {
    /// A JSON file could not be read.
    #[error("unable to read {0}")]
    Read(String, #[source] std::io::Error),

    /// A JSON file could not be parsed.
    #[error("unable to parse {0}")]
    Parse(String, #[source] serde_json::Error),

    /// Neither `domain` nor `domains` was present, or both were.
    #[error("invalid batch: exactly one of \"domain\" or \"domains\" must be present")]
    InvalidShape,

    /// The service could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a failure status.
    #[error("upload rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Service-provided error text.
        message: String,
    },
}

/// One secret entry in a batch file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SecretEntry {
    /// Secret name.
    pub name: String,
    /// Opaque values document.
    pub values: Map<String, Value>,
}

/// One domain entry: a name and its secrets.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DomainEntry {
    /// Domain name.
    pub name: String,
    /// Secrets to create under the domain.
    #[serde(default)]
    pub secrets: Vec<SecretEntry>,
}

#[derive(Debug, Deserialize)]
struct BatchFile {
    domain: Option<DomainEntry>,
    domains: Option<Vec<DomainEntry>>,
}

/// Parse a batch file into its domain list. Exactly one of `domain` and
/// `domains` must be present.
pub fn parse_batch(path: &Path) -> Result<Vec<DomainEntry>, PreloadError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PreloadError::Read(path.display().to_string(), e))?;
    let batch: BatchFile = serde_json::from_str(&raw)
        .map_err(|e| PreloadError::Parse(path.display().to_string(), e))?;

    match (batch.domain, batch.domains) {
        (Some(domain), None) => Ok(vec![domain]),
        (None, Some(domains)) if !domains.is_empty() => Ok(domains),
        _ => Err(PreloadError::InvalidShape),
    }
}

/// Uploader bound to one SMS service.
pub struct Uploader {
    base: String,
    http: reqwest::Client,
}

impl Uploader {
    /// Build the transport. A usable CA bundle pins the service
    /// certificate; without one, server verification is skipped with a
    /// warning, matching the tool's permissive operational role.
    pub fn new(service_url: &str, ca_cert: &Path) -> Result<Self, PreloadError> {
        let builder = match sms_crypto::tls::client_config(ca_cert, None) {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "CA bundle unusable, using insecure server verification");
                reqwest::Client::builder().danger_accept_invalid_certs(true)
            }
        };

        Ok(Self {
            base: service_url.trim_end_matches('/').to_string(),
            http: builder
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .map_err(|e| PreloadError::Transport(e.without_url().to_string()))?,
        })
    }

    async fn post(&self, rel: &str, body: Value) -> Result<(), PreloadError> {
        let resp = self
            .http
            .post(format!("{}{rel}", self.base))
            .json(&body)
            .send()
            .await
            .map_err(|e| PreloadError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        Err(PreloadError::Rejected {
            status: status.as_u16(),
            message: resp.text().await.unwrap_or_default(),
        })
    }

    /// Upload one batch: each domain is created before its secrets.
    pub async fn upload(&self, domains: &[DomainEntry]) -> Result<(), PreloadError> {
        for domain in domains {
            self.post("/v1/sms/domain", json!({ "name": domain.name }))
                .await?;

            for secret in &domain.secrets {
                self.post(
                    &format!("/v1/sms/domain/{}/secret", domain.name.trim()),
                    json!({ "name": secret.name, "values": secret.values }),
                )
                .await?;
            }
        }
        Ok(())
    }
}

/// Process every `.json` file in `dir`, continuing past per-file failures.
pub async fn upload_dir(uploader: &Uploader, dir: &Path) -> Result<(), PreloadError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| PreloadError::Read(dir.display().to_string(), e))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        tracing::info!(file = %path.display(), "processing");
        let domains = match parse_batch(&path) {
            Ok(domains) => domains,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "skipping file");
                continue;
            }
        };
        if let Err(e) = uploader.upload(&domains).await {
            tracing::error!(file = %path.display(), error = %e, "upload failed");
        }
    }
    Ok(())
}
