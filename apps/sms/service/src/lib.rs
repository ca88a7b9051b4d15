//! Secret Management Service: groups secrets into named domains inside a
//! sealed KV engine and gates the engine behind a quorum unseal protocol.
//!
//! The binary wires four pieces together: config loading, the secret
//! [`backend`], the REST [`handler`], and the mutual-TLS listener.

pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod handler;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Backend, BackendError};
use crate::config::{ConfigError, ServiceConfig};
use crate::engine::http::HttpKv;

/// Top-level service failures; any of these stops the process.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration could not be loaded or resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// TLS assembly failed.
    #[error(transparent)]
    Crypto(#[from] sms_crypto::CryptoError),

    /// Backend bootstrap failed; the service refuses to serve.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The listener could not be brought up or crashed.
    #[error("server error")]
    Serve(#[source] std::io::Error),
}

/// Everything `run` needs, threaded explicitly from `main`.
pub struct ServiceOpts {
    /// Parsed configuration file.
    pub config: ServiceConfig,
    /// Address the REST listener binds.
    pub listen_addr: SocketAddr,
    /// Directory for persisted role credentials.
    pub auth_dir: PathBuf,
}

/// Bootstrap the backend and serve the REST surface until SIGINT.
pub async fn run(opts: ServiceOpts) -> Result<(), ServiceError> {
    let engine_addr = opts.config.engine_address()?;
    tracing::info!(engine = %engine_addr, "connecting to sealed KV engine");

    let engine = Arc::new(HttpKv::new(&engine_addr));
    let backend = Backend::new(
        engine,
        opts.auth_dir,
        Some(opts.config.vaulttoken.clone()),
    );
    backend.init().await?;

    let app = handler::router(Arc::new(backend));

    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_on_sigint(handle.clone()));

    tracing::info!(listen = %opts.listen_addr, tls = !opts.config.disable_tls, "serving");
    if opts.config.disable_tls {
        tracing::warn!("TLS disabled by config; development mode only");
        axum_server::bind(opts.listen_addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .map_err(ServiceError::Serve)?;
    } else {
        let tls = sms_crypto::tls::server_config(
            Path::new(&opts.config.cafile),
            Path::new(&opts.config.servercert),
            Path::new(&opts.config.serverkey),
            (!opts.config.password.is_empty()).then_some(opts.config.password.as_str()),
        )?;
        let rustls_config = axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(tls));
        axum_server::bind_rustls(opts.listen_addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .map_err(ServiceError::Serve)?;
    }
    Ok(())
}

/// Close the listener on SIGINT and drain in-flight requests.
async fn shutdown_on_sigint(handle: axum_server::Handle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("SIGINT received, draining in-flight requests");
        handle.graceful_shutdown(Some(Duration::from_secs(10)));
    }
}
