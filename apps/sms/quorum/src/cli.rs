//! Command line interface for the quorum client binary.

use std::path::PathBuf;

use clap::Parser;

use crate::config::QuorumConfig;
use crate::QuorumOpts;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Root directory for per-instance identity files.
    #[arg(long, default_value = "auth")]
    auth_dir: PathBuf,

    /// Instance directory name; defaults to the pod hostname.
    #[arg(long)]
    pod_name: Option<String>,
}

/// Quorum client command line interface.
pub struct Cli;

impl Cli {
    /// Parse arguments, load config, and run the tick loop. Exits non-zero
    /// on any fatal error.
    pub async fn execute() {
        let args = Args::parse();

        let config = QuorumConfig::from_file(&args.config).unwrap_or_else(|e| {
            tracing::error!(error = %e, "refusing to start");
            std::process::exit(1);
        });

        let pod_name = args.pod_name.unwrap_or_else(pod_hostname);

        if let Err(e) = crate::run(QuorumOpts {
            config,
            auth_dir: args.auth_dir,
            pod_name,
        })
        .await
        {
            tracing::error!(error = %e, "quorum client stopped");
            std::process::exit(1);
        }
    }
}

/// The pod hostname: the `HOSTNAME` variable when set (Kubernetes), the
/// kernel hostname otherwise.
fn pod_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        })
}
