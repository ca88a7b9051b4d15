//! Command line interface for the service binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::ServiceConfig;
use crate::ServiceOpts;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "smsconfig.json")]
    config: PathBuf,

    /// Address the REST listener binds.
    #[arg(long, default_value = "0.0.0.0:10443")]
    listen: SocketAddr,

    /// Directory where role credentials are persisted.
    #[arg(long, default_value = "auth")]
    auth_dir: PathBuf,
}

/// Service command line interface.
pub struct Cli;

impl Cli {
    /// Parse arguments, load config, and run the service to completion.
    /// Exits non-zero on any fatal error.
    pub async fn execute() {
        let args = Args::parse();

        let config = ServiceConfig::from_file(&args.config).unwrap_or_else(|e| {
            tracing::error!(error = %e, "refusing to start");
            std::process::exit(1);
        });

        if let Err(e) = crate::run(ServiceOpts {
            config,
            listen_addr: args.listen,
            auth_dir: args.auth_dir,
        })
        .await
        {
            tracing::error!(error = %e, "service stopped");
            std::process::exit(1);
        }
    }
}
