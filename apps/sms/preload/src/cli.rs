//! Command line interface for the preload utility.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the CA certificate file.
    #[arg(long, default_value = "/sms/certs/aaf_root_ca.cer")]
    cacert: PathBuf,

    /// URL of the SMS service.
    #[arg(long, default_value = "https://aaf-sms.onap")]
    serviceurl: String,

    /// Service port, when different from the default.
    #[arg(long, default_value = "10443")]
    serviceport: String,

    /// Directory containing JSON batch files to upload.
    #[arg(long, default_value = ".")]
    jsondir: PathBuf,
}

/// Preload command line interface.
pub struct Cli;

impl Cli {
    /// Parse arguments and upload every batch file in the directory. Exits
    /// non-zero when the directory itself cannot be processed.
    pub async fn execute() {
        let args = Args::parse();

        let base = format!(
            "{}:{}",
            args.serviceurl.trim().trim_end_matches('/'),
            args.serviceport.trim()
        );

        let uploader = crate::Uploader::new(&base, &args.cacert).unwrap_or_else(|e| {
            tracing::error!(error = %e, "refusing to start");
            std::process::exit(1);
        });

        if let Err(e) = crate::upload_dir(&uploader, &args.jsondir).await {
            tracing::error!(error = %e, "preload failed");
            std::process::exit(1);
        }
    }
}
