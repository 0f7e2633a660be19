use std::path::PathBuf;

use clap::Parser;
use exthost_app::{AppConfig, ExitStatus, Host};

/// exthost - run the demo extension graph behind an HTTP ingress
#[derive(Parser, Debug)]
#[command(name = "exthost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. "info" or "exthost_runtime=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = exthost_app::init_logging(&args.log_level) {
        eprintln!("Error: {}", e);
        std::process::exit(ExitStatus::Infrastructure.code());
    }

    let mut config = match &args.config {
        Some(path) => match AppConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "cannot load config");
                std::process::exit(ExitStatus::Infrastructure.code());
            }
        },
        None => AppConfig::default(),
    };
    if let Some(host) = args.host {
        config.ingress.host = host;
    }
    if let Some(port) = args.port {
        config.ingress.port = port;
    }

    let status = match Host::start(config).await {
        Ok(host) => host.run().await,
        Err(e) => {
            tracing::error!(error = %e, "cannot start host");
            e.exit_status()
        }
    };
    std::process::exit(status.code());
}
