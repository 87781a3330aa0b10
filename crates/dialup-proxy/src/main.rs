mod config;
mod logging;
mod web;

use anyhow::Result;
use clap::Parser;
use config::Config;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "dialup-proxy",
    version,
    about = "Same-origin relay between the browser front end and the variant service."
)]
struct Cli {
    /// Path to configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listening port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the upstream base URL.
    #[arg(long, value_name = "URL")]
    upstream: Option<String>,

    /// Debug logging for the relay itself.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = try_main().await {
        error!(error = ?err, "dialup-proxy exited with error");
        std::process::exit(1);
    }
}

async fn try_main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_url) = cli.upstream {
        config.upstream.base_url = base_url;
    }
    let config = config.validated()?;

    info!(
        config = ?cli.config.as_ref().map(|p| p.display().to_string()),
        port = config.port,
        "starting dialup-proxy"
    );
    web::run(config).await
}
