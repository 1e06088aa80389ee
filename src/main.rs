use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tablesmith::config::context::build_context;
use tablesmith::config::schema::load_config;
use tablesmith::frontend::http::run_server;

#[derive(Debug, Parser)]
#[clap(name = "tablesmith", version)]
struct Args {
    #[clap(
        short,
        long,
        default_value = "tablesmith.toml",
        help = "Path to the config file"
    )]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config_path).expect("Error loading config");

    info!("Starting tablesmith {}", env!("CARGO_PKG_VERSION"));
    let context = build_context(config).await;

    match context.config.frontend.http.clone() {
        Some(http) => run_server(context, http).await,
        None => warn!("No frontends configured, exiting"),
    }
}
