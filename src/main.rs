use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ironpanel::cli::{self, Cli};
use ironpanel::config::PanelConfig;
use ironpanel::SystemRunner;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match PanelConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let runner = Arc::new(SystemRunner);
    let code = cli::execute(cli, runner, config).await;
    std::process::exit(code);
}
