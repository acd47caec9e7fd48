//! Image Size Gatekeeper CLI - runs and inspects the image size admission webhook.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// Crates whose logs follow the configured level.
const LOG_TARGETS: [&str; 4] = [
    "image_size_gatekeeper",
    "gatekeeper_core",
    "gatekeeper_registry",
    "gatekeeper_webhook",
];

fn default_filter(level: &str) -> EnvFilter {
    let directives = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("image_size_gatekeeper=info,gatekeeper_webhook=info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&cli.command.log_level())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::Inspect(args) => commands::inspect::run(&args).await,
        Commands::ValidateConfig(args) => commands::validate::run(&args),
        Commands::Version => {
            println!("image-size-gatekeeper {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
