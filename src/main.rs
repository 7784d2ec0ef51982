use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snowfeed::{feed_cli, Config, FeedCommands};

#[derive(Parser)]
#[command(name = "snowfeed")]
#[command(about = "Compile Nostr feeds into relay subscriptions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: FeedCommands,

    /// Configuration file path (defaults to ~/.snowfeed/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref()).with_context(|| "Failed to load config")?;

    // Initialize logging
    init_logging(&config.logging.level)?;

    // Validate configuration
    config.validate().with_context(|| "Configuration validation failed")?;

    feed_cli::handle_command(cli.command, &config).await
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .init();

    Ok(())
}
