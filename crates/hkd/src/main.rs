//! hkd: hearthkeep profile server daemon
//!
//! Usage:
//!   hkd [--config /etc/hearthkeep/config.toml] [--log info] [--log-format json|text]

mod admin;
mod daemon;
mod metrics;
mod net;
mod secret;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hkd", version, about = "hearthkeep profile server daemon")]
struct Cli {
    /// Path to hearthkeep.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "HEARTHKEEP_CONFIG",
        default_value = "/etc/hearthkeep/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "HEARTHKEEP_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "HEARTHKEEP_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Start with maintenance mode on, regardless of the config file
    #[arg(long)]
    maintenance: bool,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "hkd starting"
    );

    let mut config = load_config(&cli.config).await?;
    if cli.maintenance {
        config.server.maintenance = true;
    }

    daemon::run(config).await
}

async fn load_config(path: &Path) -> Result<hk_core::config::HearthConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    } else {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(hk_core::config::HearthConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
