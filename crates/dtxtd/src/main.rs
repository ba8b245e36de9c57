//! dtxtd: DailyTxT journal server
//!
//! Usage:
//!   dtxtd [--config /etc/dailytxt/config.toml] [--listen 0.0.0.0:8000]
//!
//! Environment variables (`DATA_PATH`, `SECRET_TOKEN`, `SMTP_*`, ...) override
//! values from the config file.

mod cookies;
mod error;
mod extract;
mod handlers;
mod server;


use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dtxt_auth::SmtpMailer;
use dtxt_core::DtxtConfig;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::server::AppState;

#[derive(Parser, Debug)]
#[command(name = "dtxtd", version, about = "DailyTxT journal server")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        long,
        short = 'c',
        env = "DTXT_CONFIG",
        default_value = "/etc/dailytxt/config.toml"
    )]
    config: std::path::PathBuf,

    /// Listen address, overrides `server.listen`
    #[arg(long, env = "DTXT_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DTXT_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "DTXT_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
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
        "dtxtd starting"
    );

    let mut config = load_config(&cli.config).await?;
    config.apply_env().context("applying environment overrides")?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    tokio::fs::create_dir_all(&config.storage.data_path)
        .await
        .with_context(|| format!("creating {}", config.storage.data_path.display()))?;
    if dtxt_migrate::relocate_legacy_tree(&config.storage.data_path).await? {
        info!("v1 data moved to old/, users migrate on their next login");
    }

    let secret = process_secret(&config);
    let listen = config.server.listen.clone();
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let state = AppState::new(config, secret.expose_secret().as_bytes(), Arc::new(SmtpMailer));

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(addr = %listen, "listening");

    server::serve(listener, state, grace).await
}

/// The configured signing secret, or a fresh one for this process only.
fn process_secret(config: &DtxtConfig) -> SecretString {
    let configured = config.auth.secret_token.trim();
    if configured.is_empty() {
        warn!("SECRET_TOKEN is not set, generated a random one; sessions end on restart");
        return SecretString::from(dtxt_crypto::new_secret_token());
    }
    SecretString::from(configured.to_string())
}

async fn load_config(path: &Path) -> Result<DtxtConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    } else {
        warn!(
            "config file not found: {}  (using defaults)",
            path.display()
        );
        Ok(DtxtConfig::default())
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
