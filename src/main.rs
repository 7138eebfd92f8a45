use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use trial_relay::channels::web::{GatewayState, start_server};
use trial_relay::config::RelayConfig;
use trial_relay::db::InMemoryCaseStore;
use trial_relay::legal::files::FileStore;
use trial_relay::lifecycle::{self, exit_code_for, wait_for_shutdown_signal};
use trial_relay::settings::Settings;

const DEFAULT_LOG_FILTER: &str = "trial_relay=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "trial-relay", version, about = "Conversation relay and case file store")]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long, env = "TRIAL_RELAY_CONFIG", default_value = "trial-relay.toml")]
    config: PathBuf,

    /// Listen port (overrides CONVERSATION_API_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Listen address (overrides CONVERSATION_API_HOST).
    #[arg(long)]
    host: Option<IpAddr>,

    /// Root directory for case uploads.
    #[arg(long)]
    uploads_dir: Option<String>,
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Plain-text subscriber used while configuration is resolved, before the
/// configured output format is known.
fn bootstrap_subscriber<W>(writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
}

fn init_tracing(log_json: bool) {
    let filter = log_filter();
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    let mut config = RelayConfig::resolve(&settings).context("resolving relay configuration")?;
    if let Some(port) = cli.port.filter(|p| *p != 0) {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(dir) = &cli.uploads_dir {
        config.set_uploads_dir(dir).context("--uploads-dir")?;
    }
    Ok(config)
}

async fn run(config: RelayConfig) -> anyhow::Result<u8> {
    let files = FileStore::open(&config.uploads_dir).with_context(|| {
        format!("opening uploads directory {}", config.uploads_dir.display())
    })?;
    tracing::info!(uploads = %files.root().display(), "Case file store ready");

    let state = GatewayState::new(Arc::new(InMemoryCaseStore::new()), files)
        .with_upload_limits(config.max_upload_files, config.max_upload_file_bytes);
    let handle = start_server(config.socket_addr(), Arc::new(state)).await?;

    let reason = handle.serve_until(wait_for_shutdown_signal()).await;
    tracing::info!("Conversation API stopped.");
    Ok(exit_code_for(reason, lifecycle::has_faulted()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let loaded = tracing::subscriber::with_default(bootstrap_subscriber(std::io::stderr), || {
        load_config(&cli)
    });
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            init_tracing(false);
            tracing::error!("Configuration error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    init_tracing(config.log_json);
    lifecycle::install_panic_hook();

    match run(config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("Failed to start conversation API: {:#}", e);
            ExitCode::from(1)
        }
    }
}
