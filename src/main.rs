//! SSR Runtime CLI entry point.
//!
//! Loads and validates the configuration, builds the runtime pool and serves
//! rendered pages over HTTP.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ssr_runtime_common::{ConfigFile, LogFormat};
use ssr_runtime_server::{ServerConfig, SsrServer};

/// Server-side render runtime backed by a bounded pool of wasm render contexts.
#[derive(Debug, Parser)]
#[command(name = "ssr-runtime", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "SSR_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8080.
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<String>,

    /// Render bundle path (.wasm, .cwasm or .wat).
    #[arg(long)]
    bundle: Option<String>,

    /// Log output format.
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Validate the configuration, print a summary and exit.
    #[arg(long)]
    check: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ConfigFile> {
    let mut file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    if let Some(bind) = &cli.bind {
        file.server.bind_addr.clone_from(bind);
    }
    if let Some(bundle) = &cli.bundle {
        file.ssr.runtime.bundle_path.clone_from(bundle);
    }
    if let Some(format) = cli.log_format {
        file.ssr.logging.format = format.into();
    }

    Ok(file)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,ssr_runtime=debug,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_config(&cli)?;

    let validated = file
        .ssr
        .validate()
        .context("Configuration validation failed")?;

    if cli.check {
        println!("{}", validated.summary());
        return Ok(());
    }

    init_tracing(validated.config.logging.format);

    let server_config = ServerConfig::from_file(&file.server)?;
    info!(
        bind_addr = %server_config.bind_addr,
        summary = %validated.summary(),
        "Configuration loaded"
    );

    let server = SsrServer::new(&validated, server_config).context("Failed to start render runtime")?;

    info!("Server initialized. Available endpoints:");
    info!("  GET  /health              - Health check");
    info!("  GET  /ready               - Pool readiness");
    info!("  GET  /metrics             - Prometheus metrics");
    info!("  GET  /*                   - Server-rendered pages");

    server.run().await?;

    Ok(())
}
