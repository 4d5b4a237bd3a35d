use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use minion_core::{ControlMetrics, ControlPlane, LoggingMetricsBackend, MinionConfig, StatsBroadcaster};
use rmcp::ServiceExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

mod dispatch;
mod events;
mod server;

use dispatch::Dispatcher;
use events::EventSink;
use server::MinionServer;

#[derive(Parser)]
#[command(name = "minion", about = "minion: host-level supervisor for managed services")]
struct Cli {
    /// Path to minion.toml (default: ./minion.toml, then ~/.config/minion/minion.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Supervisor root directory; overrides `root` from the config file
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log output format (logs go to stderr; filter with MINION_LOG)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the control plane over MCP on stdio and broadcast stats
    Serve {
        /// Log every metrics counter update
        #[arg(long)]
        log_metrics: bool,
    },
    /// Print installed services as JSON
    List,
    /// Run one control-plane method against the local root and print the result
    Call {
        /// Method name, e.g. Service.Status
        method: String,
        /// JSON params: a service id string, `{"id": ...}`, or a descriptor
        #[arg(default_value = "null")]
        params: String,
    },
}

fn init_logging(format: LogFormat) {
    // stdout belongs to the MCP stdio transport
    let filter = EnvFilter::try_from_env("MINION_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let mut config =
        MinionConfig::load(cli.config.as_deref()).context("failed to load minion config")?;
    if let Some(root) = cli.root {
        config.root = Some(root);
    }

    match cli.command {
        Commands::Serve { log_metrics } => serve(config, log_metrics).await,
        Commands::List => list(config).await,
        Commands::Call { method, params } => call(config, &method, &params).await,
    }
}

async fn list(config: MinionConfig) -> Result<()> {
    let plane = ControlPlane::from_config(&config);
    plane.load_persisted().await?;
    println!("{}", serde_json::to_string_pretty(&plane.list().await)?);
    Ok(())
}

/// Offline administration; a running `serve` keeps its own in-memory
/// registry and will not see changes made here until restarted.
async fn call(config: MinionConfig, method: &str, params: &str) -> Result<()> {
    let params: serde_json::Value =
        serde_json::from_str(params).context("params must be valid JSON")?;
    let plane = Arc::new(ControlPlane::from_config(&config));
    plane.layout().init().await?;
    plane.load_persisted().await?;

    match Dispatcher::new(plane).call(method, params).await {
        Ok(serde_json::Value::String(text)) => print!("{text}"),
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(e) => {
            println!("{}", serde_json::to_string(&e)?);
            anyhow::bail!("{method} failed: {e}");
        }
    }
    Ok(())
}

async fn serve(config: MinionConfig, log_metrics: bool) -> Result<()> {
    let metrics = if log_metrics {
        ControlMetrics::with_backend(Arc::new(LoggingMetricsBackend))
    } else {
        ControlMetrics::new()
    };
    let plane = Arc::new(ControlPlane::from_config(&config).with_metrics(Arc::new(metrics)));
    let layout = plane.layout().clone();

    layout
        .init()
        .await
        .with_context(|| format!("failed to create supervisor root {}", layout.root().display()))?;
    let loaded = plane.load_persisted().await?;

    tracing::info!(root = %layout.root().display(), services = loaded, "Starting minion supervisor");

    let shutdown = CancellationToken::new();
    let broadcaster = StatsBroadcaster::new(
        &plane,
        config.broadcast.interval(),
        config.broadcast.capacity,
    );
    let sink = EventSink::open(config.events_path(&layout))
        .await
        .context("failed to open stats event file")?;
    let forwarder = tokio::spawn(events::forward(broadcaster.subscribe(), sink, shutdown.clone()));
    let sampler = tokio::spawn(broadcaster.run(shutdown.clone()));

    let stdio = rmcp::transport::io::stdio();
    let server = MinionServer::new(Dispatcher::new(Arc::clone(&plane)))
        .serve(stdio)
        .await?;

    tracing::info!("minion serving on stdio");

    // Run until the client disconnects or we are interrupted
    tokio::select! {
        waited = server.waiting() => {
            waited?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    shutdown.cancel();
    let _ = tokio::join!(sampler, forwarder);

    tracing::info!(metrics = ?plane.metrics().snapshot(), "minion shutting down");
    Ok(())
}
