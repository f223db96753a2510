//! lanwatch daemon - main entry point
//!
//! Runs the discovery pipeline against the local network until SIGINT or
//! SIGTERM, or until a stage fails.

mod config;
mod logging;

use anyhow::Result;
use clap::Parser;
use lanwatch_core::HostRegistry;
use lanwatch_discovery::{
    ArpResolver, Collaborators, MetadataSource, NmapScanner, Pipeline, RouterClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;

/// Grace period for blocking router fetches still running at exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "lanwatch")]
#[command(about = "LAN host discovery daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lanwatch.toml")]
    config: PathBuf,

    /// Log level or filter directive; RUST_LOG overrides it
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run every task on one thread
    #[arg(long)]
    single_thread: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = config::load_config(&args.config)?;
    let from_file = loaded.is_some();
    let config = loaded.unwrap_or_default();
    config.validate()?;

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let _log_guard = logging::init_logging(&args.log_level, &config.logging)?;

    info!("lanwatch v{}", env!("CARGO_PKG_VERSION"));
    if from_file {
        info!(path = %args.config.display(), "Loaded configuration");
    } else {
        info!(
            path = %args.config.display(),
            "Configuration file not found, using defaults"
        );
    }
    info!(
        scan_target = %config.scan.target,
        enrichment = config.enrichment.enabled,
        "Configuration ready"
    );

    let runtime = if args.single_thread {
        tokio::runtime::Builder::new_current_thread()
    } else {
        tokio::runtime::Builder::new_multi_thread()
    }
    .enable_all()
    .build()?;

    let result = runtime.block_on(run(config));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    if let Err(e) = &result {
        error!(error = %e, "lanwatch stopped with an error");
    }
    result
}

async fn run(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let registry = HostRegistry::new(config.liveness_config(), cancel.child_token());

    tokio::spawn(watch_signals(cancel.clone()));

    let pipeline = Pipeline::new(
        config.pipeline_config(),
        registry.clone(),
        collaborators(&config),
        cancel.clone(),
    );
    let result = pipeline.run().await;

    let counts = registry.stats().counts();
    info!(
        cancelled = counts.cancelled,
        finished = counts.finished,
        hosts = registry.len().await,
        "Shutdown complete"
    );

    Ok(result?)
}

fn collaborators(config: &Config) -> Collaborators {
    let metadata: Option<Arc<dyn MetadataSource>> = if config.enrichment.enabled {
        let client = RouterClient::new(
            config.enrichment.endpoint.clone(),
            config.enrichment.secrets_path.clone(),
            config.enrichment.secret_key.clone(),
            Duration::from_secs(config.enrichment.timeout_secs),
        );
        Some(Arc::new(client))
    } else {
        None
    };

    Collaborators {
        scanner: Arc::new(NmapScanner::new(
            config.scan.target.clone(),
            Duration::from_secs(config.scan.timeout_secs),
        )),
        resolver: Arc::new(ArpResolver::new(Duration::from_secs(
            config.resolver.timeout_secs,
        ))),
        metadata,
    }
}

/// Cancel `cancel` on the first shutdown signal
async fn watch_signals(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        signal = shutdown_signal() => match signal {
            Ok(name) => {
                info!(signal = name, "Shutdown requested");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signals"),
        },
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
    })
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
