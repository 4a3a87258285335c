//! logwarden - log-driven access-control engine.

use logwarden::action::Action;
use logwarden::app::AppCore;
use logwarden::blocklog::BlockLog;
use logwarden::cache::{self, IpCache};
use logwarden::chain::Chain;
use logwarden::config::{self, Config};
use logwarden::parser::LogParser;
use logwarden::tailer::Tailer;
use logwarden::{http, metrics};
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.yml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.yml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can honor `debug`)
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    let default_level = if config.debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        logfile = %config.logfile.display(),
        log_format = %config.log_format,
        "Starting logwarden"
    );

    let parser = LogParser::new(&config.log_format)?;

    let chain = Chain::from_config(&config.checkers)
        .await?
        .with_observer(Arc::new(metrics::observe_checker_duration));
    info!(checkers = chain.len(), "Chain initialized");

    let action = Action::new(config.block_action.argv())?;
    if action.is_noop() {
        info!("No block action configured");
    } else {
        info!(action = %config.block_action, "Block action configured");
    }

    let blocklog = BlockLog::create(config.blocklog.as_deref(), &config.blocklog_template)?;

    let pass_cache = Arc::new(match &config.whitelist_cache_path {
        Some(path) => IpCache::with_path(path.clone(), config.whitelist_cache_max),
        None => IpCache::in_memory(config.whitelist_cache_max),
    });
    let block_cache = Arc::new(IpCache::in_memory(config.whitelist_cache_max));

    // All background tasks bind to this shutdown signal.
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Graceful shutdown on SIGINT/SIGTERM.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT - shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM - shutting down"),
            }

            let _ = shutdown_tx.send(());
        });
    }

    // Prometheus metrics are optional; no metrics_addr disables the endpoint.
    match &config.metrics_addr {
        Some(addr) => {
            let addr = addr
                .to_socket_addrs()
                .map_err(|e| anyhow::anyhow!("invalid metrics_addr {addr:?}: {e}"))?
                .next()
                .ok_or_else(|| anyhow::anyhow!("metrics_addr {addr:?} resolves to nothing"))?;

            metrics::init();
            tokio::spawn(http::run_http_server(addr));
        }
        None => info!("Metrics disabled"),
    }

    // Persistent pass-cache saver; a purely in-memory cache skips it.
    if config.whitelist_cache_path.is_some() {
        cache::spawn_saver(Arc::clone(&pass_cache), &shutdown_tx);
        info!("Pass cache saver started");
    }

    let (tailer, records) = Tailer::spawn(config.logfile.clone(), parser, &shutdown_tx).await?;
    info!(path = %config.logfile.display(), "Watching log file");

    let mut core = AppCore::new(chain, action, blocklog, pass_cache, block_cache);
    core.run(records).await;

    // The record stream closed: either shutdown or a tailer failure. Give
    // the saver a moment to finish its final flush either way.
    let _ = shutdown_tx.send(());
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    if let Some(e) = tailer.take_error() {
        error!(error = %e, "log streamer exited with error");
        return Err(e.into());
    }

    Ok(())
}
