//! clustermond: the cluster monitor daemon.
//!
//! Single binary that assembles the monitor:
//! - State store (redb)
//! - Heart monitor
//! - Prometheus discovery (optional)
//! - REST API over HTTP and HTTPS
//!
//! # Usage
//!
//! ```text
//! clustermond --store-key $KEY --store-path /var/lib/clustermon/state.redb
//! ```

mod config;
mod listener;
mod manager;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};
use crate::manager::{LifecycleState, Manager};

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let log_file = config
        .open_log_file()
        .with_context(|| format!("could not open log file in {:?}", config.log_dir))?;
    match (log_file, config.log_format) {
        (None, LogFormat::Json) => builder.json().init(),
        (None, LogFormat::Text) => builder.init(),
        (Some(file), LogFormat::Json) => builder.with_writer(Mutex::new(file)).json().init(),
        (Some(file), LogFormat::Text) => builder
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init(),
    }
    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config)?;
    config.validate()?;

    info!(version = env!("CARGO_PKG_VERSION"), "cluster monitor starting");
    let manager = Arc::new(Manager::from_config(&config)?);
    let frequencies = config.frequencies();

    let mut run = tokio::spawn({
        let manager = manager.clone();
        async move { manager.start(frequencies).await }
    });

    tokio::select! {
        result = &mut run => return result?,
        _ = shutdown_signal() => info!("shutdown signal received"),
    }

    // A signal during startup waits for the manager to finish starting.
    while manager.state() == LifecycleState::Starting {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if !manager.stop().await {
        run.abort();
    }
    match run.await {
        Ok(result) => result?,
        Err(e) if e.is_cancelled() => {}
        Err(e) => return Err(e.into()),
    }

    info!("cluster monitor stopped");
    Ok(())
}
