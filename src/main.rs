//! ==============================================================================
//! main.rs - ecowitt direct entry point
//! ==============================================================================
//!
//! purpose:
//!     polls an ecowitt gateway's live-data feed on a fixed cadence, keeps the
//!     latest converted reading in memory, optionally forwards each reading to
//!     influxdb and answers queries about it over a local http api.
//!
//! responsibilities:
//!     - load configuration and set up logging
//!     - build the shared snapshot store and stats counters
//!     - run the poll loop and the api server as tasks
//!     - stop both cleanly on ctrl-c or SIGTERM (docker stop)
//!
//! relationships:
//!     - uses: config.rs, poller.rs, api.rs, fetcher.rs, sink.rs
//!     - shares: snapshot.rs (SnapshotStore), stats.rs (Stats)
//!
//! architecture:
//!
//!     ┌──────────────┐   fetch    ┌──────────────┐  write   ┌──────────┐
//!     │   gateway    │ <───────── │  poll loop   │ ───────> │ influxdb │
//!     └──────────────┘            └──────┬───────┘          └──────────┘
//!                                        │ publish / record
//!                            ┌───────────┴───────────┐
//!                            │ SnapshotStore + Stats │
//!                            └───────────┬───────────┘
//!                                        │ read / snapshot
//!                                 ┌──────┴───────┐
//!                                 │   http api   │ <── clients
//!                                 └──────────────┘
//!
//! ==============================================================================

mod api;
mod config;
mod convert;
mod domain;
mod error;
mod fetcher;
mod poller;
mod sink;
mod snapshot;
mod stats;

use anyhow::Result;
use std::future::Future;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration. the real subscriber needs the configured
    // level, so loading logs through a temporary one.
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt().with_env_filter(env_filter("info")).finish(),
        config::StationConfig::load_or_default,
    )?;

    // step 2: logging, RUST_LOG wins over [logging] level
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.logging.level))
        .init();

    tracing::info!("===========================================================");
    tracing::info!("  LocalWeather Server v{}", api::BUILD);
    tracing::info!("===========================================================");
    config.print_summary();

    // step 3: shared state
    let store = snapshot::SnapshotStore::new();
    let stats = stats::Stats::new();

    // step 4: fetcher and optional sink
    let fetcher = fetcher::DeviceFetcher::new(config.device.url(), config.device.fetch_timeout())?;
    let sink = if config.influxdb.enable {
        tracing::info!(
            "[STARTUP] Forwarding to InfluxDB at {}:{} db={}",
            config.influxdb.host,
            config.influxdb.port,
            config.influxdb.db
        );
        Some(sink::InfluxSink::new(&config.influxdb)?)
    } else {
        None
    };

    // step 5: poll loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = poller::Poller::new(
        poller::PollSettings::from_config(&config),
        fetcher,
        sink,
        store.clone(),
        stats.clone(),
    );
    let poll_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    // step 6: api server
    let api_task = if config.api.enable {
        let state = api::ApiState::new(store, stats, &config.device.url());
        let api_config = config.api.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(&api_config, state, shutdown).await {
                tracing::error!("[API] Server error: {:#}", e);
            }
        }))
    } else {
        tracing::info!("[STARTUP] API disabled");
        None
    };

    // step 7: wait for ctrl-c or SIGTERM, then stop both tasks
    let signal = shutdown_signal().await?;
    tracing::info!("[SHUTDOWN] {} received, stopping", signal);
    let _ = shutdown_tx.send(true);

    if let Err(e) = poll_task.await {
        tracing::error!("[SHUTDOWN] Poll loop ended abnormally: {}", e);
    }
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            tracing::error!("[SHUTDOWN] API ended abnormally: {}", e);
        }
    }

    tracing::info!("[SHUTDOWN] Done");
    Ok(())
}

/// resolves on the first of ctrl-c or SIGTERM, naming which one
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = terminate.recv();
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    first_signal(tokio::signal::ctrl_c(), terminate).await
}

async fn first_signal(
    interrupt: impl Future<Output = std::io::Result<()>>,
    terminate: impl Future<Output = Option<()>>,
) -> Result<&'static str> {
    tokio::select! {
        result = interrupt => {
            result?;
            Ok("ctrl-c")
        }
        _ = terminate => Ok("SIGTERM"),
    }
}

/// RUST_LOG if set and valid, else `fallback`
fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}
