//! ==============================================================================
//! poller.rs - fixed-cadence poll loop
//! ==============================================================================
//!
//! purpose:
//!     the single background task that keeps the snapshot fresh.
//!
//! cycle:
//!
//!     idle -> fetching -> success -> (forward to sink) -> sleeping -> fetching ...
//!                      \-> failure ---------------------/
//!
//!     - success: convert, publish, count, optionally forward to the sink.
//!     - failure: count, record the error in the snapshot. the previous
//!       reading stays servable.
//!     - sleeping: ticks are start-to-start at `wait * 10s`. no backoff; a
//!       dead gateway is retried at the same cadence forever.
//!
//! relationships:
//!     - uses: fetcher.rs, convert.rs, sink.rs
//!     - writes: snapshot.rs, stats.rs
//!     - spawned by: main.rs
//!
//! shutdown:
//!     the shutdown channel is only watched while sleeping. an in-flight
//!     fetch or sink write runs to completion, bounded by its own timeout.
//!
//! ==============================================================================

use crate::config::StationConfig;
use crate::convert::convert;
use crate::domain::{unix_now, WeatherReading};
use crate::error::{ConversionError, FetchError};
use crate::fetcher::LiveDataSource;
use crate::sink::ReadingSink;
use crate::snapshot::SnapshotStore;
use crate::stats::{Counter, Stats};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct PollSettings {
    pub interval: Duration,
    /// measurement name handed to the sink
    pub measurement: String,
    pub sink_timeout: Duration,
    pub show_readings: bool,
}

impl PollSettings {
    pub fn from_config(config: &StationConfig) -> Self {
        Self {
            interval: config.device.poll_interval(),
            measurement: config.influxdb.field.clone(),
            sink_timeout: config.influxdb.write_timeout(),
            show_readings: config.logging.show_readings,
        }
    }
}

/// what one iteration did
#[derive(Debug, PartialEq)]
pub enum PollOutcome {
    Published,
    FetchFailed(FetchError),
    ConversionFailed(ConversionError),
}

pub struct Poller<F, S> {
    settings: PollSettings,
    fetcher: F,
    sink: Option<S>,
    store: SnapshotStore,
    stats: Stats,
}

impl<F: LiveDataSource, S: ReadingSink> Poller<F, S> {
    pub fn new(settings: PollSettings, fetcher: F, sink: Option<S>, store: SnapshotStore, stats: Stats) -> Self {
        Self { settings, fetcher, sink, store, stats }
    }

    /// run one fetch -> convert -> publish -> forward cycle
    pub async fn poll_once(&self) -> PollOutcome {
        let started = unix_now();

        let raw = match self.fetcher.fetch().await {
            Ok(raw) => raw,
            Err(e) => {
                if matches!(e, FetchError::Timeout(_)) {
                    self.stats.record(&[Counter::Polls, Counter::PollsFailed, Counter::FetchTimeouts]);
                } else {
                    self.stats.record(&[Counter::Polls, Counter::PollsFailed]);
                }
                warn!("[POLL] Error fetching Ecowitt: {}", e);
                self.store.record_failure(&e, started).await;
                return PollOutcome::FetchFailed(e);
            }
        };
        debug!("[POLL] Raw feed: {} field(s)", raw.len());

        let reading = match convert(&raw, started) {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.record(&[Counter::Polls, Counter::PollsFailed, Counter::ConversionErrors]);
                warn!("[POLL] Data error in payload from Ecowitt: {}", e);
                self.store.record_failure(&e, started).await;
                return PollOutcome::ConversionFailed(e);
            }
        };

        if self.settings.show_readings {
            info!(
                "[POLL] Temp: {:.1}°F | Humidity: {} | Pressure: {}",
                reading.temperature,
                reading.humidity.map_or("--".to_string(), |h| format!("{}%", h)),
                reading.pressure.map_or("--".to_string(), |p| format!("{:.1} hPa", p)),
            );
        }

        self.store.publish(reading.clone(), started).await;
        self.stats.record(&[Counter::Polls, Counter::PollsOk]);
        debug!("[POLL] Weather data loaded");

        self.forward(&reading).await;
        PollOutcome::Published
    }

    /// sink failures are counted and logged, never retried
    async fn forward(&self, reading: &WeatherReading) {
        let Some(sink) = &self.sink else { return };

        let write = sink.write(&self.settings.measurement, reading);
        match tokio::time::timeout(self.settings.sink_timeout, write).await {
            Ok(Ok(())) => {
                self.stats.increment(Counter::SinkWrites);
                debug!("[SINK] Wrote reading to InfluxDB");
            }
            Ok(Err(e)) => {
                self.stats.increment(Counter::SinkErrors);
                warn!("[SINK] Error writing to InfluxDB (transient: {}): {}", e.is_transient(), e);
            }
            Err(_) => {
                self.stats.increment(Counter::SinkErrors);
                warn!("[SINK] Write abandoned after {:?}", self.settings.sink_timeout);
            }
        }
    }

    /// poll at a fixed cadence until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("[POLL] Starting device polling ({:?} interval)", self.settings.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    // a dropped sender also means stop
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *shutdown.borrow() {
                break;
            }
            self.poll_once().await;
        }

        info!("[POLL] Poll loop stopped");
    }
}
