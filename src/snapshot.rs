//! ==============================================================================
//! snapshot.rs - latest-reading store shared by the poller and the api
//! ==============================================================================
//!
//! purpose:
//!     holds the one current `Snapshot`. the poll loop is the only writer;
//!     any number of http handlers read.
//!
//! locking:
//!     arc<rwlock<>> as in the rest of the host. the lock is held only to
//!     copy or replace the struct, never across a network call. readers get
//!     a clone, so a reader racing a publish sees the old snapshot or the
//!     new one, never a mix.
//!
//! ==============================================================================

use crate::domain::{Snapshot, WeatherReading};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// replace the current reading and stamp the success time
    ///
    /// failure metadata is kept so `/stats` still shows the last error.
    pub async fn publish(&self, reading: WeatherReading, at: u64) {
        let mut guard = self.inner.write().await;
        guard.reading = Some(reading);
        guard.last_success = Some(at);
    }

    /// note a failed poll, leaving the reading untouched
    pub async fn record_failure(&self, error: impl ToString, at: u64) {
        let mut guard = self.inner.write().await;
        guard.last_failure = Some(at);
        guard.last_error = Some(error.to_string());
    }

    /// consistent copy of the current state
    pub async fn read(&self) -> Snapshot {
        self.inner.read().await.clone()
    }
}
