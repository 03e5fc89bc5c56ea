//! Relay metrics.
//!
//! Counters are atomics shared between the relay loop and per-sink
//! workers; the timestamp and per-sink drop counts sit behind a mutex.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    events_published: AtomicU64,
    events_dropped: AtomicU64,
    events_failed: AtomicU64,
    reconnection_attempts: AtomicU64,
    state: Mutex<MetricsState>,
}

#[derive(Debug, Default)]
struct MetricsState {
    last_event_time: Option<DateTime<Utc>>,
    dropped_by_sink: BTreeMap<String, u64>,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayMetricsSnapshot {
    pub events_published: u64,
    pub events_dropped: u64,
    pub events_failed: u64,
    pub reconnection_attempts: u64,
    pub last_event_time: Option<DateTime<Utc>>,
    pub dropped_by_sink: BTreeMap<String, u64>,
}

impl RelayMetricsSnapshot {
    pub fn dropped_for(&self, sink: &str) -> u64 {
        self.dropped_by_sink.get(sink).copied().unwrap_or(0)
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_event(&self) {
        self.state().last_event_time = Some(Utc::now());
    }

    pub(crate) fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, sink: &str) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        *self.state().dropped_by_sink.entry(sink.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        let state = self.state();
        RelayMetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            reconnection_attempts: self.reconnection_attempts.load(Ordering::Relaxed),
            last_event_time: state.last_event_time,
            dropped_by_sink: state.dropped_by_sink.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Relay metrics lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
