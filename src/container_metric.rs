//! Per-app, per-instance latest-container-metric cache with TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::{Clock, MonotonicClock};
use crate::envelope::{Envelope, EventKind};

/// Stores, per instance-index, the most recent container-metric envelope
/// and the clock reading at which it arrived. Stale entries are filtered on
/// read rather than proactively swept.
pub struct ContainerMetricSink {
    app_id: String,
    ttl: Duration,
    inactivity_timeout: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<u32, (Envelope, u64)>>,
}

impl ContainerMetricSink {
    pub fn new(app_id: impl Into<String>, ttl: Duration, inactivity_timeout: Duration) -> Self {
        Self::with_clock(app_id, ttl, inactivity_timeout, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(
        app_id: impl Into<String>,
        ttl: Duration,
        inactivity_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { app_id: app_id.into(), ttl, inactivity_timeout, clock, entries: Mutex::new(HashMap::new()) }
    }

    /// The container-metric sink's identifier: `"container-metrics-" +
    /// app-id`, the other half of the load-bearing identifier asymmetry
    /// with `DumpSink::identifier`.
    pub fn identifier(&self) -> String {
        format!("container-metrics-{}", self.app_id)
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn record(&self, envelope: Envelope) {
        let Some(instance_index) = envelope.instance_index() else { return };
        if envelope.event_kind() != EventKind::ContainerMetric {
            return;
        }
        let now = self.clock.now_millis();
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).insert(instance_index, (envelope, now));
    }

    /// The freshest envelope per instance-index whose age is within the
    /// configured TTL. Entries past their TTL are silently excluded, not
    /// removed — the next fresh write for that instance overwrites them
    /// anyway.
    pub fn get_latest(&self) -> Vec<Envelope> {
        let now = self.clock.now_millis();
        let ttl_millis = self.ttl.as_millis() as u64;
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|(_, arrived)| now.saturating_sub(*arrived) < ttl_millis)
            .map(|(envelope, _)| envelope.clone())
            .collect()
    }

    pub async fn run(&self, mut input: mpsc::Receiver<Envelope>) {
        loop {
            match tokio::time::timeout(self.inactivity_timeout, input.recv()).await {
                Ok(Some(envelope)) => self.record(envelope),
                Ok(None) => {
                    tracing::debug!(app_id = %self.app_id, "container-metric sink input closed");
                    return;
                }
                Err(_) => {
                    tracing::debug!(app_id = %self.app_id, "container-metric sink idle timeout, shutting down");
                    return;
                }
            }
        }
    }
}
