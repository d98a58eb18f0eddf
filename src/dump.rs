//! Per-app ring of the most recently retained log messages.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::envelope::{Envelope, EventKind};

/// Holds the last `capacity` log-kind envelopes seen for one app. Safe to
/// `dump()` concurrently with `run()` — both take the same internal mutex,
/// and `dump()` only ever holds it long enough to clone out a snapshot.
pub struct DumpSink {
    app_id: String,
    capacity: usize,
    inactivity_timeout: Duration,
    buffer: Mutex<VecDeque<Envelope>>,
}

impl DumpSink {
    pub fn new(app_id: impl Into<String>, capacity: usize, inactivity_timeout: Duration) -> Self {
        assert!(capacity > 0, "DumpSink capacity must be > 0");
        Self {
            app_id: app_id.into(),
            capacity,
            inactivity_timeout,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// The dump sink's identifier is the app-id itself — the load-bearing
    /// asymmetry with `ContainerMetricSink::identifier` (see DESIGN.md).
    pub fn identifier(&self) -> &str {
        &self.app_id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// A chronological (oldest-first) snapshot of at most `capacity` entries.
    pub fn dump(&self) -> Vec<Envelope> {
        self.buffer.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }

    fn record(&self, envelope: Envelope) {
        if envelope.event_kind() != EventKind::Log {
            return;
        }
        let mut buffer = self.buffer.lock().unwrap_or_else(|p| p.into_inner());
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(envelope);
    }

    /// Reads from `input` until it closes or no envelope arrives within
    /// `inactivity_timeout`. Either path returns from `run`, which the
    /// caller (`SinkManager`) follows with an unregister.
    pub async fn run(&self, mut input: mpsc::Receiver<Envelope>) {
        loop {
            match tokio::time::timeout(self.inactivity_timeout, input.recv()).await {
                Ok(Some(envelope)) => self.record(envelope),
                Ok(None) => {
                    tracing::debug!(app_id = %self.app_id, "dump sink input closed");
                    return;
                }
                Err(_) => {
                    tracing::debug!(app_id = %self.app_id, "dump sink idle timeout, shutting down");
                    return;
                }
            }
        }
    }
}
