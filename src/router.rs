//! The single consumer of the `EnvelopeDiode`: dispatches each envelope to
//! the `SinkManager` by app-id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::diode::EnvelopeDiode;
use crate::sink_manager::SinkManager;
use crate::sleeper::Sleeper;
use crate::telemetry::sinks::MetricSink;

/// Backoff between empty polls of the diode.
const POLL_BACKOFF: Duration = Duration::from_millis(10);

/// Loops `try_next` on the diode; on `None`, sleeps briefly and retries. On
/// `Some(envelope)`, extracts the app-id (empty string for platform events)
/// and hands it to `SinkManager::send_to`.
pub struct MessageRouter<M: MetricSink> {
    diode: Arc<EnvelopeDiode>,
    sink_manager: Arc<SinkManager<M>>,
    sleeper: Arc<dyn Sleeper>,
    stopped: Arc<AtomicBool>,
}

impl<M: MetricSink> MessageRouter<M> {
    pub fn new(diode: Arc<EnvelopeDiode>, sink_manager: Arc<SinkManager<M>>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { diode, sink_manager, sleeper, stopped: Arc::new(AtomicBool::new(false)) }
    }

    /// Runs until `stop` is called. Intended to be driven inside a
    /// `tokio::spawn`ed task by the caller.
    pub async fn run(&self) {
        while !self.stopped.load(Ordering::Acquire) {
            match self.diode.try_next() {
                Some(envelope) => {
                    let app_id = envelope.app_id().to_string();
                    self.sink_manager.send_to(&app_id, envelope).await;
                }
                None => self.sleeper.sleep(POLL_BACKOFF).await,
            }
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
