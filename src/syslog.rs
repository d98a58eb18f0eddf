//! Per-app outbound syslog forwarder with retry/backoff and circuit-breaker
//! error reporting, built on the crate's own resilience primitives.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use url::Url;

use crate::clock::{Clock, MonotonicClock};
use crate::config::DopplerConfig;
use crate::doppler_error::DopplerError;
use crate::envelope::Envelope;
use crate::stack::ResilienceStack;
use crate::ResilienceError;

/// The concrete transport is out of scope for this crate — this is the seam
/// a TCP/TLS/HTTPS dialer plugs into. Tests use an in-memory recording writer.
#[async_trait::async_trait]
pub trait SyslogWriter: Send + Sync {
    async fn write(&mut self, envelope: &Envelope) -> Result<(), SyslogWriteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyslogWriteError {
    #[error("dial to syslog drain failed: {0}")]
    Dial(String),
    #[error("write to syslog drain failed: {0}")]
    Write(String),
}

/// Constructs the scheme-specific writer for a validated drain URL, carrying
/// `sink_skip_cert_verify` and the dial/io timeouts. The concrete TCP/TLS
/// dialer lives outside the core; this trait documents the seam.
pub trait SyslogWriterFactory: Send + Sync {
    fn build(&self, url: &Url, config: &DopplerConfig) -> Result<Box<dyn SyslogWriter>, DopplerError>;
}

/// Discards every envelope, always succeeding. Stands in for the real dialer
/// until an egress transport is wired up; documents the construction seam
/// rather than implementing one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSyslogWriter;

#[async_trait::async_trait]
impl SyslogWriter for NullSyslogWriter {
    async fn write(&mut self, _envelope: &Envelope) -> Result<(), SyslogWriteError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSyslogWriterFactory;

impl SyslogWriterFactory for NullSyslogWriterFactory {
    fn build(&self, _url: &Url, _config: &DopplerConfig) -> Result<Box<dyn SyslogWriter>, DopplerError> {
        Ok(Box::new(NullSyslogWriter))
    }
}

/// Cadence bound: at most one error envelope per this many milliseconds
/// while a sink stays in backoff, so a stalled drain doesn't flood the app's
/// other sinks with repeats of the same failure.
const DEFAULT_ERROR_EMIT_CADENCE: Duration = Duration::from_secs(30);

/// A forwarder to one external syslog endpoint. `run` drains its input queue
/// and writes each envelope through a `ResilienceStack` combining retry
/// (single attempt per envelope — subsequent envelopes are the retry),
/// circuit breaker (the sink's backoff state), and timeout (dial/io bound).
pub struct SyslogSink {
    app_id: String,
    drain_url: String,
    writer: AsyncMutex<Box<dyn SyslogWriter>>,
    stack: ResilienceStack<SyslogWriteError>,
    error_tx: mpsc::Sender<Envelope>,
    clock: Arc<dyn Clock>,
    disconnected: AtomicBool,
    last_error_emit_millis: AtomicU64,
    error_emit_cadence: Duration,
}

impl SyslogSink {
    pub fn new(
        app_id: impl Into<String>,
        drain_url: impl Into<String>,
        writer: Box<dyn SyslogWriter>,
        io_timeout: Duration,
        error_tx: mpsc::Sender<Envelope>,
    ) -> Result<Self, DopplerError> {
        let stack = ResilienceStack::builder()
            .timeout(io_timeout)
            .map_err(|e| DopplerError::WriterConstruction { url: String::new(), reason: e.to_string() })?
            // First write failure opens the circuit immediately: a single
            // failed drain is already "backoff", not a tolerance window.
            .circuit_breaker(1, io_timeout.max(Duration::from_millis(1)) * 10)
            .build();
        Ok(Self {
            app_id: app_id.into(),
            drain_url: drain_url.into(),
            writer: AsyncMutex::new(writer),
            stack,
            error_tx,
            clock: Arc::new(MonotonicClock::default()),
            disconnected: AtomicBool::new(false),
            last_error_emit_millis: AtomicU64::new(0),
            error_emit_cadence: DEFAULT_ERROR_EMIT_CADENCE,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.drain_url
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Syslog sinks never receive platform-generated error envelopes for
    /// their own app: they are a source of such envelopes, not a sink for
    /// them.
    pub fn should_receive_errors(&self) -> bool {
        false
    }

    /// Idempotent: the underlying writer is replaced with a no-op the first
    /// time this is called; subsequent calls are a no-op.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            *writer = Box::new(NullSyslogWriter);
        }
        tracing::info!(drain_url = %self.drain_url, "syslog sink disconnected");
    }

    /// `last_error_emit_millis == 0` is the sentinel for "never emitted" —
    /// the clock starts at 0 on construction, so the very first check must
    /// not be mistaken for "cadence window not yet elapsed".
    fn bounded_emit_allowed(&self) -> bool {
        let now = self.clock.now_millis();
        let last = self.last_error_emit_millis.load(Ordering::Acquire);
        let cadence_millis = self.error_emit_cadence.as_millis() as u64;
        if last != 0 && now.saturating_sub(last) < cadence_millis {
            return false;
        }
        self.last_error_emit_millis.store(now.max(1), Ordering::Release);
        true
    }

    async fn report_error(&self, message: String) {
        let envelope = Envelope::error(self.app_id.clone(), self.clock.now_millis(), message);
        // Never block the sink task: a stalled error-fan-in task must not
        // stall the drain loop.
        if self.error_tx.try_send(envelope).is_err() {
            tracing::debug!(app_id = %self.app_id, "syslog error channel full, dropping error envelope");
        }
    }

    async fn drain_one(&self, envelope: Envelope) {
        if self.disconnected.load(Ordering::Acquire) {
            return;
        }
        let description = format!("{}", envelope.message());
        let writer = &self.writer;
        let result = self
            .stack
            .execute(|| {
                let envelope = envelope.clone();
                async move {
                    let mut w = writer.lock().await;
                    w.write(&envelope).await.map_err(ResilienceError::Inner)
                }
            })
            .await;

        match result {
            Ok(()) => {}
            Err(ResilienceError::Inner(e)) => {
                tracing::warn!(drain_url = %self.drain_url, error = %e, "syslog write failed, entering backoff");
                self.report_error(format!("failed to write to syslog drain {}: {}", self.drain_url, e)).await;
            }
            Err(ResilienceError::CircuitOpen { .. }) => {
                tracing::debug!(drain_url = %self.drain_url, message = %description, "syslog sink in backoff, dropping envelope");
                if self.bounded_emit_allowed() {
                    self.report_error(format!("syslog drain {} is in backoff", self.drain_url)).await;
                }
            }
            Err(ResilienceError::Timeout { .. }) => {
                tracing::warn!(drain_url = %self.drain_url, "syslog write timed out");
                self.report_error(format!("timed out writing to syslog drain {}", self.drain_url)).await;
            }
            Err(_) => {}
        }
    }

    pub async fn run(&self, mut input: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = input.recv().await {
            if self.disconnected.load(Ordering::Acquire) {
                continue;
            }
            self.drain_one(envelope).await;
        }
        tracing::debug!(drain_url = %self.drain_url, "syslog sink input closed");
    }
}
