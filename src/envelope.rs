//! The telemetry envelope and the handful of types that travel alongside it.

use std::sync::Arc;

/// Tag distinguishing what an envelope carries. Plain C-like enum: cheap to
/// match on, cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Log,
    ContainerMetric,
    Value,
    Counter,
    Error,
}

#[derive(Debug)]
struct EnvelopeInner {
    app_id: String,
    event_kind: EventKind,
    origin: String,
    instance_index: Option<u32>,
    timestamp_nanos: u64,
    message: String,
}

/// The unit of telemetry flowing through the core. Immutable once
/// constructed; cheaply cloned (`Arc`-backed payload) since the same
/// envelope is fanned out to many sinks.
///
/// `timestamp_nanos` is monotonic nanoseconds since an arbitrary epoch,
/// supplied by the producer — the core never stamps an envelope with a wall
/// clock read of its own.
#[derive(Debug, Clone)]
pub struct Envelope {
    inner: Arc<EnvelopeInner>,
}

impl Envelope {
    pub fn new(
        app_id: impl Into<String>,
        event_kind: EventKind,
        origin: impl Into<String>,
        timestamp_nanos: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(EnvelopeInner {
                app_id: app_id.into(),
                event_kind,
                origin: origin.into(),
                instance_index: None,
                timestamp_nanos,
                message: message.into(),
            }),
        }
    }

    /// Builds a container-metric envelope, which carries an instance-index.
    pub fn container_metric(
        app_id: impl Into<String>,
        origin: impl Into<String>,
        instance_index: u32,
        timestamp_nanos: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(EnvelopeInner {
                app_id: app_id.into(),
                event_kind: EventKind::ContainerMetric,
                origin: origin.into(),
                instance_index: Some(instance_index),
                timestamp_nanos,
                message: message.into(),
            }),
        }
    }

    /// Builds an `EventKind::Error` envelope addressed to `app_id`, the
    /// shape `SinkManager::send_syslog_error_to_loggregator` produces.
    pub fn error(app_id: impl Into<String>, timestamp_nanos: u64, message: impl Into<String>) -> Self {
        Self::new(app_id, EventKind::Error, "doppler", timestamp_nanos, message)
    }

    pub fn app_id(&self) -> &str {
        &self.inner.app_id
    }

    pub fn event_kind(&self) -> EventKind {
        self.inner.event_kind
    }

    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn instance_index(&self) -> Option<u32> {
        self.inner.instance_index
    }

    pub fn timestamp_nanos(&self) -> u64 {
        self.inner.timestamp_nanos
    }

    pub fn message(&self) -> &str {
        &self.inner.message
    }
}

/// One configured syslog destination for an app. Keyed by (app-id,
/// drain-url): `Eq`/`Hash` derive from that pair alone, so two `AppService`s
/// with the same app-id and drain-url but different hostnames are
/// considered the same service.
#[derive(Debug, Clone)]
pub struct AppService {
    pub app_id: String,
    pub drain_url: String,
    pub hostname: String,
}

impl AppService {
    pub fn new(app_id: impl Into<String>, drain_url: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self { app_id: app_id.into(), drain_url: drain_url.into(), hostname: hostname.into() }
    }
}

impl PartialEq for AppService {
    fn eq(&self, other: &Self) -> bool {
        self.app_id == other.app_id && self.drain_url == other.drain_url
    }
}

impl Eq for AppService {}

impl std::hash::Hash for AppService {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.app_id.hash(state);
        self.drain_url.hash(state);
    }
}
