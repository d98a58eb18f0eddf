#![forbid(unsafe_code)]

//! # Doppler
//!
//! The telemetry fan-out core of a Loggregator-style log/metric router:
//! a lossy ingress ring buffer, a single routing loop, and a registry of
//! per-app and firehose sinks (dump, container-metric, syslog drain,
//! websocket).
//!
//! ## Pipeline
//!
//! Envelopes land in an [`EnvelopeDiode`] — a fixed-capacity, overwrite-on-full
//! ring buffer that favors freshness over completeness under load. A
//! [`MessageRouter`] drains it and hands each envelope to a [`SinkManager`],
//! which lazily creates the per-app dump and container-metric sinks, opens
//! syslog drains (subject to [`UrlBlacklistManager`] checks), and fans
//! traffic out to any registered firehose subscriptions.
//!
//! Syslog writes go through the crate's generic resilience stack —
//! [`RetryPolicy`], [`CircuitBreakerPolicy`], [`TimeoutPolicy`], composed via
//! [`ResilienceStackBuilder`] — so a flapping drain backs off and eventually
//! trips its breaker instead of stalling the sink's queue.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use doppler_core::blacklist::{StaticResolver, UrlBlacklistManager};
//! use doppler_core::config::DopplerConfig;
//! use doppler_core::grouped_sinks::GroupedSinks;
//! use doppler_core::sink_manager::SinkManager;
//! use doppler_core::syslog::NullSyslogWriterFactory;
//! use doppler_core::telemetry::sinks::NullMetricSink;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sinks = Arc::new(GroupedSinks::new(Arc::new(tokio::sync::Mutex::new(NullMetricSink))));
//!     let blacklist = Arc::new(UrlBlacklistManager::new(vec![], StaticResolver::new()));
//!     let manager = Arc::new(SinkManager::new(
//!         sinks,
//!         DopplerConfig::default(),
//!         blacklist,
//!         Arc::new(NullSyslogWriterFactory),
//!     ));
//!     let (_new_tx, new_rx) = tokio::sync::mpsc::channel(1);
//!     let (_del_tx, del_rx) = tokio::sync::mpsc::channel(1);
//!     manager.clone().start(new_rx, del_rx);
//!     manager.stop();
//! }
//! ```

mod backoff;
mod circuit_breaker;
mod jitter;
mod retry;
mod stack;
mod timeout;

pub mod blacklist;
pub mod clock;
pub mod config;
pub mod container_metric;
pub mod diode;
pub mod doppler_error;
pub mod dump;
pub mod envelope;
pub mod error;
pub mod firehose;
pub mod grouped_sinks;
pub mod router;
pub mod sink;
pub mod sink_manager;
pub mod sleeper;
pub mod syslog;
pub mod telemetry;

// Re-exports: generic resilience primitives used internally by the syslog
// write path.
pub use backoff::{
    Backoff, BackoffError, BackoffStrategy, ConstantBackoff, ExponentialBackoff, LinearBackoff,
    MAX_BACKOFF,
};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use error::ResilienceError;
pub use jitter::Jitter;
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT};

// Re-exports: the Doppler core surface.
pub use blacklist::{BlacklistError, Resolver, StaticResolver, UrlBlacklistManager};
pub use clock::{Clock, MonotonicClock};
pub use config::{ConfigError, DopplerConfig, DopplerConfigBuilder, IpRange};
pub use container_metric::ContainerMetricSink;
pub use diode::{EnvelopeDiode, MissCallback};
pub use doppler_error::DopplerError;
pub use dump::DumpSink;
pub use envelope::{AppService, EventKind, Envelope};
pub use firehose::FirehoseGroup;
pub use grouped_sinks::{EnsureOutcome, GroupedSinks};
pub use router::MessageRouter;
pub use sink::{SinkKind, SinkWrapper, WebsocketSendError, WebsocketSink, WebsocketTransport, SINK_QUEUE_CAPACITY};
pub use sink_manager::SinkManager;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use syslog::{
    NullSyslogWriter, NullSyslogWriterFactory, SyslogSink, SyslogWriteError, SyslogWriter,
    SyslogWriterFactory,
};

pub mod prelude;
