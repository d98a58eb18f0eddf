//! Structured events and metric sinks for the core.
//!
//! Every drop, shed, and population-change site described in the crate's
//! concurrency and external-interfaces docs emits a [`DopplerEvent`] through
//! a [`MetricSink`]. Production callers that don't want a collector use
//! [`NullMetricSink`]; tests use [`MemoryMetricSink`] to assert on emitted
//! events.

pub mod events;
pub mod sinks;

pub use events::{DopplerEvent, Protocol, SinkPopulationKind};
pub use sinks::{emit, LogMetricSink, MemoryMetricSink, MetricSink, NullMetricSink};
