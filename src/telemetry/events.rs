use std::fmt;

use crate::envelope::EventKind;

/// Structured events emitted at every drop/miss/population-change site in the
/// core. Mirrors the metric surface in the crate's external-interfaces docs:
/// `sinks.dropped`, `sinks.errors.dropped`, `firehose.dropped`,
/// `doppler.shedEnvelopes`, `listeners.receivedEnvelopes`,
/// `listeners.totalReceivedMessageCount`, and the per-sink-kind population
/// gauges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DopplerEvent {
    /// A non-blocking enqueue into a sink's input queue failed.
    SinkDropped { app_id: String },
    /// A non-blocking enqueue of an error envelope failed.
    SinkErrorDropped { app_id: String },
    /// A firehose broadcast swept every member's input queue and found all
    /// of them full.
    FirehoseDropped { subscription_id: String },
    /// The diode discarded envelopes on reader overrun.
    EnvelopesShed { count: u64 },
    /// An envelope was accepted by an ingress collaborator.
    EnvelopeReceived { protocol: Protocol, event_kind: EventKind },
    /// A single message reached the router (aggregate counter).
    MessageReceived,
    /// A sink of `kind` was registered (+1) or unregistered (-1).
    SinkPopulationChanged { kind: SinkPopulationKind, delta: i64 },
}

/// Ingress protocol tag carried on `EnvelopeReceived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Grpc,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => write!(f, "udp"),
            Protocol::Grpc => write!(f, "grpc"),
        }
    }
}

/// The sink kinds tracked by the population gauges (`numberOfSinks.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPopulationKind {
    Dump,
    Syslog,
    Websocket,
    Firehose,
}

impl fmt::Display for SinkPopulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkPopulationKind::Dump => write!(f, "dump"),
            SinkPopulationKind::Syslog => write!(f, "syslog"),
            SinkPopulationKind::Websocket => write!(f, "websocket"),
            SinkPopulationKind::Firehose => write!(f, "firehose"),
        }
    }
}

impl fmt::Display for DopplerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DopplerEvent::SinkDropped { app_id } => write!(f, "sinks.dropped app_id={}", app_id),
            DopplerEvent::SinkErrorDropped { app_id } => {
                write!(f, "sinks.errors.dropped app_id={}", app_id)
            }
            DopplerEvent::FirehoseDropped { subscription_id } => {
                write!(f, "firehose.dropped subscription_id={}", subscription_id)
            }
            DopplerEvent::EnvelopesShed { count } => {
                write!(f, "doppler.shedEnvelopes count={}", count)
            }
            DopplerEvent::EnvelopeReceived { protocol, event_kind } => write!(
                f,
                "listeners.receivedEnvelopes protocol={} event_type={:?}",
                protocol, event_kind
            ),
            DopplerEvent::MessageReceived => write!(f, "listeners.totalReceivedMessageCount"),
            DopplerEvent::SinkPopulationChanged { kind, delta } => {
                write!(f, "numberOfSinks.{} delta={}", kind, delta)
            }
        }
    }
}
