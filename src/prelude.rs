//! Convenient re-exports of the most commonly used Doppler types.
pub use crate::{
    blacklist::{BlacklistError, Resolver, StaticResolver, UrlBlacklistManager},
    config::{ConfigError, DopplerConfig, DopplerConfigBuilder, IpRange},
    container_metric::ContainerMetricSink,
    diode::{EnvelopeDiode, MissCallback},
    doppler_error::DopplerError,
    dump::DumpSink,
    envelope::{AppService, EventKind, Envelope},
    firehose::FirehoseGroup,
    grouped_sinks::{EnsureOutcome, GroupedSinks},
    router::MessageRouter,
    sink::{SinkKind, SinkWrapper, WebsocketSendError, WebsocketSink, WebsocketTransport, SINK_QUEUE_CAPACITY},
    sink_manager::SinkManager,
    syslog::{
        NullSyslogWriter, NullSyslogWriterFactory, SyslogSink, SyslogWriteError, SyslogWriter,
        SyslogWriterFactory,
    },
    telemetry::{DopplerEvent, LogMetricSink, MemoryMetricSink, MetricSink, NullMetricSink, Protocol, SinkPopulationKind},
    CircuitBreakerConfig, CircuitBreakerPolicy, ResilienceError, ResilienceStack,
    ResilienceStackBuilder, RetryPolicy, RetryPolicyBuilder, TimeoutPolicy,
};
