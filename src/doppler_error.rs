//! The unified error type for the handful of core operations that return a
//! `Result` rather than a bool/drop-and-count outcome: validating a syslog
//! drain URL and constructing the writer behind it.
//!
//! Everything else in the core (registration collisions, saturated queues,
//! diode overruns) is modeled as a bool or a silent drop-and-count, per
//! the error handling design: no error arising from routing or fan-out is
//! fatal, and nothing here is meant to propagate out of the core.

use crate::blacklist::BlacklistError;
use crate::config::ConfigError;

/// Failures that can arise while materializing a `SyslogSink` for a newly
/// announced `AppService`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DopplerError {
    /// The drain URL failed blacklist validation (malformed, disallowed
    /// scheme, unresolvable host, or denied IP).
    #[error(transparent)]
    Blacklist(#[from] BlacklistError),

    /// The supplied `DopplerConfig` failed its own validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The concrete writer for a validated drain URL could not be
    /// constructed (the dialer itself is out of core scope; this variant
    /// is the seam a real `SyslogWriterFactory` reports through).
    #[error("failed to construct syslog writer for {url}: {reason}")]
    WriterConstruction { url: String, reason: String },
}
