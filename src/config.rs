//! Runtime configuration for the core. Construction is validated; loading
//! from env/file/flags is out of scope — this struct is the seam an
//! out-of-core loader populates.

use std::net::Ipv4Addr;
use std::time::Duration;

/// An inclusive IPv4 range used by the syslog drain-URL deny-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl IpRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { start, end }
    }

    /// Inclusive containment check at both endpoints.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) >= u32::from(self.start) && u32::from(addr) <= u32::from(self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_retained_log_messages must be > 0")]
    ZeroRetainedLogMessages,
    #[error("message_drain_buffer_size must be > 0")]
    ZeroDrainBufferSize,
    #[error("sink_inactivity_timeout must be > 0")]
    ZeroInactivityTimeout,
    #[error("sink_io_timeout must be > 0")]
    ZeroIoTimeout,
    #[error("sink_dial_timeout must be > 0")]
    ZeroDialTimeout,
    #[error("container_metric_ttl must be > 0")]
    ZeroMetricTtl,
    #[error("black_list_ips range start {start} is greater than end {end}")]
    InvertedIpRange { start: Ipv4Addr, end: Ipv4Addr },
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct DopplerConfig {
    pub max_retained_log_messages: usize,
    pub message_drain_buffer_size: usize,
    pub sink_inactivity_timeout: Duration,
    pub sink_io_timeout: Duration,
    pub sink_dial_timeout: Duration,
    pub container_metric_ttl: Duration,
    pub black_list_ips: Vec<IpRange>,
    pub sink_skip_cert_verify: bool,
}

impl DopplerConfig {
    /// Defaults match production sizing, with an empty deny-list.
    pub fn builder() -> DopplerConfigBuilder {
        DopplerConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retained_log_messages == 0 {
            return Err(ConfigError::ZeroRetainedLogMessages);
        }
        if self.message_drain_buffer_size == 0 {
            return Err(ConfigError::ZeroDrainBufferSize);
        }
        if self.sink_inactivity_timeout.is_zero() {
            return Err(ConfigError::ZeroInactivityTimeout);
        }
        if self.sink_io_timeout.is_zero() {
            return Err(ConfigError::ZeroIoTimeout);
        }
        if self.sink_dial_timeout.is_zero() {
            return Err(ConfigError::ZeroDialTimeout);
        }
        if self.container_metric_ttl.is_zero() {
            return Err(ConfigError::ZeroMetricTtl);
        }
        for range in &self.black_list_ips {
            if u32::from(range.start) > u32::from(range.end) {
                return Err(ConfigError::InvertedIpRange { start: range.start, end: range.end });
            }
        }
        Ok(())
    }
}

impl Default for DopplerConfig {
    fn default() -> Self {
        DopplerConfigBuilder::default()
            .build()
            .expect("default DopplerConfig must satisfy its own invariants")
    }
}

pub struct DopplerConfigBuilder {
    max_retained_log_messages: usize,
    message_drain_buffer_size: usize,
    sink_inactivity_timeout: Duration,
    sink_io_timeout: Duration,
    sink_dial_timeout: Duration,
    container_metric_ttl: Duration,
    black_list_ips: Vec<IpRange>,
    sink_skip_cert_verify: bool,
}

impl Default for DopplerConfigBuilder {
    fn default() -> Self {
        Self {
            max_retained_log_messages: 100,
            message_drain_buffer_size: 10_000,
            sink_inactivity_timeout: Duration::from_secs(3600),
            sink_io_timeout: Duration::from_secs(10),
            sink_dial_timeout: Duration::from_secs(5),
            container_metric_ttl: Duration::from_secs(120),
            black_list_ips: Vec::new(),
            sink_skip_cert_verify: false,
        }
    }
}

impl DopplerConfigBuilder {
    pub fn max_retained_log_messages(mut self, n: usize) -> Self {
        self.max_retained_log_messages = n;
        self
    }

    pub fn message_drain_buffer_size(mut self, n: usize) -> Self {
        self.message_drain_buffer_size = n;
        self
    }

    pub fn sink_inactivity_timeout(mut self, d: Duration) -> Self {
        self.sink_inactivity_timeout = d;
        self
    }

    pub fn sink_io_timeout(mut self, d: Duration) -> Self {
        self.sink_io_timeout = d;
        self
    }

    pub fn sink_dial_timeout(mut self, d: Duration) -> Self {
        self.sink_dial_timeout = d;
        self
    }

    pub fn container_metric_ttl(mut self, d: Duration) -> Self {
        self.container_metric_ttl = d;
        self
    }

    pub fn black_list_ips(mut self, ranges: Vec<IpRange>) -> Self {
        self.black_list_ips = ranges;
        self
    }

    pub fn sink_skip_cert_verify(mut self, skip: bool) -> Self {
        self.sink_skip_cert_verify = skip;
        self
    }

    #[must_use = "the result must be checked for validation errors"]
    pub fn build(self) -> Result<DopplerConfig, ConfigError> {
        let config = DopplerConfig {
            max_retained_log_messages: self.max_retained_log_messages,
            message_drain_buffer_size: self.message_drain_buffer_size,
            sink_inactivity_timeout: self.sink_inactivity_timeout,
            sink_io_timeout: self.sink_io_timeout,
            sink_dial_timeout: self.sink_dial_timeout,
            container_metric_ttl: self.container_metric_ttl,
            black_list_ips: self.black_list_ips,
            sink_skip_cert_verify: self.sink_skip_cert_verify,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DopplerConfig::default();
        assert_eq!(config.max_retained_log_messages, 100);
        assert_eq!(config.message_drain_buffer_size, 10_000);
    }

    #[test]
    fn zero_retained_log_messages_rejected() {
        let err = DopplerConfig::builder().max_retained_log_messages(0).build().unwrap_err();
        assert_eq!(err, ConfigError::ZeroRetainedLogMessages);
    }

    #[test]
    fn zero_io_timeout_rejected() {
        let err =
            DopplerConfig::builder().sink_io_timeout(Duration::ZERO).build().unwrap_err();
        assert_eq!(err, ConfigError::ZeroIoTimeout);
    }

    #[test]
    fn inverted_ip_range_rejected() {
        let range = IpRange::new(Ipv4Addr::new(10, 0, 0, 100), Ipv4Addr::new(10, 0, 0, 1));
        let err = DopplerConfig::builder().black_list_ips(vec![range]).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvertedIpRange { .. }));
    }

    #[test]
    fn ip_range_contains_is_inclusive_at_both_ends() {
        let range = IpRange::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 10));
        assert!(range.contains(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(range.contains(Ipv4Addr::new(10, 0, 0, 10)));
        assert!(range.contains(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(!range.contains(Ipv4Addr::new(10, 0, 0, 11)));
        assert!(!range.contains(Ipv4Addr::new(10, 0, 0, 0)));
    }
}
