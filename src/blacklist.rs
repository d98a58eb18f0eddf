//! Validates syslog drain URLs against a CIDR-style deny-list before a
//! `SyslogSink` is ever constructed for them.

use std::net::Ipv4Addr;

use url::Url;

use crate::config::IpRange;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlacklistError {
    #[error("malformed drain url: {0}")]
    Malformed(String),
    #[error("unsupported drain scheme: {0}")]
    UnsupportedScheme(String),
    #[error("drain host could not be resolved: {0}")]
    UnresolvableHost(String),
    #[error("drain host resolves to a denied address: {0}")]
    Denied(Ipv4Addr),
}

/// Pluggable DNS lookup so tests never touch the network. The source does a
/// real lookup; the core only needs the seam.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> Vec<Ipv4Addr>;
}

/// Resolver that returns a fixed mapping, for tests and for hosts that are
/// already literal IPv4 addresses.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    entries: std::collections::HashMap<String, Vec<Ipv4Addr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: impl Into<String>, addrs: Vec<Ipv4Addr>) -> Self {
        self.entries.insert(host.into(), addrs);
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str) -> Vec<Ipv4Addr> {
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return vec![addr];
        }
        self.entries.get(host).cloned().unwrap_or_default()
    }
}

const ALLOWED_SCHEMES: [&str; 3] = ["syslog", "syslog-tls", "https"];

/// Parses and validates syslog drain URLs against a configured deny-list.
pub struct UrlBlacklistManager {
    deny_ranges: Vec<IpRange>,
    resolver: Box<dyn Resolver>,
}

impl UrlBlacklistManager {
    pub fn new(deny_ranges: Vec<IpRange>, resolver: impl Resolver + 'static) -> Self {
        Self { deny_ranges, resolver: Box::new(resolver) }
    }

    /// Validates `raw`: well-formed URL, allowed scheme, resolvable host, and
    /// none of the resolved addresses fall inside a deny-range (inclusive at
    /// both endpoints).
    pub fn check_url(&self, raw: &str) -> Result<Url, BlacklistError> {
        let url = Url::parse(raw).map_err(|e| BlacklistError::Malformed(e.to_string()))?;

        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(BlacklistError::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = url.host_str().ok_or_else(|| BlacklistError::Malformed(raw.to_string()))?;
        let addrs = self.resolver.resolve(host);
        if addrs.is_empty() {
            return Err(BlacklistError::UnresolvableHost(host.to_string()));
        }

        for addr in &addrs {
            if self.deny_ranges.iter().any(|range| range.contains(*addr)) {
                return Err(BlacklistError::Denied(*addr));
            }
        }

        Ok(url)
    }
}
