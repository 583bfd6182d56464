//! Outbound URL validation.
//!
//! Loopback, private, link-local and unspecified addresses (and `localhost`)
//! are rejected unless the exact host appears in `allowed_domains`.
//! Wildcard entries never unlock a private host.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};
use ::url::{Host, Url};

fn default_schemes() -> BTreeSet<String> {
    BTreeSet::from(["https".to_string()])
}

/// Which URLs a live invocation may target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPolicy {
    #[serde(default = "default_schemes")]
    pub allowed_schemes: BTreeSet<String>,
    /// `None` allows any public host. Entries are exact hosts or `*.suffix`.
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            allowed_schemes: default_schemes(),
            allowed_domains: None,
        }
    }
}

impl UrlPolicy {
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.allowed_schemes.insert(scheme.into().to_ascii_lowercase());
        self
    }

    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = Some(domains.into_iter().map(Into::into).collect());
        self
    }

    fn explicitly_lists(&self, host: &str) -> bool {
        self.allowed_domains
            .as_ref()
            .is_some_and(|domains| domains.iter().any(|d| d.eq_ignore_ascii_case(host)))
    }

    fn domain_allowed(&self, host: &str) -> bool {
        let Some(domains) = &self.allowed_domains else {
            return true;
        };
        domains.iter().any(|entry| {
            let entry = entry.to_ascii_lowercase();
            match entry.strip_prefix("*.") {
                Some(suffix) => host == suffix || host.ends_with(&format!(".{suffix}")),
                None => host == entry,
            }
        })
    }
}

/// Security-boundary rejection. Fatal: never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlValidationError {
    #[error("url is empty")]
    Empty,

    #[error("url is malformed: {0}")]
    Malformed(String),

    #[error("scheme '{scheme}' is not allowed")]
    SchemeNotAllowed { scheme: String },

    #[error("url has no host")]
    MissingHost,

    #[error("host '{host}' is a loopback or private network address")]
    PrivateHost { host: String },

    #[error("host '{host}' is not in the allowed domains")]
    DomainNotAllowed { host: String },
}

/// Validate `url` against `policy`, returning the parsed URL.
pub fn validate_url(url: &str, policy: &UrlPolicy) -> Result<Url, UrlValidationError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let parsed = Url::parse(trimmed).map_err(|e| UrlValidationError::Malformed(e.to_string()))?;

    let scheme = parsed.scheme().to_ascii_lowercase();
    if !policy.allowed_schemes.contains(&scheme) {
        return Err(UrlValidationError::SchemeNotAllowed { scheme });
    }

    let (host, private) = match parsed.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            let private = domain == "localhost" || domain.ends_with(".localhost");
            (domain, private)
        }
        Some(Host::Ipv4(ip)) => (ip.to_string(), is_private_ip(&IpAddr::V4(ip))),
        Some(Host::Ipv6(ip)) => (ip.to_string(), is_private_ip(&IpAddr::V6(ip))),
        None => return Err(UrlValidationError::MissingHost),
    };
    if host.is_empty() {
        return Err(UrlValidationError::MissingHost);
    }

    if private && !policy.explicitly_lists(&host) {
        return Err(UrlValidationError::PrivateHost { host });
    }

    if !policy.domain_allowed(&host) {
        return Err(UrlValidationError::DomainNotAllowed { host });
    }

    Ok(parsed)
}

/// Loopback, private, link-local, shared or unspecified.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_private_ipv4(addr: &Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_ipv6(addr: &Ipv6Addr) -> bool {
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return is_private_ipv4(&mapped);
    }
    let first = addr.segments()[0];
    addr.is_loopback()
        || addr.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}
