//! Source validation: scheme, allow-list, private-host guard, duplicates.
//!
//! [`SourceValidator::validate`] is pure over its configuration and the
//! caller's [`SeenSet`]; recording a URL as processed is a separate step.

use std::collections::HashSet;
use std::net::IpAddr;

use url::Url;

use featurelens_shared::{FeatureLensError, Result, ScrapingConfig, host_matches};

/// Outcome of validating one candidate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub allowed: bool,
    pub reason: String,
}

impl Validation {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: "allowed".into(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// URLs already handled in the current research cycle.
#[derive(Debug, Default, Clone)]
pub struct SeenSet {
    urls: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.urls.contains(&normalize_url(url))
    }

    /// Record `url`. Returns `false` if it was already present.
    pub fn insert(&mut self, url: &Url) -> bool {
        self.urls.insert(normalize_url(url))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Checks candidate URLs before any fetch is attempted.
#[derive(Debug, Clone)]
pub struct SourceValidator {
    allowed_domains: Vec<String>,
    allow_private_hosts: bool,
}

impl SourceValidator {
    pub fn new(config: &ScrapingConfig) -> Self {
        Self {
            allowed_domains: config.allowed_domains.clone(),
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    /// Validate a raw URL string.
    pub fn validate(&self, raw: &str, seen: &SeenSet) -> Validation {
        match Url::parse(raw.trim()) {
            Ok(url) => self.validate_url(&url, seen),
            Err(e) => Validation::reject(format!("unparseable URL: {e}")),
        }
    }

    pub fn validate_url(&self, url: &Url, seen: &SeenSet) -> Validation {
        if !matches!(url.scheme(), "http" | "https") {
            return Validation::reject(format!("unsupported scheme '{}'", url.scheme()));
        }

        let Some(host) = url.host_str() else {
            return Validation::reject("missing host");
        };

        if !self
            .allowed_domains
            .iter()
            .any(|domain| host_matches(host, domain))
        {
            return Validation::reject(format!("host '{host}' is not on the allow-list"));
        }

        if !self.allow_private_hosts && is_private_host(url) {
            return Validation::reject(format!("host '{host}' is private or loopback"));
        }

        if seen.contains(url) {
            return Validation::reject("already processed in this cycle");
        }

        Validation::allow()
    }

    /// Validate and parse, turning a rejection into [`FeatureLensError::ValidationRejected`].
    pub fn check(&self, raw: &str, seen: &SeenSet) -> Result<Url> {
        let validation = self.validate(raw, seen);
        if !validation.allowed {
            return Err(FeatureLensError::rejected(raw, validation.reason));
        }
        Url::parse(raw.trim()).map_err(|e| FeatureLensError::rejected(raw, e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Whether `url` points at loopback, private, or otherwise local addresses.
fn is_private_host(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Normalize a URL for deduplication (strip fragment and trailing slash).
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    // Keep the root slash
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}
