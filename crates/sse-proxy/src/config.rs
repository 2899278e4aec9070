//! Proxy configuration: the upstream base URL and the optional bearer credential.

use crate::error::{ProxyError, Result};
use hyper::Uri;
use std::fmt;
use std::time::Duration;

/// Overall timeout for one upstream exchange (response headers, and the body
/// for buffered responses). Model completions can run for minutes.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// TCP connect timeout towards the upstream.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Literal marker in the request body that selects the streaming path.
pub const STREAM_MARKER: &str = "\"stream\":true";

/// Non-secret value handed to the downstream tool in place of the real key.
pub const PLACEHOLDER_API_KEY: &str = "sk-proxy-handled-by-sse-normalizing-proxy";

/// Bearer credential for the upstream. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted description safe for logs: length plus a short prefix.
    pub fn preview(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        if self.0.chars().count() > 8 {
            format!("len={}, prefix={prefix}...", self.0.len())
        } else {
            format!("len={}", self.0.len())
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.preview())
    }
}

/// Immutable configuration of one proxy instance.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    upstream_base_url: String,
    credential: Option<Credential>,
}

impl ProxyConfig {
    /// Validate the upstream URL and build the configuration.
    ///
    /// One trailing `/` is stripped so request paths can be appended verbatim.
    /// An empty credential counts as no credential.
    pub fn new(upstream_base_url: &str, credential: Option<&str>) -> Result<Self> {
        let trimmed = upstream_base_url.trim();
        let base = trimmed.strip_suffix('/').unwrap_or(trimmed);
        validate_base_url(base)?;

        Ok(Self {
            upstream_base_url: base.to_string(),
            credential: credential
                .filter(|secret| !secret.is_empty())
                .map(Credential::new),
        })
    }

    pub fn upstream_base_url(&self) -> &str {
        &self.upstream_base_url
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }
}

fn validate_base_url(url: &str) -> Result<()> {
    let invalid = |reason: &str| ProxyError::InvalidUpstreamUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri = url.parse::<Uri>().map_err(|e| invalid(&e.to_string()))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(other) => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        None => return Err(invalid("missing scheme")),
    }
    if uri.authority().is_none() {
        return Err(invalid("missing host"));
    }
    if uri.query().is_some() {
        return Err(invalid("query strings are not supported"));
    }
    Ok(())
}
