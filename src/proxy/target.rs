//! Upstream target addresses.
//!
//! A backend is configured with a base URL such as `http://10.0.0.1:8080/api`
//! or `https://origin.example`.
//! Inbound paths are appended to the base path and inbound queries are
//! merged with the base query.

use hyper::http::uri::{Authority, InvalidUri, Uri};
use thiserror::Error;

/// Errors produced when a backend address cannot be used.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid URI: {0}")]
    InvalidUri(#[from] InvalidUri),

    #[error("missing scheme, expected http://host[:port] or https://host[:port]")]
    MissingScheme,

    #[error("unsupported scheme '{0}', only http and https are supported")]
    UnsupportedScheme(String),

    #[error("missing host")]
    MissingHost,

    #[error("user info is not allowed in backend addresses")]
    UserInfo,
}

/// Transport used to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamScheme {
    Http,
    Https,
}

impl UpstreamScheme {
    fn default_port(self) -> u16 {
        match self {
            UpstreamScheme::Http => 80,
            UpstreamScheme::Https => 443,
        }
    }
}

/// A parsed backend base URL.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    scheme: UpstreamScheme,
    authority: Authority,
    port: u16,
    base_path: String,
    base_query: Option<String>,
}

impl UpstreamTarget {
    /// Parse a backend base URL.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let uri: Uri = address.trim().parse()?;

        let scheme = match uri.scheme_str().ok_or(AddressError::MissingScheme)? {
            s if s.eq_ignore_ascii_case("http") => UpstreamScheme::Http,
            s if s.eq_ignore_ascii_case("https") => UpstreamScheme::Https,
            other => return Err(AddressError::UnsupportedScheme(other.to_string())),
        };

        let authority = uri.authority().cloned().ok_or(AddressError::MissingHost)?;
        if authority.host().is_empty() {
            return Err(AddressError::MissingHost);
        }
        if authority.as_str().contains('@') {
            return Err(AddressError::UserInfo);
        }

        Ok(Self {
            scheme,
            port: authority.port_u16().unwrap_or(scheme.default_port()),
            authority,
            base_path: uri.path().to_string(),
            base_query: uri.query().map(str::to_string),
        })
    }

    pub fn scheme(&self) -> UpstreamScheme {
        self.scheme
    }

    /// Host to connect to, without IPv6 brackets. Also the TLS server name.
    pub fn host(&self) -> &str {
        let host = self.authority.host();
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
    }

    /// Port to connect to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the outbound `Host` header.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Build the outbound origin-form `path[?query]` for an inbound URI.
    pub fn path_and_query(&self, inbound: &Uri) -> String {
        let path = join_paths(&self.base_path, inbound.path());
        match merge_queries(self.base_query.as_deref(), inbound.query()) {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        }
    }
}

/// Join two path segments with exactly one slash between them.
fn join_paths(base: &str, path: &str) -> String {
    let base_slash = base.ends_with('/');
    let path_slash = path.starts_with('/');

    match (base_slash, path_slash) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

fn merge_queries(base: Option<&str>, query: Option<&str>) -> Option<String> {
    match (base.filter(|q| !q.is_empty()), query.filter(|q| !q.is_empty())) {
        (Some(b), Some(q)) => Some(format!("{}&{}", b, q)),
        (Some(b), None) => Some(b.to_string()),
        (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    }
}
