//! Request ID generation for log correlation.

use hyper::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Header carrying a caller-supplied request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest caller-supplied ID that is reused as-is.
const MAX_INBOUND_ID_LEN: usize = 128;

/// Counter for short request IDs.
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a short request ID based on a counter.
///
/// Only unique within a single process.
/// Format: `req-{counter}` where counter is zero-padded to 16 hex digits.
pub fn generate_short_request_id() -> String {
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req-{:016x}", count)
}

/// Request ID wrapper that can be included in tracing spans.
#[derive(Clone, Debug)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new short request ID.
    pub fn short() -> Self {
        Self(generate_short_request_id())
    }

    /// Reuse the inbound `X-Request-Id` when it is printable and reasonably
    /// sized, otherwise generate a fresh one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= MAX_INBOUND_ID_LEN)
            .map(|id| Self(id.to_string()))
            .unwrap_or_else(Self::short)
    }

    /// Get the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use std::collections::HashSet;

    #[test]
    fn test_generate_short_request_id() {
        let id1 = generate_short_request_id();
        let id2 = generate_short_request_id();

        assert_ne!(id1, id2);
        assert!(id1.starts_with("req-"));
        assert_eq!(id1.len(), 20);
    }

    #[test]
    fn test_short_request_id_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = generate_short_request_id();
            assert!(ids.insert(id), "duplicate ID generated");
        }
    }

    #[test]
    fn test_from_headers_reuses_inbound_id() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc-123"));

        assert_eq!(RequestId::from_headers(&headers).as_str(), "abc-123");
    }

    #[test]
    fn test_from_headers_generates_when_missing_or_unusable() {
        let headers = HeaderMap::new();
        assert!(RequestId::from_headers(&headers).as_str().starts_with("req-"));

        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("   "));
        assert!(RequestId::from_headers(&headers).as_str().starts_with("req-"));

        let mut headers = HeaderMap::new();
        let long = "x".repeat(MAX_INBOUND_ID_LEN + 1);
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        assert!(RequestId::from_headers(&headers).as_str().starts_with("req-"));
    }

    #[test]
    fn test_request_id_display() {
        let id = RequestId::short();
        assert_eq!(format!("{}", id), id.as_str());
    }
}
