//! Upstream backend servers.

use crate::proxy::{forward_request, AddressError, ProxyBody, UpstreamTarget};
use bytes::Bytes;
use hyper::body::Body;
use hyper::{Request, Response};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

/// An upstream origin that requests can be forwarded to.
///
/// The pool and dispatcher only depend on this trait, so health-checked or
/// weighted variants can be introduced without reshaping either of them.
pub trait Backend: Send + Sync + 'static {
    /// Base address of the backend, exactly as configured.
    fn address(&self) -> &str;

    /// Best-known liveness of the backend.
    fn is_alive(&self) -> bool;

    /// Forward a request to the backend and return its response.
    ///
    /// Transport failures are reported to the client as an error response;
    /// they never surface as an `Err` to the caller.
    fn forward<B>(
        &self,
        req: Request<B>,
        client_addr: SocketAddr,
    ) -> impl Future<Output = Response<ProxyBody>> + Send
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>;
}

/// A plain HTTP/1.1 backend.
#[derive(Debug)]
pub struct HttpBackend {
    address: String,
    target: UpstreamTarget,
    /// Starts out alive. Nothing in this crate marks a backend down; an
    /// external health checker can do so through [`HttpBackend::set_alive`].
    alive: AtomicBool,
}

impl HttpBackend {
    /// Create a backend from a base URL such as `http://10.0.0.1:8080`.
    pub fn new(address: impl Into<String>) -> Result<Self, AddressError> {
        let address = address.into();
        let target = UpstreamTarget::parse(&address)?;

        Ok(Self {
            address,
            target,
            alive: AtomicBool::new(true),
        })
    }

    /// Update the liveness flag.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// Parsed upstream target.
    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }
}

impl Backend for HttpBackend {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn forward<B>(
        &self,
        req: Request<B>,
        client_addr: SocketAddr,
    ) -> impl Future<Output = Response<ProxyBody>> + Send
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        forward_request(req, &self.target, client_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::UpstreamScheme;

    #[test]
    fn test_new_backend() {
        let backend = HttpBackend::new("http://127.0.0.1:9001").unwrap();
        assert_eq!(backend.address(), "http://127.0.0.1:9001");
        assert_eq!(backend.target().port(), 9001);
        assert!(backend.is_alive());
    }

    #[test]
    fn test_invalid_address() {
        assert!(HttpBackend::new("127.0.0.1:9001").is_err());
        assert!(HttpBackend::new("ftp://backend.example").is_err());
    }

    #[test]
    fn test_https_backend() {
        let backend = HttpBackend::new("https://www.google.com").unwrap();
        assert_eq!(backend.address(), "https://www.google.com");
        assert_eq!(backend.target().scheme(), UpstreamScheme::Https);
        assert_eq!(backend.target().port(), 443);
        assert!(backend.is_alive());
    }

    #[test]
    fn test_set_alive() {
        let backend = HttpBackend::new("http://backend.example").unwrap();

        backend.set_alive(false);
        assert!(!backend.is_alive());

        backend.set_alive(true);
        assert!(backend.is_alive());
    }
}
