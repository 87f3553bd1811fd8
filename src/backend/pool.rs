//! Round-robin backend pool.

use crate::backend::{Backend, HttpBackend};
use crate::config::ServerConfig;
use crate::proxy::AddressError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors produced by the backend pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("backend pool must contain at least one backend")]
    Empty,

    #[error("invalid backend address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddressError,
    },

    #[error("no backend available: all {total} backends are down")]
    NoBackendAvailable { total: usize },
}

/// A fixed, ordered set of backends selected in round-robin order.
///
/// The rotation cursor only ever increases; the effective index is
/// `cursor % len`.
pub struct BackendPool<B = HttpBackend> {
    backends: Vec<Arc<B>>,
    cursor: AtomicUsize,
}

impl<B: Backend> BackendPool<B> {
    /// Create a pool from a non-empty list of backends.
    pub fn new(backends: Vec<B>) -> Result<Self, PoolError> {
        if backends.is_empty() {
            return Err(PoolError::Empty);
        }

        Ok(Self {
            backends: backends.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Select the next live backend.
    ///
    /// One cursor step is consumed for the selection and one more for every
    /// dead backend skipped on the way. At most `len` candidates are
    /// examined before giving up.
    pub fn next(&self) -> Result<Arc<B>, PoolError> {
        let total = self.backends.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        for skipped in 0..total {
            let backend = &self.backends[start.wrapping_add(skipped) % total];

            if backend.is_alive() {
                if skipped > 0 {
                    self.cursor.fetch_add(skipped, Ordering::Relaxed);
                }
                return Ok(Arc::clone(backend));
            }

            debug!(backend = backend.address(), "skipping unavailable backend");
        }

        warn!(total, "no live backend in pool");
        Err(PoolError::NoBackendAvailable { total })
    }

    /// All backends in rotation order.
    pub fn backends(&self) -> &[Arc<B>] {
        &self.backends
    }

    /// Number of backends in the pool.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Always false; an empty pool cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl BackendPool<HttpBackend> {
    /// Build a pool of HTTP backends from configuration.
    pub fn from_config(servers: &[ServerConfig]) -> Result<Self, PoolError> {
        let backends = servers
            .iter()
            .map(|s| {
                HttpBackend::new(s.address.as_str()).map_err(|source| PoolError::InvalidAddress {
                    address: s.address.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(backends)
    }
}
