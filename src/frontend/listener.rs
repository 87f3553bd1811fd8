//! Inbound listener and request dispatch.
//!
//! Accepts client connections and, for every request on them, picks the next
//! backend from the pool and hands the request to it.

use crate::backend::{Backend, BackendPool, HttpBackend};
use crate::proxy::{error_response, ProxyBody};
use crate::util::RequestId;
use bytes::Bytes;
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Listens on a single port and dispatches every request round-robin.
pub struct Dispatcher<B = HttpBackend> {
    /// Shared backend pool.
    pool: Arc<BackendPool<B>>,
    /// TCP listener.
    listener: TcpListener,
}

impl<B: Backend> Dispatcher<B> {
    /// Bind the listening socket.
    ///
    /// Failing to bind is fatal for the caller; it is never retried here.
    pub async fn bind(addr: SocketAddr, pool: Arc<BackendPool<B>>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        info!(
            listen = %listener.local_addr()?,
            backends = pool.len(),
            "dispatcher bound"
        );

        Ok(Self { pool, listener })
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until shutdown.
    #[instrument(skip_all)]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("dispatcher starting");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// Serve one client connection on its own task.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let pool = Arc::clone(&self.pool);

        tokio::spawn(async move {
            let io = TokioIo::new(stream);

            let service = service_fn(move |req| {
                let pool = Arc::clone(&pool);
                async move { Ok::<_, Infallible>(dispatch(&pool, req, client_addr).await) }
            });

            if let Err(e) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                debug!(client = %client_addr, error = %e, "client connection closed with error");
            }
        });
    }
}

/// Dispatch a single request: select the next backend and forward to it.
///
/// Returns `503 Service Unavailable` when no backend in the pool is alive.
pub async fn dispatch<B, T>(
    pool: &BackendPool<B>,
    req: Request<T>,
    client_addr: SocketAddr,
) -> Response<ProxyBody>
where
    B: Backend,
    T: Body<Data = Bytes> + Send + 'static,
    T::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request_id = RequestId::from_headers(req.headers());

    let backend = match pool.next() {
        Ok(backend) => backend,
        Err(e) => {
            warn!(request_id = %request_id, client = %client_addr, error = %e, "dispatch failed");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "No backend available");
        }
    };

    info!(
        request_id = %request_id,
        client = %client_addr,
        backend = backend.address(),
        method = %req.method(),
        uri = %req.uri(),
        "forwarding request"
    );

    backend.forward(req, client_addr).await
}
