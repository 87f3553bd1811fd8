//! rrlb - A round-robin HTTP reverse-proxy load balancer
//!
//! Every inbound request on the listening port is forwarded to the next live
//! backend of a fixed pool, and the backend's response is streamed back to
//! the client.
//!
//! - [`backend`]: the [`Backend`](backend::Backend) abstraction and the
//!   round-robin [`BackendPool`](backend::BackendPool)
//! - [`frontend`]: the [`Dispatcher`](frontend::Dispatcher) bound to the listening port
//! - [`proxy`]: request rewriting and response relay for HTTP backends
//! - [`config`]: YAML configuration and validation

pub mod backend;
pub mod config;
pub mod frontend;
pub mod proxy;
pub mod util;

pub use config::Config;
