//! Backend servers and round-robin selection.

mod pool;
mod server;

pub use pool::{BackendPool, PoolError};
pub use server::{Backend, HttpBackend};
