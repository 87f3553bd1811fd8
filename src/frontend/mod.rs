//! Inbound side of the load balancer.
//!
//! Accepts client connections on the listening port and dispatches each
//! request to the next backend in the pool.

mod listener;

pub use listener::{dispatch, Dispatcher};
