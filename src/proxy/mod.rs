//! Request forwarding to upstream HTTP servers.

mod http_proxy;
mod target;
mod tls;

pub use http_proxy::{error_response, forward_request, ProxyBody, ProxyError};
pub use target::{AddressError, UpstreamScheme, UpstreamTarget};
