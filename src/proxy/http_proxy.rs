//! HTTP proxy implementation.
//!
//! Forwards a single request to an upstream target over a fresh HTTP/1.1
//! connection, wrapped in TLS for `https` targets, and relays the response
//! back without buffering the body.

use crate::proxy::tls;
use crate::proxy::{UpstreamScheme, UpstreamTarget};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE, HOST};
use hyper::http::uri::InvalidUri;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{InvalidDnsNameError, ServerName};
use tracing::{debug, error, info, instrument, warn};

/// Response body type relayed to clients.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Headers that apply to a single transport hop and are never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP proxy error.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to connect to backend: {0}")]
    BackendConnectError(#[from] std::io::Error),

    #[error("backend handshake failed: {0}")]
    HandshakeError(#[source] hyper::Error),

    #[error("failed to send request to backend: {0}")]
    SendError(#[source] hyper::Error),

    #[error("invalid outbound URI: {0}")]
    InvalidUri(#[from] InvalidUri),

    #[error("TLS client setup failed: {0}")]
    TlsConfigError(#[from] rustls::Error),

    #[error("backend host is not a valid TLS server name: {0}")]
    InvalidServerName(#[from] InvalidDnsNameError),

    #[error("TLS handshake with backend failed: {0}")]
    TlsHandshakeError(#[source] std::io::Error),
}

impl ProxyError {
    /// Status code reported to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidUri(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    fn client_message(&self) -> &'static str {
        match self {
            ProxyError::BackendConnectError(_) => "Failed to connect to backend",
            ProxyError::HandshakeError(_) => "Backend handshake failed",
            ProxyError::SendError(_) => "Failed to send request to backend",
            ProxyError::InvalidUri(_) => "Invalid request URI",
            ProxyError::TlsConfigError(_) | ProxyError::InvalidServerName(_) => {
                "TLS setup for backend failed"
            }
            ProxyError::TlsHandshakeError(_) => "TLS handshake with backend failed",
        }
    }
}

/// Proxy a single HTTP request to the given upstream target.
///
/// Transport failures never escape: they are logged and converted into a
/// proxy-level error response.
#[instrument(skip_all, fields(
    method = %req.method(),
    uri = %req.uri(),
    client = %client_addr,
    backend = %target.authority()
))]
pub async fn forward_request<B>(
    req: Request<B>,
    target: &UpstreamTarget,
    client_addr: SocketAddr,
) -> Response<ProxyBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let start_time = Instant::now();

    match send_upstream(req, target, client_addr).await {
        Ok(response) => {
            info!(
                status = response.status().as_u16(),
                duration_ms = start_time.elapsed().as_millis(),
                "proxied request completed"
            );
            response
        }
        Err(e) => {
            error!(
                error = %e,
                duration_ms = start_time.elapsed().as_millis(),
                "proxy request failed"
            );
            error_response(e.status(), e.client_message())
        }
    }
}

async fn send_upstream<B>(
    mut req: Request<B>,
    target: &UpstreamTarget,
    client_addr: SocketAddr,
) -> Result<Response<ProxyBody>, ProxyError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    prepare_request(&mut req, target, client_addr)?;

    let stream = TcpStream::connect((target.host(), target.port())).await?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY on backend connection");
    }

    let backend_response = match target.scheme() {
        UpstreamScheme::Http => exchange(stream, req).await?,
        UpstreamScheme::Https => {
            // SNI and certificate verification use the configured host.
            let server_name = ServerName::try_from(target.host().to_string())?;
            let tls_stream = tls::connector()?
                .connect(server_name, stream)
                .await
                .map_err(ProxyError::TlsHandshakeError)?;
            exchange(tls_stream, req).await?
        }
    };

    let (mut parts, body) = backend_response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    Ok(Response::from_parts(parts, body.boxed()))
}

/// Run an HTTP/1.1 exchange over an established backend stream.
async fn exchange<S, B>(stream: S, req: Request<B>) -> Result<Response<Incoming>, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(ProxyError::HandshakeError)?;

    // Drives the backend connection until the response body is fully relayed.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!(error = %e, "backend connection error");
        }
    });

    sender.send_request(req).await.map_err(ProxyError::SendError)
}

/// Rewrite an inbound request so it can be sent to `target`.
fn prepare_request<B>(
    req: &mut Request<B>,
    target: &UpstreamTarget,
    client_addr: SocketAddr,
) -> Result<(), ProxyError> {
    let inbound_host = req.headers().get(HOST).cloned().or_else(|| {
        req.uri()
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
    });

    let path_and_query = target.path_and_query(req.uri());
    *req.uri_mut() = path_and_query.parse()?;

    let headers = req.headers_mut();
    strip_hop_by_hop(headers);

    if let Ok(value) = HeaderValue::from_str(target.authority().as_str()) {
        headers.insert(HOST, value);
    }

    let client_ip = client_addr.ip().to_string();
    let prior: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .collect();
    let forwarded_for = if prior.is_empty() {
        client_ip
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert("x-forwarded-for", value);
    }

    if let Some(host) = inbound_host {
        headers.insert("x-forwarded-host", host);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));

    Ok(())
}

/// Remove hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Create an error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("{}: {}\n", status, message)))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;

    fn client() -> SocketAddr {
        "192.168.1.100:12345".parse().unwrap()
    }

    fn request(uri: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header(HOST, "lb.local:8000")
            .header("x-test", "v1")
            .body(Empty::new())
            .unwrap()
    }

    #[test]
    fn test_prepare_rewrites_host_and_uri() {
        let target = UpstreamTarget::parse("http://backend.example").unwrap();
        let mut req = request("/echo?q=1");

        prepare_request(&mut req, &target, client()).unwrap();

        assert_eq!(req.uri(), "/echo?q=1");
        assert_eq!(req.headers()[HOST], "backend.example");
        assert_eq!(req.headers()["x-forwarded-host"], "lb.local:8000");
        assert_eq!(req.headers()["x-forwarded-proto"], "http");
        assert_eq!(req.headers()["x-test"], "v1");
        assert_eq!(req.method(), "GET");
    }

    #[test]
    fn test_prepare_handles_absolute_form() {
        let target = UpstreamTarget::parse("http://127.0.0.1:9001/base").unwrap();
        let mut req = Request::builder()
            .uri("http://lb.local/x?y=2")
            .body(Empty::<Bytes>::new())
            .unwrap();

        prepare_request(&mut req, &target, client()).unwrap();

        assert_eq!(req.uri(), "/base/x?y=2");
        assert_eq!(req.headers()[HOST], "127.0.0.1:9001");
        assert_eq!(req.headers()["x-forwarded-host"], "lb.local");
    }

    #[test]
    fn test_forwarded_for_appends_client_ip() {
        let target = UpstreamTarget::parse("http://backend.example").unwrap();

        let mut req = request("/");
        prepare_request(&mut req, &target, client()).unwrap();
        assert_eq!(req.headers()["x-forwarded-for"], "192.168.1.100");

        let mut req = request("/");
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        prepare_request(&mut req, &target, client()).unwrap();
        assert_eq!(req.headers()["x-forwarded-for"], "10.0.0.1, 192.168.1.100");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-test", HeaderValue::from_static("v1"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-test"], "v1");
    }

    #[test]
    fn test_error_response() {
        let resp = error_response(StatusCode::BAD_GATEWAY, "test error");
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_error_status_mapping() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(
            ProxyError::BackendConnectError(io).status(),
            StatusCode::BAD_GATEWAY
        );

        let invalid = "not a uri".parse::<hyper::Uri>().unwrap_err();
        assert_eq!(
            ProxyError::InvalidUri(invalid).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_returns_bad_gateway() {
        // Reserve a port, then release it so nothing is listening there.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target = UpstreamTarget::parse(&format!("http://127.0.0.1:{}", port)).unwrap();

        let resp = forward_request(request("/"), &target, client()).await;

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"502 Bad Gateway: Failed to connect to backend\n");
    }

    #[tokio::test]
    async fn test_https_backend_receives_tls_client_hello() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Reads the first record byte, then hangs up without answering.
        let first_byte = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).await.unwrap();
            byte[0]
        });

        let target = UpstreamTarget::parse(&format!("https://127.0.0.1:{}", port)).unwrap();
        let resp = forward_request(request("/"), &target, client()).await;

        // 0x16 is the TLS handshake record type.
        assert_eq!(first_byte.await.unwrap(), 0x16);
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"502 Bad Gateway: TLS handshake with backend failed\n");
    }

    #[test]
    fn test_https_target_keeps_configured_host() {
        let target = UpstreamTarget::parse("https://rootxrishabh.github.io").unwrap();
        let mut req = request("/");

        prepare_request(&mut req, &target, client()).unwrap();

        assert_eq!(req.headers()[HOST], "rootxrishabh.github.io");
        assert_eq!(req.headers()["x-forwarded-proto"], "http");
        assert!(ServerName::try_from(target.host().to_string()).is_ok());
    }
}
