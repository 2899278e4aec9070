//! HTTP client creation and configuration.
//!
//! One pooled client is shared by every connection handler of a proxy
//! instance. It only speaks HTTP/1.1: some upstreams reset HTTP/2 streams
//! mid-completion.

use crate::config::CONNECT_TIMEOUT;
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);
const MAX_IDLE_PER_HOST: usize = 8;

/// Create the shared HTTP/1.1 client with connection pooling.
pub fn create_http_client() -> HttpClient {
    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(TCP_KEEPALIVE));
    http_connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(false); // Allow both HTTP and HTTPS

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .build(https_connector);

    debug!(
        "Upstream client configured (HTTP/1.1): max_idle={}, idle_timeout={}s, connect_timeout={}s",
        MAX_IDLE_PER_HOST,
        POOL_IDLE_TIMEOUT.as_secs(),
        CONNECT_TIMEOUT.as_secs()
    );

    http_client
}
