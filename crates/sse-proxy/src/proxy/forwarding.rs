//! Request forwarding to the configured upstream.
//!
//! [`UpstreamClient`] performs exactly one outbound request per inbound
//! request on the shared pooled client, with the bearer credential injected and
//! a bounded timeout. Streaming requests get the live body back; everything
//! else is buffered.

use super::client::{create_http_client, HttpClient};
use crate::config::{ProxyConfig, UPSTREAM_TIMEOUT};
use crate::error::{ProxyError, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode, Uri};
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::time::{timeout_at, Instant};
use tokio_util::io::StreamReader;
use tracing::debug;

/// Content type assumed when the upstream does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// One outbound call, built from a parsed inbound request.
#[derive(Debug)]
pub struct UpstreamRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub content_type: Option<&'a str>,
    pub body: Option<Bytes>,
    pub streaming: bool,
}

/// Upstream response body, either fully read or still streaming.
pub enum UpstreamBody {
    Buffered(Bytes),
    Streaming(Incoming),
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: UpstreamBody,
}

/// Client for the single upstream of a proxy instance.
pub struct UpstreamClient {
    config: Arc<ProxyConfig>,
    authorization: Option<HeaderValue>,
    http_client: HttpClient,
}

impl UpstreamClient {
    pub fn new(config: Arc<ProxyConfig>) -> Result<Self> {
        let authorization = match config.credential() {
            Some(credential) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
                    .map_err(|_| ProxyError::InvalidCredential)?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(Self {
            config,
            authorization,
            http_client: create_http_client(),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Upstream URI for an inbound path: the base URL with the path appended verbatim.
    pub fn target_uri(&self, path: &str) -> Result<Uri> {
        let full = format!("{}{}", self.config.upstream_base_url(), path);
        full.parse()
            .map_err(|e| ProxyError::ClientProtocol(format!("invalid request target '{path}': {e}")))
    }

    /// Forward one request to the upstream, adding the bearer credential.
    ///
    /// # Arguments
    /// * `request` - Method, path, content type and body of the inbound call
    ///
    /// # Returns
    /// Status, content type and body. With `request.streaming` set the body is
    /// handed back unread; otherwise it is collected under the same deadline
    /// as the response head.
    ///
    /// # Errors
    /// * [`ProxyError::ClientProtocol`] - the path does not form a valid URI
    /// * [`ProxyError::UpstreamUnavailable`] - connect or read failure, or no
    ///   response within the upstream timeout
    pub async fn send(&self, request: UpstreamRequest<'_>) -> Result<UpstreamResponse> {
        let uri = self.target_uri(request.path)?;
        let mut builder = Request::builder().method(request.method).uri(uri);

        if let (Some(value), Some(credential)) = (&self.authorization, self.config.credential()) {
            builder = builder.header(AUTHORIZATION, value.clone());
            debug!("Added Authorization header ({})", credential.preview());
        }
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }

        let upstream_req = builder
            .body(Full::new(request.body.unwrap_or_default()))
            .map_err(|e| ProxyError::ClientProtocol(format!("invalid upstream request: {e}")))?;

        let deadline = Instant::now() + UPSTREAM_TIMEOUT;
        let response = match timeout_at(deadline, self.http_client.request(upstream_req)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ProxyError::UpstreamUnavailable(error_chain(&e))),
            Err(_) => {
                return Err(ProxyError::UpstreamUnavailable(format!(
                    "no response within {}s",
                    UPSTREAM_TIMEOUT.as_secs()
                )))
            }
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        debug!("Upstream response status: {}", status);

        let body = if request.streaming {
            UpstreamBody::Streaming(response.into_body())
        } else {
            match timeout_at(deadline, response.into_body().collect()).await {
                Ok(Ok(collected)) => UpstreamBody::Buffered(collected.to_bytes()),
                Ok(Err(e)) => {
                    return Err(ProxyError::UpstreamUnavailable(format!(
                        "failed to read upstream response: {}",
                        error_chain(&e)
                    )))
                }
                Err(_) => {
                    return Err(ProxyError::UpstreamUnavailable(format!(
                        "upstream response not complete within {}s",
                        UPSTREAM_TIMEOUT.as_secs()
                    )))
                }
            }
        };

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Adapt a streaming upstream body into a buffered byte reader.
pub fn body_reader(body: Incoming) -> impl AsyncBufRead + Unpin + Send {
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}

/// Whether a read error means the upstream ended its body without proper
/// termination (closed mid-chunk, missing terminal chunk, reset).
///
/// Decided from the error chain, not from message text.
pub fn is_truncated_stream(err: &io::Error) -> bool {
    if is_truncation_kind(err.kind()) {
        return true;
    }

    let mut current: Option<&(dyn StdError + 'static)> =
        err.get_ref().map(|inner| inner as &(dyn StdError + 'static));
    while let Some(e) = current {
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() || hyper_err.is_closed() {
                return true;
            }
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if is_truncation_kind(io_err.kind()) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn is_truncation_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

/// Render an error with its sources, `outer: inner: root`.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// JSON error body, `{"error":"<message>"}`.
pub fn error_body(message: &str) -> Bytes {
    Bytes::from(serde_json::json!({ "error": message }).to_string())
}
