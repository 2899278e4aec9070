//! Per-connection request handling.
//!
//! One handler owns one accepted connection: it parses the request, forwards
//! it upstream and writes either a re-framed, normalized SSE stream or the
//! buffered upstream response. The connection is closed after one exchange.

use super::forwarding::{
    body_reader, error_body, is_truncated_stream, UpstreamBody, UpstreamClient,
    UpstreamResponse, DEFAULT_CONTENT_TYPE,
};
use super::request::read_request;
use crate::error::{ProxyError, Result};
use crate::sse::{contains_tool_calls, normalize_line, ChunkedWriter, SseLineReader};
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, trace, warn};

const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";
const PREVIEW_LEN: usize = 80;
const LOGGED_LEADING_LINES: usize = 10;

/// How a streamed upstream body ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Upstream body reached a proper end.
    Completed { lines: usize },
    /// Upstream stopped without terminating its body; the client still got a
    /// well-formed (shorter) stream.
    Truncated { lines: usize },
}

/// Serve one client connection to completion and log how it ended.
pub async fn serve_connection<S>(stream: S, upstream: &UpstreamClient)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match handle_connection(stream, upstream).await {
        Ok(()) => {}
        Err(ProxyError::ClientDisconnected(e)) => debug!("Client disconnected: {}", e),
        Err(e) => error!("Error handling proxy connection: {}", e),
    }
}

async fn handle_connection<S>(stream: S, upstream: &UpstreamClient) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = BufReader::new(stream);

    let request = match read_request(&mut conn).await {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(ProxyError::ClientProtocol(reason)) => {
            warn!("Rejecting malformed request: {}", reason);
            return write_error(&mut conn, StatusCode::BAD_REQUEST).await;
        }
        Err(e) => return Err(e),
    };
    info!("Proxy received request: {} {}", request.method, request.path);

    let streaming = request.is_streaming();
    info!(
        "Forwarding to upstream: {} {}{} (body length: {}, streaming: {})",
        request.method,
        upstream.config().upstream_base_url(),
        request.path,
        request.body_len(),
        streaming
    );

    let response = match upstream.send(request.to_upstream(streaming)).await {
        Ok(response) => response,
        Err(ProxyError::UpstreamUnavailable(reason)) => {
            error!("Upstream unavailable: {}", reason);
            return write_error(&mut conn, StatusCode::BAD_GATEWAY).await;
        }
        Err(ProxyError::ClientProtocol(reason)) => {
            warn!("Rejecting request: {}", reason);
            return write_error(&mut conn, StatusCode::BAD_REQUEST).await;
        }
        Err(e) => return Err(e),
    };
    info!("Upstream response status: {}", response.status);

    match response {
        UpstreamResponse {
            status,
            body: UpstreamBody::Streaming(body),
            ..
        } => {
            stream_response(&mut conn, status, body).await?;
        }
        UpstreamResponse {
            status,
            content_type,
            body: UpstreamBody::Buffered(bytes),
        } => {
            let content_type = content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
            write_buffered(&mut conn, status, content_type, &bytes).await?;
        }
    }

    let _ = conn.shutdown().await;
    Ok(())
}

/// Relay an upstream SSE body line by line, normalized and re-chunked.
///
/// A truncated upstream still gets the terminal chunk; any other upstream read
/// error drops the connection without it.
pub async fn stream_response<W>(
    writer: &mut W,
    status: StatusCode,
    body: Incoming,
) -> Result<StreamOutcome>
where
    W: AsyncWrite + Unpin,
{
    write_head(
        writer,
        status,
        &[
            ("Content-Type", EVENT_STREAM_CONTENT_TYPE),
            ("Transfer-Encoding", "chunked"),
            ("Cache-Control", "no-cache"),
            ("X-Accel-Buffering", "no"),
            ("Connection", "close"),
        ],
    )
    .await?;

    let mut upstream_lines = SseLineReader::new(body_reader(body));
    let mut chunked = ChunkedWriter::new(writer);
    let mut line_count = 0usize;
    let mut has_tool_calls = false;
    let mut buf = Vec::new();
    let mut payload = Vec::new();

    let outcome = loop {
        buf.clear();
        match upstream_lines.read_line(&mut buf).await {
            Ok(false) => break StreamOutcome::Completed { lines: line_count },
            Ok(true) => {}
            Err(e) if is_truncated_stream(&e) => {
                warn!(
                    "Upstream closed stream prematurely after {} lines: {}",
                    line_count, e
                );
                break StreamOutcome::Truncated { lines: line_count };
            }
            Err(e) => return Err(ProxyError::Io(e)),
        }
        line_count += 1;

        let raw = String::from_utf8_lossy(&buf);
        let normalized = normalize_line(&raw);
        if contains_tool_calls(&raw) {
            has_tool_calls = true;
            debug!("SSE line {} (tool call): {}", line_count, raw);
        } else if line_count <= LOGGED_LEADING_LINES || raw.contains("finish_reason") {
            debug!(
                "SSE line {}: {} -> {}",
                line_count,
                preview(&raw),
                preview(&normalized)
            );
        } else {
            trace!("SSE line {}: {}", line_count, preview(&normalized));
        }

        payload.clear();
        payload.extend_from_slice(normalized.as_bytes());
        payload.push(b'\n');
        chunked
            .write_chunk(&payload)
            .await
            .map_err(ProxyError::from_client_io)?;
    };

    let chunks = chunked.chunks_written();
    chunked.finish().await.map_err(ProxyError::from_client_io)?;
    info!(
        "Streaming complete, sent {} lines in {} chunks, tool_calls={}",
        line_count, chunks, has_tool_calls
    );
    Ok(outcome)
}

/// Write a complete response with an exact `Content-Length`.
pub async fn write_buffered<W>(
    writer: &mut W,
    status: StatusCode,
    content_type: &str,
    body: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let content_length = body.len().to_string();
    write_head(
        writer,
        status,
        &[
            ("Content-Type", content_type),
            ("Content-Length", &content_length),
            ("Connection", "close"),
        ],
    )
    .await?;
    writer
        .write_all(body)
        .await
        .map_err(ProxyError::from_client_io)?;
    writer.flush().await.map_err(ProxyError::from_client_io)
}

/// JSON error response named after the status, e.g. `{"error":"Bad Gateway"}`.
async fn write_error<W>(writer: &mut W, status: StatusCode) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body: Bytes = error_body(reason_phrase(status));
    write_buffered(writer, status, DEFAULT_CONTENT_TYPE, &body).await
}

async fn write_head<W>(writer: &mut W, status: StatusCode, headers: &[(&str, &str)]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason_phrase(status));
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    writer
        .write_all(head.as_bytes())
        .await
        .map_err(ProxyError::from_client_io)?;
    writer.flush().await.map_err(ProxyError::from_client_io)
}

pub fn reason_phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown")
}

fn preview(line: &str) -> String {
    match line.char_indices().nth(PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}
