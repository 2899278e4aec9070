//! Inbound request parsing straight off the client socket.
//!
//! Only the request line, `Content-Type` and `Content-Length` matter; other
//! headers are read and dropped. The header section is capped at 64 KiB and
//! the body is read to exactly `Content-Length` bytes.

use super::forwarding::UpstreamRequest;
use crate::config::STREAM_MARKER;
use crate::error::{ProxyError, Result};
use bytes::Bytes;
use hyper::Method;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

const HEADER_CAP: usize = 64 * 1024;
const BODY_CAP: usize = 32 * 1024 * 1024;

/// A parsed inbound request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub content_length: Option<usize>,
    pub body: Option<Bytes>,
}

impl InboundRequest {
    /// Whether the body asks for a streamed completion.
    pub fn is_streaming(&self) -> bool {
        let marker = STREAM_MARKER.as_bytes();
        self.body
            .as_ref()
            .is_some_and(|body| body.windows(marker.len()).any(|w| w == marker))
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }

    pub fn to_upstream(&self, streaming: bool) -> UpstreamRequest<'_> {
        UpstreamRequest {
            method: self.method.clone(),
            path: &self.path,
            content_type: self.content_type.as_deref(),
            body: self.body.clone(),
            streaming,
        }
    }
}

/// Read one request from the client.
///
/// Returns `Ok(None)` when the client sent nothing (EOF or an empty request
/// line). Malformed input is a [`ProxyError::ClientProtocol`].
pub async fn read_request<R>(reader: &mut R) -> Result<Option<InboundRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = HEADER_CAP;

    let request_line = match read_line(reader, &mut budget).await? {
        Some(line) if !line.trim().is_empty() => line,
        _ => return Ok(None),
    };

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(ProxyError::ClientProtocol(format!(
            "request line has {} tokens: '{request_line}'",
            parts.len()
        )));
    }
    let method = Method::from_bytes(parts[0].as_bytes())
        .map_err(|_| ProxyError::ClientProtocol(format!("invalid method '{}'", parts[0])))?;
    let path = parts[1].to_string();

    let mut content_type = None;
    let mut content_length = None;
    while let Some(line) = read_line(reader, &mut budget).await? {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(parse_content_length(value.trim())?);
        }
    }

    let body = match content_length {
        Some(len) if len > BODY_CAP => {
            return Err(ProxyError::ClientProtocol(format!(
                "content-length {len} exceeds {BODY_CAP} bytes"
            )))
        }
        Some(len) if len > 0 => Some(read_body(reader, len).await?),
        _ => None,
    };

    Ok(Some(InboundRequest {
        method,
        path,
        content_type,
        content_length,
        body,
    }))
}

/// Read one CRLF- or LF-terminated line, without the terminator.
/// `None` at EOF.
async fn read_line<R>(reader: &mut R, budget: &mut usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(ProxyError::from_client_io)?;
    if read == 0 {
        return if *budget == 0 {
            Err(header_overflow())
        } else {
            Ok(None)
        };
    }
    *budget -= read;
    if !buf.ends_with(b"\n") && *budget == 0 {
        return Err(header_overflow());
    }

    let line = trim_line_end(&buf);
    Ok(Some(String::from_utf8_lossy(line).into_owned()))
}

async fn read_body<R>(reader: &mut R, len: usize) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = vec![0u8; len];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(Bytes::from(body)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProxyError::ClientProtocol(
            format!("body shorter than content-length {len}"),
        )),
        Err(e) => Err(ProxyError::from_client_io(e)),
    }
}

/// Digits only; `+2`, `-0` and empty values are rejected.
fn parse_content_length(value: &str) -> Result<usize> {
    let invalid = || ProxyError::ClientProtocol(format!("invalid content-length '{value}'"));
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse::<usize>().map_err(|_| invalid())
}

fn header_overflow() -> ProxyError {
    ProxyError::ClientProtocol(format!("request headers exceed {HEADER_CAP} bytes"))
}

/// Strip a trailing `\n` and then a trailing `\r`.
pub(crate) fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
