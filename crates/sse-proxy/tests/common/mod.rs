//! Shared helpers for the integration tests: a raw TCP mock upstream, a raw
//! client and a chunked-body decoder.

#![allow(dead_code)]

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";

/// Upstream that answers every connection with the same raw response and
/// reports each raw request it received.
pub struct MockUpstream {
    pub url: String,
    requests: mpsc::UnboundedReceiver<Vec<u8>>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(response: impl Into<Vec<u8>>) -> Self {
        let response = response.into();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, requests) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let response = response.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Some(request) = read_http_request(&mut stream).await else {
                        return;
                    };
                    let _ = tx.send(request);
                    let _ = stream.write_all(&response).await;
                    let _ = stream.flush().await;
                });
            }
        });

        Self {
            url,
            requests,
            task,
        }
    }

    /// Next request the upstream saw, as text.
    pub async fn next_request(&mut self) -> String {
        let raw = tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("upstream saw no request")
            .expect("upstream closed");
        String::from_utf8(raw).unwrap()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Read one request: headers up to the blank line, then `content-length` bytes.
pub async fn read_http_request(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .map_or(0, |v| v.trim().parse::<usize>().unwrap_or(0));
    while data.len() < head_end + content_length {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
    }
    Some(data)
}

/// Send raw bytes to the proxy, close the write half and read until the
/// proxy closes.
pub async fn send_raw(port: u16, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut out))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    out
}

pub fn post(path: &str, body: &str) -> Vec<u8> {
    format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Split a raw response into head text and body bytes.
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let pos = find(raw, b"\r\n\r\n").expect("response has no header terminator");
    (
        String::from_utf8_lossy(&raw[..pos + 4]).into_owned(),
        raw[pos + 4..].to_vec(),
    )
}

/// Decode a chunked body into its payloads; the flag is whether the
/// terminal chunk was present.
pub fn decode_chunks(mut body: &[u8]) -> (Vec<String>, bool) {
    let mut chunks = Vec::new();
    while let Some(pos) = find(body, b"\r\n") {
        let size = usize::from_str_radix(std::str::from_utf8(&body[..pos]).unwrap(), 16).unwrap();
        if size == 0 {
            return (chunks, true);
        }
        let start = pos + 2;
        chunks.push(String::from_utf8(body[start..start + size].to_vec()).unwrap());
        body = &body[start + size + 2..];
    }
    (chunks, false)
}

/// Encode one chunk the way an upstream would.
pub fn chunk(payload: &str) -> String {
    format!("{:x}\r\n{}\r\n", payload.len(), payload)
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
