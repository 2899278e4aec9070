//! HTTP/1.1 chunked transfer encoding for re-emitted SSE lines.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// The zero-length chunk that ends a chunked body.
pub const TERMINAL_CHUNK: &[u8] = b"0\r\n\r\n";

/// Encode `payload` as one chunk: lowercase hex size, CRLF, payload, CRLF.
///
/// An empty payload encodes to nothing, since a zero-size chunk would end the body.
pub fn frame(payload: &[u8]) -> Bytes {
    if payload.is_empty() {
        return Bytes::new();
    }
    let size = format!("{:x}", payload.len());
    let mut buf = BytesMut::with_capacity(size.len() + payload.len() + 4);
    buf.put_slice(size.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(payload);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Writes chunks to a client and flushes each one immediately.
///
/// `finish` consumes the writer, so nothing can be written after the
/// terminal chunk.
pub struct ChunkedWriter<W> {
    inner: W,
    chunks: usize,
}

impl<W: AsyncWrite + Unpin> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, chunks: 0 }
    }

    /// Frame `payload` and write it out. Empty payloads are skipped.
    pub async fn write_chunk(&mut self, payload: &[u8]) -> std::io::Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        self.inner.write_all(&frame(payload)).await?;
        self.inner.flush().await?;
        self.chunks += 1;
        Ok(())
    }

    /// Number of non-empty chunks written so far.
    pub fn chunks_written(&self) -> usize {
        self.chunks
    }

    /// Write the terminal chunk and hand back the underlying writer.
    pub async fn finish(mut self) -> std::io::Result<W> {
        self.inner.write_all(TERMINAL_CHUNK).await?;
        self.inner.flush().await?;
        Ok(self.inner)
    }
}
