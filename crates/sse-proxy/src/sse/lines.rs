//! SSE line splitting.
//!
//! SSE allows `\n`, `\r\n` and a lone `\r` as line terminators. A `\r` ends
//! the line as soon as it is seen; a `\n` that follows it is skipped on the
//! next read, so a line is never held back waiting for the next byte.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub struct SseLineReader<R> {
    inner: R,
    pending_cr: bool,
}

impl<R: AsyncBufRead + Unpin> SseLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending_cr: false,
        }
    }

    /// Append the next line to `buf`, without its terminator.
    ///
    /// Returns `Ok(false)` at end of input. A final line without a terminator
    /// is still returned.
    pub async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        let mut got_line = false;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(got_line);
            }

            let mut start = 0;
            if self.pending_cr {
                self.pending_cr = false;
                if available[0] == b'\n' {
                    start = 1;
                }
            }

            let rest = &available[start..];
            match rest.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(end) => {
                    buf.extend_from_slice(&rest[..end]);
                    self.pending_cr = rest[end] == b'\r';
                    self.inner.consume(start + end + 1);
                    return Ok(true);
                }
                None => {
                    buf.extend_from_slice(rest);
                    got_line |= !rest.is_empty();
                    let used = available.len();
                    self.inner.consume(used);
                }
            }
        }
    }
}
