//! SSE repair primitives: line normalization and chunked re-framing.
//!
//! - `normalize` - pure per-line rewrite (`data:` spacing, tool-call `index`)
//! - `chunked` - HTTP/1.1 chunk framing and the terminal chunk
//! - `lines` - line splitting on `\n`, `\r\n` and lone `\r`

pub mod chunked;
pub mod lines;
pub mod normalize;

pub use chunked::{frame, ChunkedWriter, TERMINAL_CHUNK};
pub use lines::SseLineReader;
pub use normalize::{contains_tool_calls, normalize, normalize_line};
