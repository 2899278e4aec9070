//! Proxy server module.
//!
//! This module provides the loopback reverse proxy that sits between a
//! downstream SSE consumer and one OpenAI-compatible upstream:
//! - Raw HTTP/1.1 request parsing on the client side
//! - Bearer credential injection on the upstream side
//! - Line-by-line SSE normalization with manual chunk framing
//! - Repeatable start/stop inside a longer-lived process
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct, lifecycle and accept loop
//! - `handler` - Per-connection request handling and response writing
//! - `request` - Inbound request parsing
//! - `forwarding` - Request forwarding to the upstream
//! - `client` - HTTP client creation and configuration
//! - `network` - Loopback listener creation

mod client;
mod forwarding;
mod handler;
mod network;
mod request;
mod server;


pub use forwarding::{UpstreamClient, DEFAULT_CONTENT_TYPE};
pub use handler::{serve_connection, StreamOutcome};
pub use server::{ClientEndpoint, ProxyServer};
