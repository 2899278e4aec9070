//! Loopback reverse proxy that repairs SSE streams from an OpenAI-compatible
//! upstream for strict downstream consumers.
//!
//! ```no_run
//! # async fn run() -> sse_proxy::Result<()> {
//! let server = sse_proxy::ProxyServer::for_upstream("https://api.example.com", Some("sk-..."))?;
//! server.start()?;
//! if let Some(endpoint) = server.client_endpoint() {
//!     println!("OPENAI_HOST={}", endpoint.base_url);
//! }
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod proxy;
pub mod sse;

pub use config::{Credential, ProxyConfig, PLACEHOLDER_API_KEY};
pub use error::{ProxyError, Result};
pub use proxy::{ClientEndpoint, ProxyServer, StreamOutcome};
pub use sse::{normalize, normalize_line};
