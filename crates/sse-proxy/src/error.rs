//! Error types for the proxy.

use std::io;

/// Errors raised by the proxy library.
///
/// Only configuration, bind and runtime errors reach callers of the public API.
/// The rest stay inside one connection handler, which answers the client and logs.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid upstream base URL '{url}': {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("Credential contains characters not allowed in an HTTP header")]
    InvalidCredential,

    #[error("Failed to bind loopback listener: {0}")]
    Bind(#[source] io::Error),

    #[error("No Tokio runtime available to run the proxy")]
    RuntimeUnavailable,

    #[error("Malformed client request: {0}")]
    ClientProtocol(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Client disconnected: {0}")]
    ClientDisconnected(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Classify a failed read or write on the client socket.
    pub(crate) fn from_client_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => ProxyError::ClientDisconnected(err),
            _ => ProxyError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
