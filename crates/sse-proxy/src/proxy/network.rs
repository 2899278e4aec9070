//! Network utilities for the proxy server.
//!
//! The proxy only ever listens on the IPv4 loopback interface, on a port the
//! OS picks.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;

const LISTEN_BACKLOG: i32 = 128;

/// Create a non-blocking listener on `127.0.0.1:0` with `SO_REUSEADDR`.
///
/// Must be called from inside a Tokio runtime.
///
/// # Returns
/// A listener on a kernel-assigned loopback port; read the port back with
/// `local_addr`.
///
/// # Errors
/// Any socket, bind or listen failure, or registration with the runtime.
pub fn create_loopback_listener() -> std::io::Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    // Convert to tokio TcpListener
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
