// ABOUTME: The socket abstraction a connection is driven over — plain TCP
// ABOUTME: today, with the seam a TLS implementation would plug into

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// What a connection needs from its transport: async byte streams plus the
/// peer address for logging. A TLS transport (e.g. wrapping
/// `tokio_rustls::server::TlsStream<TcpStream>`) implements the same trait
/// and plugs in at `Server::accept_loop` without the session driver or
/// parser caring which one it got.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    fn peer_addr(&self) -> SocketAddr;
}

impl Transport for TcpStream {
    fn peer_addr(&self) -> SocketAddr {
        TcpStream::peer_addr(self).unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap())
    }
}
