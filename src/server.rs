// ABOUTME: Binds the listening socket (SO_REUSEADDR/SO_REUSEPORT via socket2),
// ABOUTME: accepts connections, and spawns one tokio task per connection

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::connection::{self, ConnectionId};
use crate::error::{ConfigError, HttpError, HttpResult};

/// A bound, listening HTTP server. Reference-counted so a handle can be
/// cloned to multiple tasks (e.g. a shutdown watcher) the way the original
/// server's `refs` counter let multiple pollers share one listener.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: Arc<Config>,
    listener: TcpListener,
    next_id: AtomicU64,
}

impl Server {
    /// Resolve `config.listen:config.port`, bind with `SO_REUSEADDR` (and
    /// `SO_REUSEPORT` if requested), and start listening. Mirrors the
    /// original's `getaddrinfo` + try-each-result loop, but async.
    pub async fn bind(config: Config) -> HttpResult<Self> {
        let config = Arc::new(config);
        let addrs = tokio::net::lookup_host((config.listen.as_str(), config.port))
            .await
            .map_err(HttpError::Io)?
            .collect::<Vec<_>>();

        let mut last_err = None;
        for addr in addrs {
            match bind_one(addr, config.socket_queue_size, config.reuse_port) {
                Ok(listener) => {
                    info!(%addr, "listening");
                    return Ok(Server {
                        inner: Arc::new(ServerInner {
                            config,
                            listener,
                            next_id: AtomicU64::new(1),
                        }),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(HttpError::Config(ConfigError::InvalidAddress(format!(
            "{}:{} ({})",
            config.listen,
            config.port,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.listener.local_addr()
    }

    /// Accept connections until the listener errors, spawning one
    /// `tokio::task` per connection (mirroring the original's one-fd-per-
    /// client model, but cooperatively scheduled rather than epoll-driven).
    pub async fn serve(&self) -> HttpResult<()> {
        loop {
            let (socket, peer) = self.inner.listener.accept().await.map_err(HttpError::Io)?;
            let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
            let config = self.inner.config.clone();
            info!(conn = id.0, %peer, "connection accepted");
            tokio::spawn(async move {
                connection::drive(id, socket, config).await;
                info!(conn = id.0, "connection closed");
            });
        }
    }
}

fn bind_one(addr: SocketAddr, backlog: u32, reuse_port: bool) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    let _ = reuse_port;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
