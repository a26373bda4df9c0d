// ABOUTME: Embeddable HTTP/1.1 server core: byte-oriented request parser,
// ABOUTME: per-connection session driver, and WebSocket upgrade support

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod server;
pub mod transport;
pub mod ws;

pub use config::{Config, ServerBuilder};
pub use error::{ConfigError, HttpError, HttpResult, ProtocolError, UpgradeError};
pub use http::{RequestHandler, ResponseBuilder, Session, SessionState};
pub use server::Server;
pub use transport::Transport;
