// ABOUTME: Error types for the HTTP server core, split by surfacing policy
// ABOUTME: Protocol/Resource/Io/Timeout/Upgrade/Config, mirroring the session driver's error handling design

use std::io;
use thiserror::Error;

/// Top level error for the embeddable HTTP core.
///
/// Each variant corresponds to one of the error kinds a session driver can
/// hit; the surfacing policy (close vs. 400 vs. continue as HTTP) lives with
/// the caller, not with this type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Malformed request bytes or a configured limit was exceeded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Allocation or socket setup failure unrelated to the wire format.
    #[error("resource error: {0}")]
    Resource(String),

    /// A read or write returned a fatal (non-retryable) I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The per-connection timeout elapsed before a request completed.
    #[error("connection timed out")]
    Timeout,

    /// WebSocket handshake validation failed.
    #[error("upgrade error: {0}")]
    Upgrade(#[from] UpgradeError),

    /// Server construction parameters were invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type HttpResult<T> = Result<T, HttpError>;

/// Malformed-request errors raised by the parser.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed request")]
    Malformed,
    #[error("header name or value exceeded the configured token length")]
    TokenTooLong,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("invalid status code")]
    InvalidStatusCode,
}

/// WebSocket handshake failures. These never abort the connection on their
/// own; the caller decides how to respond (typically with a 4xx).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpgradeError {
    #[error("missing or unrecognized Upgrade header")]
    NotAWebSocketRequest,
    #[error("unsupported Sec-WebSocket-Version (expected 13)")]
    UnsupportedVersion,
    #[error("missing Sec-WebSocket-Key")]
    MissingKey,
    #[error("server did not return 101 Switching Protocols")]
    HandshakeRejected,
    #[error("Sec-WebSocket-Accept did not match the expected derived value")]
    AcceptKeyMismatch,
}

/// Invalid `ServerBuilder` configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("request_handler is required")]
    MissingHandler,
    #[error("request_buf_size must be nonzero and not exceed request_buf_max_size")]
    InvalidBufferSize,
    #[error("request_token_max_len must be nonzero")]
    InvalidTokenLen,
    #[error("request_max_header_count must be nonzero")]
    InvalidHeaderCount,
    #[error("invalid listen address: {0}")]
    InvalidAddress(String),
}
