// ABOUTME: Validated server configuration, built through `ServerBuilder`
// ABOUTME: the same way the original `iwn_http_server_spec` gets clamped to sane
// ABOUTME: defaults before a listener is ever opened

use std::sync::Arc;

use crate::error::ConfigError;
use crate::http::RequestHandler;

/// Resolved, validated configuration for one `Server`. Never constructed
/// directly — go through `ServerBuilder::build`.
pub struct Config {
    pub(crate) listen: String,
    pub(crate) port: u16,
    pub(crate) socket_queue_size: u32,
    pub(crate) request_buf_size: usize,
    pub(crate) request_buf_max_size: usize,
    pub(crate) request_timeout_sec: u64,
    pub(crate) request_timeout_keepalive_sec: u64,
    pub(crate) request_token_max_len: usize,
    pub(crate) request_max_header_count: u32,
    pub(crate) response_buf_size: usize,
    pub(crate) reuse_port: bool,
    pub(crate) handler: Arc<dyn RequestHandler>,
}

/// Builds a `Config`, applying the same floor values the original server
/// clamps unset fields to. Unlike the original, out-of-range values that
/// were set explicitly are rejected rather than silently raised.
pub struct ServerBuilder {
    listen: String,
    port: Option<u16>,
    socket_queue_size: u32,
    request_buf_size: usize,
    request_buf_max_size: usize,
    request_timeout_sec: u64,
    request_timeout_keepalive_sec: u64,
    request_token_max_len: usize,
    request_max_header_count: u32,
    response_buf_size: usize,
    reuse_port: bool,
    handler: Option<Arc<dyn RequestHandler>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        ServerBuilder {
            listen: "localhost".to_string(),
            port: None,
            socket_queue_size: 64,
            request_buf_size: 1024,
            request_buf_max_size: 8 * 1024 * 1024,
            request_timeout_sec: 20,
            request_timeout_keepalive_sec: 120,
            request_token_max_len: 8192,
            request_max_header_count: 127,
            response_buf_size: 1024,
            reuse_port: false,
            handler: None,
        }
    }

    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn socket_queue_size(mut self, n: u32) -> Self {
        self.socket_queue_size = n;
        self
    }

    pub fn request_buf_size(mut self, n: usize) -> Self {
        self.request_buf_size = n;
        self
    }

    pub fn request_buf_max_size(mut self, n: usize) -> Self {
        self.request_buf_max_size = n;
        self
    }

    pub fn request_timeout_sec(mut self, n: u64) -> Self {
        self.request_timeout_sec = n;
        self
    }

    pub fn request_timeout_keepalive_sec(mut self, n: u64) -> Self {
        self.request_timeout_keepalive_sec = n;
        self
    }

    pub fn request_token_max_len(mut self, n: usize) -> Self {
        self.request_token_max_len = n;
        self
    }

    pub fn request_max_header_count(mut self, n: u32) -> Self {
        self.request_max_header_count = n;
        self
    }

    pub fn response_buf_size(mut self, n: usize) -> Self {
        self.response_buf_size = n;
        self
    }

    /// Set `SO_REUSEPORT` (in addition to the always-on `SO_REUSEADDR`) so
    /// multiple processes can share one listen address.
    pub fn reuse_port(mut self, yes: bool) -> Self {
        self.reuse_port = yes;
        self
    }

    pub fn request_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let handler = self.handler.ok_or(ConfigError::MissingHandler)?;
        if self.request_buf_size == 0 || self.request_buf_size > self.request_buf_max_size {
            return Err(ConfigError::InvalidBufferSize);
        }
        if self.request_token_max_len == 0 {
            return Err(ConfigError::InvalidTokenLen);
        }
        if self.request_max_header_count == 0 {
            return Err(ConfigError::InvalidHeaderCount);
        }
        let port = self.port.unwrap_or(8080);
        Ok(Config {
            listen: self.listen,
            port,
            socket_queue_size: self.socket_queue_size.max(1),
            request_buf_size: self.request_buf_size.max(1024),
            request_buf_max_size: self.request_buf_max_size.max(1024 * 1024),
            request_timeout_sec: self.request_timeout_sec,
            request_timeout_keepalive_sec: self.request_timeout_keepalive_sec,
            request_token_max_len: self.request_token_max_len.max(8192),
            request_max_header_count: self.request_max_header_count,
            response_buf_size: self.response_buf_size.max(1),
            reuse_port: self.reuse_port,
            handler,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Session;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl RequestHandler for NoopHandler {
        async fn on_body(&self, _session: &mut Session) {}
    }

    #[test]
    fn missing_handler_rejected() {
        let err = ServerBuilder::new().build().unwrap_err();
        assert_eq!(err, ConfigError::MissingHandler);
    }

    #[test]
    fn defaults_applied_when_unset() {
        let cfg = ServerBuilder::new()
            .request_handler(Arc::new(NoopHandler))
            .build()
            .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.socket_queue_size, 64);
        assert_eq!(cfg.request_timeout_sec, 20);
        assert_eq!(cfg.request_timeout_keepalive_sec, 120);
    }

    #[test]
    fn zero_buf_size_rejected() {
        let err = ServerBuilder::new()
            .request_handler(Arc::new(NoopHandler))
            .request_buf_size(0)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidBufferSize);
    }
}
