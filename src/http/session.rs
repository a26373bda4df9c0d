// ABOUTME: Per-connection request/response state machine: feeds bytes to the
// ABOUTME: parser FSM, dispatches tokens to the request handler, and tracks
// ABOUTME: keep-alive / chunked-response bookkeeping between requests

use async_trait::async_trait;

use crate::error::ProtocolError;

use super::fsm::ParserFsm;
use super::response::ResponseBuilder;
use super::stream::ReadStream;
use super::token::{Token, TokenKind};

/// Mirrors the original driver's four-state lifecycle: waiting to start a
/// request, mid-parse, mid-write, or paused while the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Read,
    Write,
    Paused,
}

bitflags::bitflags! {
    /// Per-connection flags, one bit per original `HTTP_*` flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u8 {
        const KEEP_ALIVE       = 0x01;
        const STREAMED         = 0x02;
        const END_SESSION      = 0x04;
        const AUTOMATIC        = 0x08;
        const CHUNKED_RESPONSE = 0x10;
    }
}

/// A single parsed header as offsets into the session's `ReadStream`. Valid
/// for the lifetime of the request: header tokens always live before the
/// shift-compaction anchor latched at the start of the body, so `shift()`
/// during body streaming never invalidates them.
#[derive(Debug, Clone, Copy)]
struct HeaderSlot {
    key: Token,
    val: Token,
}

/// Everything the request handler needs to read the request and write the
/// response. One `Session` is reused across every request on a keep-alive
/// connection; `reset_for_next_request` clears it between them.
pub struct Session {
    pub(crate) stream: ReadStream,
    pub(crate) fsm: ParserFsm,
    pub(crate) response: ResponseBuilder,
    pub(crate) state: SessionState,
    pub(crate) flags: SessionFlags,
    method: Token,
    target: Token,
    version: Token,
    headers: Vec<HeaderSlot>,
    pending_header_key: Token,
    body: Token,
    chunk: Token,
    pending_write: bytes::BytesMut,
}

impl Session {
    pub fn new(buf_initial: usize, buf_max: usize, max_headers: u32, max_token_len: usize) -> Self {
        Session {
            stream: ReadStream::new(buf_initial, buf_max),
            fsm: ParserFsm::new(max_headers, max_token_len),
            response: ResponseBuilder::new(),
            state: SessionState::Init,
            flags: SessionFlags::AUTOMATIC,
            method: Token::NONE,
            target: Token::NONE,
            version: Token::NONE,
            headers: Vec::new(),
            pending_header_key: Token::NONE,
            body: Token::NONE,
            chunk: Token::NONE,
            pending_write: bytes::BytesMut::new(),
        }
    }

    fn tok_str(&self, tok: Token) -> &str {
        if tok.is_none() {
            return "";
        }
        std::str::from_utf8(self.stream.slice(tok.offset, tok.len)).unwrap_or("")
    }

    pub fn request_method(&self) -> &str {
        self.tok_str(self.method)
    }

    pub fn request_target(&self) -> &str {
        self.tok_str(self.target)
    }

    pub fn request_version(&self) -> &str {
        self.tok_str(self.version)
    }

    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| self.tok_str(h.key).eq_ignore_ascii_case(name))
            .map(|h| self.tok_str(h.val))
    }

    pub fn headers_iterate(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(move |h| (self.tok_str(h.key), self.tok_str(h.val)))
    }

    /// The fully-buffered body for a non-streamed request (empty while
    /// `is_streamed()` is true — read chunks via `request_chunk` instead).
    pub fn request_body(&self) -> &[u8] {
        if self.body.is_none() {
            &[]
        } else {
            self.stream.slice(self.body.offset, self.body.len)
        }
    }

    /// The body bytes delivered with the most recent `ChunkBody` token.
    /// Only meaningful from within the handler callback invoked for that
    /// token; do not retain across calls.
    pub fn request_chunk(&self) -> &[u8] {
        if self.chunk.is_none() {
            &[]
        } else {
            self.stream.slice(self.chunk.offset, self.chunk.len)
        }
    }

    pub fn is_streamed(&self) -> bool {
        self.flags.contains(SessionFlags::STREAMED)
    }

    /// Disable the automatic keep-alive heuristic and force the decision.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.flags.remove(SessionFlags::AUTOMATIC);
        self.flags.set(SessionFlags::KEEP_ALIVE, keep_alive);
    }

    /// Restore the automatic keep-alive heuristic (the default).
    pub fn set_automatic(&mut self) {
        self.flags.insert(SessionFlags::AUTOMATIC);
        self.flags.remove(SessionFlags::KEEP_ALIVE);
    }

    fn autodetect_keep_alive(&mut self) {
        let http_1_1 = self.request_version().ends_with('1');
        let conn = self.request_header("connection").unwrap_or("");
        let close = conn.eq_ignore_ascii_case("close") || (conn.is_empty() && !http_1_1);
        self.flags.set(SessionFlags::KEEP_ALIVE, !close);
    }

    pub fn set_status(&mut self, code: u16) -> Result<(), ProtocolError> {
        self.response.set_status(code)
    }

    pub fn set_response_header(&mut self, name: &str, value: &str) {
        self.response.set_header(name, value);
    }

    pub fn set_response_body(&mut self, body: &[u8]) {
        self.response.set_body(body);
    }

    pub fn clear_response_body(&mut self) {
        self.response.clear_body();
    }

    /// Finish a non-chunked response: status line, headers, and body as one
    /// content-length-framed message, staged for the connection driver to
    /// write once the handler returns.
    pub fn response_end(&mut self) {
        if self.flags.contains(SessionFlags::AUTOMATIC) {
            self.autodetect_keep_alive();
        }
        let body = self.response.body().to_vec();
        let headers = self.response.serialize_headers(self.flags.contains(SessionFlags::KEEP_ALIVE));
        self.pending_write.extend_from_slice(&headers);
        self.pending_write.extend_from_slice(&body);
        self.state = SessionState::Write;
    }

    /// Stage one chunk of a chunked response, emitting the chunked framing
    /// headers first if this is the first chunk.
    pub fn response_chunk_write(&mut self) {
        if !self.flags.contains(SessionFlags::CHUNKED_RESPONSE) {
            self.flags.insert(SessionFlags::CHUNKED_RESPONSE);
            self.response.mark_chunked();
            if self.flags.contains(SessionFlags::AUTOMATIC) {
                self.autodetect_keep_alive();
            }
            let headers = self.response.serialize_headers(self.flags.contains(SessionFlags::KEEP_ALIVE));
            self.pending_write.extend_from_slice(&headers);
        }
        let chunk = self.response.serialize_chunk();
        self.pending_write.extend_from_slice(&chunk);
        self.state = SessionState::Write;
    }

    pub fn response_chunk_end(&mut self) {
        let term = self.response.serialize_chunk_terminator();
        self.pending_write.extend_from_slice(&term);
        self.state = SessionState::Write;
    }

    /// Drain bytes staged by `response_end`/`response_chunk_write`/
    /// `response_chunk_end` for the connection driver to write to the socket.
    pub(crate) fn take_pending_write(&mut self) -> bytes::BytesMut {
        std::mem::take(&mut self.pending_write)
    }

    pub fn should_keep_alive(&self) -> bool {
        self.flags.contains(SessionFlags::KEEP_ALIVE) && !self.flags.contains(SessionFlags::END_SESSION)
    }

    pub fn mark_end_session(&mut self) {
        self.flags.insert(SessionFlags::END_SESSION);
    }

    pub fn should_end_session(&self) -> bool {
        self.flags.contains(SessionFlags::END_SESSION)
    }

    /// Reset request-scoped state for the next request on a keep-alive
    /// connection. The stream buffer allocation is kept, only its cursors
    /// and the FSM state are cleared.
    pub fn reset_for_next_request(&mut self) {
        self.stream.reset();
        self.fsm.reset();
        self.response.reset();
        self.state = SessionState::Init;
        self.flags = SessionFlags::AUTOMATIC;
        self.method = Token::NONE;
        self.target = Token::NONE;
        self.version = Token::NONE;
        self.headers.clear();
        self.pending_header_key = Token::NONE;
        self.body = Token::NONE;
        self.chunk = Token::NONE;
        self.pending_write.clear();
    }

    /// Record a just-emitted parser token into request-scoped state. Called
    /// by the connection driver as it feeds bytes through `ParserFsm`.
    pub(crate) fn record_token(&mut self, tok: Token) {
        match tok.kind {
            TokenKind::Method => self.method = tok,
            TokenKind::Target => self.target = tok,
            TokenKind::Version => self.version = tok,
            TokenKind::HeaderKey => self.pending_header_key = tok,
            TokenKind::HeaderVal => {
                self.headers.push(HeaderSlot {
                    key: self.pending_header_key,
                    val: tok,
                });
                self.pending_header_key = Token::NONE;
            }
            TokenKind::Body => self.body = tok,
            TokenKind::BodyStream => self.flags.insert(SessionFlags::STREAMED),
            TokenKind::ChunkBody => self.chunk = tok,
            _ => {}
        }
    }
}

/// Implemented by applications embedding this crate. `on_body` runs once a
/// request's body (or its streamed-body marker) is fully available;
/// `on_chunk` runs once per delivered piece of a streamed or chunked body.
/// Both receive `&mut Session` to read the request and begin writing a
/// response; the driver writes whatever bytes accumulate in `session`'s
/// response buffer once the callback returns.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn on_body(&self, session: &mut Session);

    async fn on_chunk(&self, session: &mut Session) {
        let _ = session;
    }
}
