// ABOUTME: The two coupled finite-state machines that drive request parsing:
// ABOUTME: a character FSM over request-line/header/body framing, and a meta FSM that
// ABOUTME: classifies which header is active and which body style applies

use super::classifier::{classify_byte, CHAR_CLASS_LEN};
use super::stream::ReadStream;
use super::token::{Token, TokenKind};

/// Character-FSM states. Mirrors the original's `state_e`, one row of the
/// transition table per state. Names describe what has just been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CharState {
    Start = 0,
    Method,
    MethodSp,
    Target,
    TargetSp,
    Version,
    RlCr,
    RlLf,
    HeaderKey,
    HeaderSp,
    HeaderVal,
    HeaderCr,
    /// After a single header line's LF: loops back to `HeaderKey` for the
    /// next header, or to `BlankCr` if the line was empty (CR seen next).
    HeaderLf,
    /// CR of the blank line terminating the header block.
    BlankCr,
    /// LF of the blank line: the true end of headers. Unconditionally
    /// transitions to `Body` for every class; this is where the anchor
    /// latches and where the chunked-body redirect is checked.
    HeadersEnd,
    Body,
    ChunkSize,
    ChunkBody,
    ChunkExt,
    ChunkSizeCr,
    ChunkSizeLf,
    ChunkEnd,
    ChunkEndCr,
    ChunkEndLf,
    Error,
}

const CHAR_STATE_LEN: usize = 25;

/// Meta-FSM states. Mirrors the original's `meta_state_e`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetaState {
    WaitKey = 0,
    AnyHeader,
    MatchTe,
    MatchCl,
    ClValue,
    MatchChunked,
    Small,
    Chunked,
    Big,
    ZeroChunk,
    ChunkSize,
    ChunkBody,
    ChunkLast,
    Streaming,
    StreamEnd,
    Body,
    End,
    Error,
}

const META_STATE_LEN: usize = 18;

/// Events fed to the meta FSM. The original C source reuses these same
/// integer columns under several aliased names depending on context
/// (`HS_META_NON_ZERO`, `HS_META_NEXT`, `HS_META_END_CHK_SIZE`,
/// `HS_META_END_CHUNK` are all `#define`s for one of these six); the
/// doc comment on each call site below names which alias applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum MetaEvent {
    /// Column 0. Aliases: "not content-length", "nonzero chunk size",
    /// "advance to next chunk".
    NotContentLen = 0,
    /// Column 1. Alias: "end of chunk-size line".
    NotTransferEnc,
    /// Column 2. Alias: "end of chunk-end CRLF".
    EndKey,
    EndValue,
    EndHeaders,
    LargeBody,
}

const META_EVENT_LEN: usize = 6;

use CharState::*;

#[rustfmt::skip]
const TRANSITIONS: [[CharState; CHAR_CLASS_LEN]; CHAR_STATE_LEN] = {
    // columns: Spc Nl Cr Coln Tab Scoln Digit Hex Alpha Tchar Vchar Etc
    let mut t = [[Error; CHAR_CLASS_LEN]; CHAR_STATE_LEN];
    t[Start as usize]       = [Error, Error, Error, Error, Error, Error, Error, Method, Method, Method, Error, Error];
    t[Method as usize]      = [MethodSp, Error, Error, Error, Error, Error, Method, Method, Method, Method, Error, Error];
    t[MethodSp as usize]    = [Error, Error, Error, Error, Error, Error, Target, Target, Target, Target, Target, Error];
    t[Target as usize]      = [TargetSp, Error, Error, Target, Error, Target, Target, Target, Target, Target, Target, Error];
    t[TargetSp as usize]    = [Error, Error, Error, Error, Error, Error, Version, Version, Version, Version, Version, Error];
    t[Version as usize]     = [Error, Error, RlCr, Error, Error, Error, Version, Version, Version, Version, Version, Error];
    t[RlCr as usize]        = [Error, RlLf, Error, Error, Error, Error, Error, Error, Error, Error, Error, Error];
    t[RlLf as usize]        = [Error, Error, Error, Error, Error, Error, HeaderKey, HeaderKey, HeaderKey, HeaderKey, Error, Error];
    t[HeaderKey as usize]   = [Error, Error, Error, HeaderSp, Error, Error, HeaderKey, HeaderKey, HeaderKey, HeaderKey, Error, Error];
    t[HeaderSp as usize]    = [HeaderSp, HeaderSp, HeaderSp, HeaderVal, HeaderSp, HeaderVal, HeaderVal, HeaderVal, HeaderVal, HeaderVal, HeaderVal, Error];
    t[HeaderVal as usize]   = [HeaderVal, Error, HeaderCr, HeaderVal, HeaderVal, HeaderVal, HeaderVal, HeaderVal, HeaderVal, HeaderVal, HeaderVal, Error];
    t[HeaderCr as usize]    = [Error, HeaderLf, Error, Error, Error, Error, Error, Error, Error, Error, Error, Error];
    t[HeaderLf as usize]    = [Error, Error, BlankCr, Error, Error, Error, HeaderKey, HeaderKey, HeaderKey, HeaderKey, Error, Error];
    t[BlankCr as usize]     = [Error, HeadersEnd, Error, Error, Error, Error, Error, Error, Error, Error, Error, Error];
    t[HeadersEnd as usize]  = [Body, Body, Body, Body, Body, Body, Body, Body, Body, Body, Body, Body];
    t[Body as usize]        = [Body, Body, Body, Body, Body, Body, Body, Body, Body, Body, Body, Body];
    t[ChunkSize as usize]   = [Error, Error, ChunkSizeCr, Error, Error, ChunkExt, ChunkSize, ChunkSize, Error, Error, Error, Error];
    t[ChunkBody as usize]   = [ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody];
    t[ChunkExt as usize]    = [Error, Error, ChunkSizeCr, ChunkExt, ChunkExt, ChunkExt, ChunkExt, ChunkExt, ChunkExt, ChunkExt, ChunkExt, Error];
    t[ChunkSizeCr as usize] = [Error, ChunkSizeLf, Error, Error, Error, Error, Error, Error, Error, Error, Error, Error];
    t[ChunkSizeLf as usize] = [ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody, ChunkBody];
    t[ChunkEnd as usize]    = [Error, Error, ChunkEndCr, Error, Error, Error, Error, Error, Error, Error, Error, Error];
    t[ChunkEndCr as usize]  = [Error, ChunkEndLf, Error, Error, Error, Error, Error, Error, Error, Error, Error, Error];
    t[ChunkEndLf as usize]  = [Error, Error, Error, Error, Error, Error, ChunkSize, ChunkSize, Error, Error, Error, Error];
    t
};

/// States that begin a new token when *entered*.
const fn token_start(state: CharState) -> TokenKind {
    match state {
        Method => TokenKind::Method,
        Target => TokenKind::Target,
        Version => TokenKind::Version,
        HeaderKey => TokenKind::HeaderKey,
        HeaderVal => TokenKind::HeaderVal,
        Body => TokenKind::Body,
        ChunkBody => TokenKind::ChunkBody,
        _ => TokenKind::None,
    }
}

use MetaState::*;

#[rustfmt::skip]
const META_TRANSITIONS: [[MetaState; META_EVENT_LEN]; META_STATE_LEN] = {
    let mut t = [[MetaState::Error; META_EVENT_LEN]; META_STATE_LEN];
    // columns: NotContentLen NotTransferEnc EndKey EndValue EndHeaders LargeBody
    t[WaitKey as usize]      = [WaitKey, WaitKey, WaitKey, AnyHeader, End, MetaState::Error];
    t[AnyHeader as usize]    = [MatchTe, MatchCl, WaitKey, MetaState::Error, End, MetaState::Error];
    t[MatchTe as usize]      = [MatchTe, WaitKey, MatchChunked, MetaState::Error, MetaState::Error, MetaState::Error];
    t[MatchCl as usize]      = [WaitKey, MatchCl, ClValue, MetaState::Error, MetaState::Error, MetaState::Error];
    t[ClValue as usize]      = [MetaState::Error, MetaState::Error, MetaState::Error, Small, MetaState::Error, MetaState::Error];
    t[MatchChunked as usize] = [WaitKey, MetaState::Error, MetaState::Error, Chunked, MetaState::Error, MetaState::Error];
    t[Small as usize]        = [Small, Small, Small, Small, Body, Big];
    t[Chunked as usize]      = [Chunked, Chunked, Chunked, Chunked, ZeroChunk, MetaState::Error];
    t[Big as usize]          = [Big, Big, Big, Big, Streaming, MetaState::Error];
    t[ZeroChunk as usize]    = [ChunkSize, ChunkLast, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error];
    t[ChunkSize as usize]    = [ChunkSize, ChunkBody, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error];
    t[ChunkBody as usize]    = [ChunkBody, ChunkBody, ZeroChunk, MetaState::Error, MetaState::Error, MetaState::Error];
    t[ChunkLast as usize]    = [ChunkLast, End, End, MetaState::Error, MetaState::Error, MetaState::Error];
    t[Streaming as usize]    = [StreamEnd, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error];
    t[StreamEnd as usize]    = [End, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error];
    t[Body as usize]         = [End, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error];
    t[End as usize]          = [WaitKey, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error, MetaState::Error];
    t
};

/// Parser state carried across calls; owns both coupled FSMs.
#[derive(Debug, Clone)]
pub struct ParserFsm {
    state: CharState,
    meta: MetaState,
    content_length: u64,
    body_consumed: u64,
    match_index: usize,
    header_count: u32,
    max_header_count: u32,
    max_token_len: usize,
}

impl ParserFsm {
    pub fn new(max_header_count: u32, max_token_len: usize) -> Self {
        ParserFsm {
            state: CharState::Start,
            meta: MetaState::WaitKey,
            content_length: 0,
            body_consumed: 0,
            match_index: 0,
            header_count: 0,
            max_header_count,
            max_token_len,
        }
    }

    pub fn reset(&mut self) {
        self.state = CharState::Start;
        self.meta = MetaState::WaitKey;
        self.content_length = 0;
        self.body_consumed = 0;
        self.match_index = 0;
        self.header_count = 0;
    }

    pub fn is_streamed(&self) -> bool {
        matches!(
            self.meta,
            MetaState::Big
                | MetaState::Streaming
                | MetaState::StreamEnd
                | MetaState::Chunked
                | MetaState::ChunkSize
                | MetaState::ChunkBody
                | MetaState::ChunkLast
                | MetaState::ZeroChunk
        )
    }

    #[inline]
    fn meta_trigger(&mut self, event: MetaEvent) {
        self.meta = META_TRANSITIONS[self.meta as usize][event as usize];
    }

    /// Tokens the meta FSM is ready to emit without consuming further input
    /// bytes: the next streamed chunk's availability, or end-of-request.
    fn meta_emit(&mut self) -> Token {
        match self.meta {
            MetaState::StreamEnd => {
                // HS_META_NEXT alias for NotContentLen (column 0).
                self.meta_trigger(MetaEvent::NotContentLen);
                Token {
                    kind: TokenKind::ChunkBody,
                    offset: 0,
                    len: 0,
                }
            }
            MetaState::End => {
                let t = Token {
                    kind: TokenKind::ReqEnd,
                    offset: 0,
                    len: 0,
                };
                self.reset();
                t
            }
            _ => Token::NONE,
        }
    }

    /// Drive the character FSM across every currently-buffered byte,
    /// returning the next token the application should see (or
    /// `TokenKind::None` if more bytes are needed).
    pub fn next_token(&mut self, stream: &mut ReadStream) -> Token {
        let pre = self.meta_emit();
        if !pre.is_none() {
            return pre;
        }

        while let Some(b) = stream.peek() {
            let class = classify_byte(b);
            let mut to = TRANSITIONS[self.state as usize][class as usize];
            if self.meta == MetaState::ZeroChunk && self.state == CharState::HeadersEnd && to == CharState::Body
            {
                to = CharState::ChunkSize;
            }
            let from = self.state;
            self.state = to;
            let emitted = self.transition(stream, b, from, to);
            stream.consume();
            if !emitted.is_none() {
                return emitted;
            }
        }

        if self.state == CharState::ChunkBody {
            stream.shift();
        }

        let mut token = self.meta_emit();
        if token.is_none() {
            let cur = stream.current_token();
            if cur.kind != TokenKind::ChunkBody
                && cur.kind != TokenKind::Body
                && cur.len > self.max_token_len
            {
                token = Token {
                    kind: TokenKind::Error,
                    offset: 0,
                    len: 0,
                };
            }
        }
        token
    }

    fn transition(&mut self, stream: &mut ReadStream, c: u8, from: CharState, to: CharState) -> Token {
        let mut emitted = Token::NONE;

        if from == CharState::HeadersEnd {
            stream.anchor_here();
        }

        if from != to {
            let kind = token_start(to);
            if kind != TokenKind::None {
                stream.begin_token(kind);
            }
            if from == CharState::ChunkSize {
                // HS_META_END_CHK_SIZE alias for NotTransferEnc (column 1).
                self.meta_trigger(MetaEvent::NotTransferEnc);
            }
            if to == CharState::HeaderKey {
                self.header_count += 1;
                if self.header_count > self.max_header_count {
                    return Token {
                        kind: TokenKind::Error,
                        offset: 0,
                        len: 0,
                    };
                }
            } else if to == CharState::HeaderSp {
                self.meta_trigger(MetaEvent::EndKey);
                emitted = stream.emit();
            }
            self.match_index = 0;
        }

        match to {
            CharState::MethodSp | CharState::TargetSp => {
                emitted = stream.emit();
            }
            CharState::RlCr | CharState::HeaderCr => {
                self.meta_trigger(MetaEvent::EndValue);
                emitted = stream.emit();
            }
            CharState::HeaderKey => {
                self.match_header_name(c);
            }
            CharState::HeaderVal => {
                self.match_header_value(c);
            }
            CharState::HeadersEnd => {
                emitted = self.end_of_headers(stream);
            }
            CharState::ChunkSize => {
                self.accumulate_chunk_size(c);
            }
            CharState::ChunkBody | CharState::Body => {
                emitted = self.consume_body_bytes(stream, to);
            }
            CharState::ChunkEndLf => {
                // HS_META_END_CHUNK alias for EndKey (column 2).
                self.meta_trigger(MetaEvent::EndKey);
            }
            CharState::Error => {
                emitted = Token {
                    kind: TokenKind::Error,
                    offset: 0,
                    len: 0,
                };
            }
            _ => {}
        }

        emitted
    }

    fn match_header_name(&mut self, c: u8) {
        let low = c.to_ascii_lowercase();
        match_prefix(self, low, b"transfer-encoding", MetaEvent::NotTransferEnc);
        match_prefix(self, low, b"content-length", MetaEvent::NotContentLen);
        self.match_index += 1;
    }

    fn match_header_value(&mut self, c: u8) {
        match self.meta {
            MetaState::MatchChunked => {
                let low = c.to_ascii_lowercase();
                match_prefix(self, low, b"chunked", MetaEvent::NotContentLen);
                self.match_index += 1;
            }
            MetaState::ClValue => {
                if c.is_ascii_digit() {
                    self.content_length = self.content_length * 10 + (c - b'0') as u64;
                }
            }
            _ => {}
        }
    }

    fn accumulate_chunk_size(&mut self, c: u8) {
        if c != b'0' {
            // HS_META_NON_ZERO alias for NotContentLen (column 0).
            self.meta_trigger(MetaEvent::NotContentLen);
        }
        if let Some(d) = (c as char).to_digit(16) {
            self.content_length = self.content_length * 16 + d as u64;
        }
    }

    fn end_of_headers(&mut self, stream: &mut ReadStream) -> Token {
        let mut emitted = Token::NONE;
        if self.meta == MetaState::Small && !stream.can_contain(self.content_length) {
            self.meta_trigger(MetaEvent::LargeBody);
        }
        if self.meta == MetaState::Big || self.meta == MetaState::Chunked {
            emitted = Token {
                kind: TokenKind::BodyStream,
                offset: 0,
                len: 0,
            };
        }
        self.meta_trigger(MetaEvent::EndHeaders);
        if self.content_length == 0 && self.meta == MetaState::Body {
            self.meta = MetaState::End;
        }
        if self.meta == MetaState::End {
            emitted = Token {
                kind: TokenKind::Body,
                offset: 0,
                len: 0,
            };
            let _ = stream.emit();
        }
        emitted
    }

    fn consume_body_bytes(&mut self, stream: &mut ReadStream, to: CharState) -> Token {
        if self.meta == MetaState::Streaming {
            stream.begin_token(TokenKind::ChunkBody);
        }
        let body_left = (self.content_length - self.body_consumed) as i64;
        if stream.jump(body_left) {
            let emitted = stream.emit();
            // HS_META_NEXT alias for NotContentLen (column 0).
            self.meta_trigger(MetaEvent::NotContentLen);
            self.content_length = 0;
            self.body_consumed = 0;
            if to == CharState::ChunkBody {
                self.state = CharState::ChunkEnd;
            }
            emitted
        } else {
            self.body_consumed += stream.jump_all() as u64;
            if self.meta == MetaState::Streaming {
                let emitted = stream.emit();
                stream.shift();
                emitted
            } else {
                Token::NONE
            }
        }
    }
}

/// Mirrors the original's `MATCH(str, meta)` macro: compare the current byte
/// (already lowercased) against the next expected byte of a fixed target;
/// on a mismatch the meta FSM is told this header/value didn't match.
fn match_prefix(fsm: &mut ParserFsm, low: u8, target: &'static [u8], mismatch_event: MetaEvent) {
    let in_bounds = fsm.match_index < target.len();
    let expected = if in_bounds { target[fsm.match_index] } else { 0 };
    if low != expected {
        fsm.meta_trigger(mismatch_event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stream::ReadStream;

    fn feed(input: &[u8]) -> (ParserFsm, ReadStream, Vec<(TokenKind, Vec<u8>)>) {
        feed_with_limits(input, 127, 8192, 8192)
    }

    fn feed_with_limits(
        input: &[u8],
        max_headers: u32,
        max_token_len: usize,
        buf_max: usize,
    ) -> (ParserFsm, ReadStream, Vec<(TokenKind, Vec<u8>)>) {
        let mut fsm = ParserFsm::new(max_headers, max_token_len);
        let mut stream = ReadStream::new(buf_max.max(input.len()), buf_max.max(input.len()));
        stream.writable_mut()[..input.len()].copy_from_slice(input);
        stream.commit_written(input.len());
        let mut out = Vec::new();
        loop {
            let tok = fsm.next_token(&mut stream);
            match tok.kind {
                TokenKind::None => break,
                TokenKind::ReqEnd | TokenKind::BodyStream | TokenKind::Error => {
                    let done = tok.kind != TokenKind::BodyStream;
                    out.push((tok.kind, Vec::new()));
                    if done {
                        break;
                    }
                }
                _ => {
                    let bytes = stream.slice(tok.offset, tok.len).to_vec();
                    out.push((tok.kind, bytes));
                }
            }
        }
        (fsm, stream, out)
    }

    #[test]
    fn simple_get_tokens() {
        let (_, _, out) = feed(b"GET /empty HTTP/1.1\r\nHost: x\r\n\r\n");
        let kinds: Vec<_> = out.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Method,
                TokenKind::Target,
                TokenKind::Version,
                TokenKind::HeaderKey,
                TokenKind::HeaderVal,
                TokenKind::Body,
                TokenKind::ReqEnd,
            ]
        );
        assert_eq!(out[0].1, b"GET");
        assert_eq!(out[1].1, b"/empty");
        assert_eq!(out[3].1, b"Host");
        assert_eq!(out[4].1, b"x");
    }

    #[test]
    fn small_body_delivered_as_single_token() {
        let (_, _, out) =
            feed(b"POST /echo HTTP/1.1\r\nHost: x\r\ncontent-length: 5\r\n\r\nhello");
        let body = out.iter().find(|(k, _)| *k == TokenKind::Body).unwrap();
        assert_eq!(body.1, b"hello");
    }

    #[test]
    fn malformed_request_line_errors() {
        let (_, _, out) = feed(b"GE!T / HTTP/1.1\r\n\r\n");
        assert_eq!(out.last().unwrap().0, TokenKind::Error);
    }

    #[test]
    fn header_name_case_insensitive() {
        let (_, _, out1) = feed(b"GET / HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        let (_, _, out2) = feed(b"GET / HTTP/1.1\r\ncontent-LENGTH: 0\r\n\r\n");
        let kinds1: Vec<_> = out1.iter().map(|(k, _)| *k).collect();
        let kinds2: Vec<_> = out2.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds1, kinds2);
    }

    #[test]
    fn chunked_body_streams_then_ends() {
        let (_, mut stream, out) = feed_with_limits(
            b"POST /large HTTP/1.1\r\nHost: x\r\ntransfer-encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            127,
            8192,
            8192,
        );
        assert!(out.iter().any(|(k, _)| *k == TokenKind::BodyStream));
        // Drive the remaining chunk-body tokens manually since the helper
        // above stops fanning out after BodyStream.
        let mut fsm = ParserFsm::new(127, 8192);
        stream.reset();
        let input = b"POST /large HTTP/1.1\r\nHost: x\r\ntransfer-encoding: chunked\r\n\r\n\
                       5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let mut stream = ReadStream::new(input.len(), input.len());
        stream.writable_mut()[..input.len()].copy_from_slice(input);
        stream.commit_written(input.len());
        let mut body = Vec::new();
        loop {
            let tok = fsm.next_token(&mut stream);
            match tok.kind {
                TokenKind::None => break,
                TokenKind::ChunkBody => body.extend_from_slice(stream.slice(tok.offset, tok.len)),
                TokenKind::ReqEnd => break,
                TokenKind::Error | TokenKind::BodyStream => continue,
                _ => {}
            }
        }
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn header_count_limit_enforced() {
        let mut req = String::from("GET / HTTP/1.1\r\n");
        for i in 0..128 {
            req.push_str(&format!("x-{i}: v\r\n"));
        }
        req.push_str("\r\n");
        let (_, _, out) = feed_with_limits(req.as_bytes(), 127, 8192, 1 << 20);
        assert_eq!(out.last().unwrap().0, TokenKind::Error);
    }

    #[test]
    fn token_length_limit_enforced() {
        let mut req = String::from("GET / HTTP/1.1\r\nx: ");
        req.push_str(&"a".repeat(20));
        req.push_str("\r\n\r\n");
        let (_, _, out) = feed_with_limits(req.as_bytes(), 127, 16, 1 << 20);
        assert_eq!(out.last().unwrap().0, TokenKind::Error);
    }
}
