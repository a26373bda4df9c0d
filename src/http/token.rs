// ABOUTME: Emitted token descriptors: a type plus an offset/len pair into the ReadStream buffer

/// The kind of token the parser has just finished emitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    None,
    Method,
    Target,
    Version,
    HeaderKey,
    HeaderVal,
    ChunkBody,
    Body,
    BodyStream,
    ReqEnd,
    Eof,
    Error,
}

/// A token is a borrow descriptor: `{kind, offset, len}` into the owning
/// `ReadStream`'s buffer. It carries no lifetime of its own — callers resolve
/// it back into a byte slice through the stream that produced it, and must
/// not hold onto the slice past the next shift-compact or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub len: usize,
}

impl Default for Token {
    fn default() -> Self {
        Token::NONE
    }
}

impl Token {
    pub const NONE: Token = Token {
        kind: TokenKind::None,
        offset: 0,
        len: 0,
    };

    #[inline]
    pub fn is_none(&self) -> bool {
        self.kind == TokenKind::None
    }
}
