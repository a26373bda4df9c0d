// ABOUTME: Growable byte buffer with a parse cursor, shift-compaction anchor, and the
// ABOUTME: currently-forming token — the buffer the character FSM walks one byte at a time

use super::token::{Token, TokenKind};

const STREAM_CONSUMED: u8 = 0x01;

/// Invariant upheld by every method below: `anchor <= token.offset <= index
/// <= length <= capacity`. Bytes between `index` and `length` are unparsed
/// input already read off the socket; bytes before `anchor` have been
/// shift-compacted away and must not be referenced by any live token.
pub struct ReadStream {
    buf: Box<[u8]>,
    capacity: usize,
    length: usize,
    index: usize,
    anchor: usize,
    bytes_total: u64,
    token: Token,
    flags: u8,
    max_size: usize,
}

impl ReadStream {
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        ReadStream {
            buf: vec![0u8; initial_size].into_boxed_slice(),
            capacity: initial_size,
            length: 0,
            index: 0,
            anchor: 0,
            bytes_total: 0,
            token: Token::NONE,
            flags: 0,
            max_size: max_size.max(initial_size),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte slice backing a resolved token.
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.buf[offset..offset + len]
    }

    /// Unparsed tail currently buffered, i.e. bytes available to feed the
    /// handler for a streamed body right now.
    pub fn available(&self) -> &[u8] {
        &self.buf[self.index..self.length]
    }

    /// Room left in the backing buffer before it must grow or refuse writes.
    pub fn writable_len(&self) -> usize {
        self.capacity - self.length
    }

    /// Mutable tail the caller can read socket bytes into.
    pub fn writable_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.length..self.capacity]
    }

    pub fn commit_written(&mut self, n: usize) {
        self.length += n;
        self.bytes_total += n as u64;
    }

    /// Grow the buffer (doubling) up to `max_size` if there's no room left.
    /// Returns `false` if already at `max_size` and full.
    pub fn grow_if_full(&mut self) -> bool {
        if self.length < self.capacity {
            return true;
        }
        if self.capacity >= self.max_size {
            return false;
        }
        let new_cap = (self.capacity * 2).min(self.max_size);
        let mut new_buf = vec![0u8; new_cap].into_boxed_slice();
        new_buf[..self.length].copy_from_slice(&self.buf[..self.length]);
        self.buf = new_buf;
        self.capacity = new_cap;
        true
    }

    /// Whether `size` bytes of body would fit without exceeding `max_size`.
    pub fn can_contain(&self, size: u64) -> bool {
        (self.max_size as u64).saturating_sub(self.index as u64) >= size
    }

    /// Peek the byte at the cursor without consuming it.
    #[inline]
    pub fn peek(&mut self) -> Option<u8> {
        self.flags &= !STREAM_CONSUMED;
        if self.index >= self.length {
            None
        } else {
            Some(self.buf[self.index])
        }
    }

    /// Commit the peeked byte to the in-progress token and advance the cursor.
    #[inline]
    pub fn consume(&mut self) {
        if self.flags & STREAM_CONSUMED != 0 {
            return;
        }
        self.flags |= STREAM_CONSUMED;
        self.index += 1;
        if self.token.kind != TokenKind::None {
            self.token.len += 1;
        }
    }

    pub fn anchor_here(&mut self) {
        self.anchor = self.index;
    }

    pub fn begin_token(&mut self, kind: TokenKind) {
        self.token = Token {
            kind,
            offset: self.index,
            len: 0,
        };
    }

    /// Hand back the in-progress token and clear it.
    pub fn emit(&mut self) -> Token {
        std::mem::replace(&mut self.token, Token::NONE)
    }

    pub fn current_token(&self) -> Token {
        self.token
    }

    /// Advance the cursor by `offset` bytes without visiting them one at a
    /// time (used once a chunk/body length is known). Returns `false` if
    /// that many bytes are not yet buffered.
    pub fn jump(&mut self, offset: i64) -> bool {
        self.flags |= STREAM_CONSUMED;
        if offset < 0 || self.index + offset as usize > self.length {
            return false;
        }
        let offset = offset as usize;
        self.index += offset;
        if self.token.kind != TokenKind::None {
            self.token.len += offset;
        }
        true
    }

    /// Advance the cursor to the end of currently-buffered bytes, returning
    /// how many bytes were skipped.
    pub fn jump_all(&mut self) -> usize {
        self.flags |= STREAM_CONSUMED;
        let offset = self.length - self.index;
        self.index += offset;
        if self.token.kind != TokenKind::None {
            self.token.len += offset;
        }
        offset
    }

    /// Move the unconsumed tail back to `anchor`, reclaiming prefix space so
    /// streaming memory stays bounded regardless of body size.
    pub fn shift(&mut self) {
        if self.token.offset == self.anchor {
            return;
        }
        if self.token.len > 0 {
            self.buf.copy_within(self.token.offset..self.length, self.anchor);
        }
        self.token.offset = self.anchor;
        self.index = self.anchor + self.token.len;
        self.length = self.index;
    }

    /// Reset to a freshly-initialized state for the next request on a
    /// keep-alive connection (buffer bytes are not cleared, only the cursor).
    pub fn reset(&mut self) {
        self.length = 0;
        self.index = 0;
        self.anchor = 0;
        self.bytes_total = 0;
        self.token = Token::NONE;
        self.flags = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_holds_after_consume() {
        let mut s = ReadStream::new(16, 64);
        s.writable_mut()[..5].copy_from_slice(b"hello");
        s.commit_written(5);
        s.begin_token(TokenKind::Method);
        for _ in 0..5 {
            s.peek();
            s.consume();
        }
        assert!(s.anchor <= s.current_token().offset);
        assert!(s.current_token().offset <= s.index());
        assert!(s.index() <= s.len());
        assert!(s.len() <= s.capacity());
        let tok = s.emit();
        assert_eq!(tok.len, 5);
        assert_eq!(s.slice(tok.offset, tok.len), b"hello");
    }

    #[test]
    fn grow_doubles_until_max() {
        let mut s = ReadStream::new(4, 16);
        s.commit_written(4);
        assert!(s.grow_if_full());
        assert_eq!(s.capacity(), 8);
        s.commit_written(4);
        assert!(s.grow_if_full());
        assert_eq!(s.capacity(), 16);
        s.commit_written(8);
        assert!(!s.grow_if_full());
        assert_eq!(s.capacity(), 16);
    }

    #[test]
    fn shift_compacts_tail() {
        let mut s = ReadStream::new(16, 16);
        s.writable_mut()[..8].copy_from_slice(b"AB123456");
        s.commit_written(8);
        // "AB" stands in for already-parsed headers; anchor is latched
        // right after them, where body parsing begins.
        s.index = 2;
        s.anchor_here();
        s.begin_token(TokenKind::ChunkBody);
        s.jump(3); // consumes "123"
        s.emit();
        // next frame starts where the previous one left off
        s.begin_token(TokenKind::ChunkBody);
        s.jump(1); // consumes "4"
        s.shift();
        assert_eq!(s.current_token().offset, s.anchor);
        assert_eq!(s.index(), s.anchor + 1);
        assert_eq!(&s.buf[s.anchor..s.anchor + 1], b"4");
    }
}
