//! Byte scanning for the parser
//!
//! Thin cursor over the input using memchr for delimiter searches (SIMD
//! accelerated where the platform supports it). Also owns the line/column
//! arithmetic for diagnostics: positions are tracked as byte offsets and
//! resolved to 1-based line/column pairs only when an error is reported.

use memchr::{memchr, memmem};

pub struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    #[inline]
    pub fn new(input: &'a [u8]) -> Self {
        Scanner { input, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    #[inline]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    #[inline]
    pub fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        &self.input[start..end]
    }

    #[inline]
    pub fn starts_with(&self, needle: &[u8]) -> bool {
        self.input[self.pos..].starts_with(needle)
    }

    /// Consume `needle` if the input starts with it here.
    #[inline]
    pub fn eat(&mut self, needle: &[u8]) -> bool {
        if self.starts_with(needle) {
            self.pos += needle.len();
            true
        } else {
            false
        }
    }

    /// Skip XML whitespace, returning how many bytes were skipped.
    pub fn skip_whitespace(&mut self) -> usize {
        let start = self.pos;
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
        self.pos - start
    }

    /// Find the next occurrence of `byte` at or after the cursor.
    #[inline]
    pub fn find_byte(&self, byte: u8) -> Option<usize> {
        memchr(byte, &self.input[self.pos..]).map(|i| self.pos + i)
    }

    /// Find the next occurrence of a multi-byte terminator ("-->", "]]>").
    #[inline]
    pub fn find_sub(&self, needle: &[u8]) -> Option<usize> {
        memmem::find(&self.input[self.pos..], needle).map(|i| self.pos + i)
    }

    /// Read an XML name. The cursor does not move if no name starts here.
    pub fn read_name(&mut self) -> Option<&'a [u8]> {
        let first = self.peek()?;
        if !is_name_start_byte(first) {
            return None;
        }
        let start = self.pos;
        self.pos += 1;
        while self.peek().is_some_and(is_name_byte) {
            self.pos += 1;
        }
        Some(&self.input[start..self.pos])
    }

    /// Resolve a byte offset to a 1-based (line, column) pair. Columns count
    /// bytes from the last newline; diagnostics are rare enough that a rescan
    /// of the prefix is cheaper than tracking lines on the hot path.
    pub fn line_col(&self, pos: usize) -> (u32, u32) {
        let pos = pos.min(self.input.len());
        let prefix = &self.input[..pos];
        let mut line = 1u32;
        let mut last_nl = None;
        for i in memchr::memchr_iter(b'\n', prefix) {
            line += 1;
            last_nl = Some(i);
        }
        let col = match last_nl {
            Some(nl) => pos - nl,
            None => pos + 1,
        };
        (line, col as u32)
    }
}

/// First byte of an XML name: ASCII letter, underscore, colon, or the lead
/// byte of any non-ASCII UTF-8 sequence.
#[inline]
pub fn is_name_start_byte(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'_' | b':') || b >= 0x80
}

/// Continuation byte of an XML name.
#[inline]
pub fn is_name_byte(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' | b':') || b >= 0x80
}

/// True if every byte is XML whitespace.
#[inline]
pub fn is_all_whitespace(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
}
