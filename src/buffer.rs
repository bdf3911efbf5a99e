//! The byte cache: every byte fed to the parser that it has not yet consumed.

use bytes::{Buf, BytesMut};

/// Growable buffer holding the unconsumed suffix of the input.
///
/// Invariant: trimmed only from the front, and only by the number of bytes a
/// completed token actually covered.
#[derive(Debug, Default)]
pub(crate) struct ByteCache {
    buf: BytesMut,
}

impl ByteCache {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.buf.ends_with(suffix)
    }
}
