//! Byte-sequence search shared by every parsing stage.

use memchr::memmem;

/// First occurrence of `needle` in `haystack` at or after `from`.
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    memmem::find(&haystack[from..], needle).map(|i| i + from)
}

/// Outcome of testing whether `token` sits at a given offset.
///
/// `Partial` means the available suffix is a proper prefix of the token, so
/// the question cannot be answered until more bytes arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenMatch {
    Yes,
    No,
    Partial,
}

pub(crate) fn match_at(haystack: &[u8], at: usize, token: &[u8]) -> TokenMatch {
    if token.is_empty() {
        return TokenMatch::No;
    }
    let rest = &haystack[at.min(haystack.len())..];
    if rest.len() >= token.len() {
        if &rest[..token.len()] == token {
            TokenMatch::Yes
        } else {
            TokenMatch::No
        }
    } else if token.starts_with(rest) {
        TokenMatch::Partial
    } else {
        TokenMatch::No
    }
}
