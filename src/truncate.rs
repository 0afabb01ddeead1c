// src/truncate.rs

//! Size-bounded transcripts.
//!
//! Build logs are mostly interesting at both ends: the invocation and early
//! configuration at the top, the final error at the bottom. [`shrink_by_size`]
//! keeps a head and a tail and replaces the middle with a marker.
//!
//! All lengths are counted in characters, not bytes, so a cut never lands
//! inside a UTF-8 sequence.

use std::borrow::Cow;

use crate::error::TruncateError;

/// Marker placed between the kept head and tail of a shrunk transcript.
pub const DEFAULT_JOIN_BY: &str = "\n..\n";

/// Which half receives the leftover character when the available budget is odd.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Side {
    #[default]
    Left,
    Right,
}

/// What to do when `size` is too small to hold the marker plus one character
/// on each side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SizeErrorPolicy {
    /// Return [`TruncateError::BudgetTooSmall`].
    #[default]
    Fail,
    /// Return the first `size` characters verbatim.
    KeepBeginning,
    /// Return the last `size` characters verbatim.
    KeepEnd,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShrinkOptions {
    pub join_by: String,
    pub larger: Side,
    pub on_size_error: SizeErrorPolicy,
}

impl Default for ShrinkOptions {
    fn default() -> Self {
        Self {
            join_by: DEFAULT_JOIN_BY.to_string(),
            larger: Side::Left,
            on_size_error: SizeErrorPolicy::Fail,
        }
    }
}

impl ShrinkOptions {
    pub fn with_join_by(mut self, join_by: impl Into<String>) -> Self {
        self.join_by = join_by.into();
        self
    }

    pub fn with_larger(mut self, larger: Side) -> Self {
        self.larger = larger;
        self
    }

    pub fn with_size_error_policy(mut self, policy: SizeErrorPolicy) -> Self {
        self.on_size_error = policy;
        self
    }
}

/// Shrinks `text` to at most `size` characters, keeping its head and tail.
///
/// Text already within budget is returned unchanged, which makes the function
/// idempotent: a shrunk result is exactly `size` characters long and passes
/// straight through a second call.
pub fn shrink_by_size<'a>(
    text: &'a str,
    size: usize,
    opts: &ShrinkOptions,
) -> Result<Cow<'a, str>, TruncateError> {
    let len = text.chars().count();
    if len <= size {
        return Ok(Cow::Borrowed(text));
    }

    let join_len = opts.join_by.chars().count();
    let min_size = join_len + 2;
    if size < min_size {
        return match opts.on_size_error {
            SizeErrorPolicy::KeepBeginning => Ok(Cow::Borrowed(&text[..byte_offset(text, size)])),
            SizeErrorPolicy::KeepEnd => Ok(Cow::Borrowed(&text[byte_offset(text, len - size)..])),
            SizeErrorPolicy::Fail => Err(TruncateError::BudgetTooSmall { size, min_size }),
        };
    }

    let available = size - join_len;
    let mut left = available / 2;
    let mut right = available / 2;
    if left + right < available {
        match opts.larger {
            Side::Left => left += 1,
            Side::Right => right += 1,
        }
    }

    let head = &text[..byte_offset(text, left)];
    let tail = &text[byte_offset(text, len - right)..];
    let mut shrunk = String::with_capacity(head.len() + opts.join_by.len() + tail.len());
    shrunk.push_str(head);
    shrunk.push_str(&opts.join_by);
    shrunk.push_str(tail);
    Ok(Cow::Owned(shrunk))
}

/// Byte offset of the `chars`-th character, or the end of the string.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}
