use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// A source location in the kernel's original text: 1-based line and column.
///
/// Line 0 means the location is unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub col: u32,
}

impl Location {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    pub fn unknown() -> Self {
        Self { line: 0, col: 0 }
    }

    pub fn is_known(&self) -> bool {
        self.line > 0
    }

    /// Byte range of the token starting at this location in `source`.
    ///
    /// The token extends to the next whitespace or punctuation; an empty
    /// token still yields a one-byte range so a label has something to point at.
    pub fn byte_range(&self, source: &str) -> Option<Range<usize>> {
        if !self.is_known() {
            return None;
        }
        let mut offset = 0usize;
        for (idx, line) in source.split_inclusive('\n').enumerate() {
            if idx + 1 == self.line as usize {
                let col = (self.col.max(1) - 1) as usize;
                let start = offset + col.min(line.trim_end_matches('\n').len());
                let rest = &source[start..];
                let len = rest
                    .find(|c: char| c.is_whitespace() || "(),;[]{}".contains(c))
                    .unwrap_or(rest.len())
                    .max(1);
                let end = (start + len).min(source.len().max(start + 1));
                return Some(start..end);
            }
            offset += line.len();
        }
        None
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}:{}", self.line, self.col)
        } else {
            write!(f, "<unknown>")
        }
    }
}
