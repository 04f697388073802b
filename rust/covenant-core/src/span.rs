//! Source positions and spans.

use serde::{Deserialize, Serialize};

/// A half-open region of a source file, in 1-based lines and columns.
///
/// Spans ride on every IR node; the verifier never reads file contents, so
/// a span plus the file name is all a diagnostic needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Span {
    pub fn new(line: usize, col: usize, end_line: usize, end_col: usize) -> Self {
        Self { line, col, end_line, end_col }
    }

    /// A span for synthesized nodes with no source location.
    pub fn dummy() -> Self {
        Self { line: 0, col: 0, end_line: 0, end_col: 0 }
    }

    pub fn is_dummy(&self) -> bool {
        self.line == 0
    }

    /// The smallest span covering both `self` and `other`.
    pub fn merge(&self, other: Span) -> Span {
        if self.is_dummy() {
            return other;
        }
        if other.is_dummy() {
            return *self;
        }
        let (line, col) = if (self.line, self.col) <= (other.line, other.col) {
            (self.line, self.col)
        } else {
            (other.line, other.col)
        };
        let (end_line, end_col) = if (self.end_line, self.end_col) >= (other.end_line, other.end_col)
        {
            (self.end_line, self.end_col)
        } else {
            (other.end_line, other.end_col)
        };
        Span { line, col, end_line, end_col }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::dummy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_is_dummy() {
        assert!(Span::dummy().is_dummy());
        assert!(!Span::new(1, 1, 1, 5).is_dummy());
    }

    #[test]
    fn merge_covers_both() {
        let a = Span::new(2, 5, 2, 9);
        let b = Span::new(4, 1, 4, 3);
        let m = a.merge(b);
        assert_eq!((m.line, m.col), (2, 5));
        assert_eq!((m.end_line, m.end_col), (4, 3));
    }

    #[test]
    fn merge_ignores_dummy() {
        let a = Span::new(2, 5, 2, 9);
        assert_eq!(a.merge(Span::dummy()), a);
        assert_eq!(Span::dummy().merge(a), a);
    }
}
