//! Source positions and spans for diagnostics

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single point in a source file (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.line, self.column)
    }
}

/// A source span: file name plus begin/end positions.
///
/// An invalid (default) location compares before every valid one and is
/// rendered as `(unknown)`; builder-constructed nodes that have no source
/// text carry it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    file: String,
    begin: Position,
    end: Position,
}

impl Location {
    pub fn new(file: impl Into<String>, begin: Position, end: Position) -> Self {
        Self {
            file: file.into(),
            begin,
            end,
        }
    }

    /// A location with no backing source text.
    pub fn none() -> Self {
        Self {
            file: String::new(),
            begin: Position::new(0, 0),
            end: Position::new(0, 0),
        }
    }

    /// Convenience for fixtures: a whole-line span.
    pub fn line(file: impl Into<String>, line: usize) -> Self {
        Self::new(file, Position::new(line, 1), Position::new(line, 1))
    }

    pub fn is_valid(&self) -> bool {
        !self.file.is_empty()
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn begin(&self) -> Position {
        self.begin
    }

    pub fn end(&self) -> Position {
        self.end
    }

    pub fn in_same_file(&self, other: &Location) -> bool {
        self.is_valid() && other.is_valid() && self.file == other.file
    }

    /// Whether `self` ends before `other` begins, in the same file.
    pub fn is_before(&self, other: &Location) -> bool {
        self.in_same_file(other) && self.end <= other.begin
    }

    /// Whether the two spans overlap (same file only).
    pub fn intersects(&self, other: &Location) -> bool {
        self.in_same_file(other) && self.begin < other.end && other.begin < self.end
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.file, self.begin, self.end).cmp(&(&other.file, other.begin, other.end))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "(unknown)");
        }
        if self.begin == self.end {
            write!(f, "{}:{}", self.file, self.begin)
        } else {
            write!(f, "{}:{}-{}", self.file, self.begin, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let a = Location::new("f.ridl", Position::new(1, 1), Position::new(1, 5));
        let b = Location::new("f.ridl", Position::new(2, 1), Position::new(2, 5));
        assert!(a < b);
        assert!(a.is_before(&b));
        assert!(!b.is_before(&a));
    }

    #[test]
    fn test_is_before_requires_same_file() {
        let a = Location::new("a.ridl", Position::new(1, 1), Position::new(1, 5));
        let b = Location::new("b.ridl", Position::new(2, 1), Position::new(2, 5));
        assert!(!a.is_before(&b));
    }

    #[test]
    fn test_intersection() {
        let a = Location::new("f.ridl", Position::new(1, 1), Position::new(3, 1));
        let b = Location::new("f.ridl", Position::new(2, 1), Position::new(4, 1));
        let c = Location::new("f.ridl", Position::new(3, 1), Position::new(4, 1));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_display() {
        let a = Location::new("f.ridl", Position::new(1, 2), Position::new(1, 8));
        assert_eq!(a.to_string(), "f.ridl:1.2-1.8");
        assert_eq!(Location::none().to_string(), "(unknown)");
    }
}
