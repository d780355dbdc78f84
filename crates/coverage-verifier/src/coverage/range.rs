//! Source positions used by every coverage map.

use serde::{Deserialize, Serialize};

/// A one-based line, zero-based column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Location {
    /// One-based line
    pub line: u32,
    /// Zero-based column
    pub column: u32,
}

/// A `{start, end}` source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    /// Start position (inclusive)
    pub start: Location,
    /// End position
    pub end: Location,
}

impl Range {
    /// Create a range from raw line/column numbers
    #[must_use]
    pub const fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start: Location {
                line: start_line,
                column: start_column,
            },
            end: Location {
                line: end_line,
                column: end_column,
            },
        }
    }

    /// Whether `line` lies within this range's line span
    #[must_use]
    pub const fn covers_line(&self, line: u32) -> bool {
        self.start.line <= line && line <= self.end.line
    }

    /// Every line this range touches, in order
    pub fn lines(&self) -> impl Iterator<Item = u32> {
        self.start.line..=self.end.line.max(self.start.line)
    }

    /// Key used to identify equivalent items across records
    #[must_use]
    pub fn location_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_serializes_in_istanbul_shape() {
        let range = Range::new(1, 0, 4, 2);
        let json = serde_json::to_value(range).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"start": {"line": 1, "column": 0}, "end": {"line": 4, "column": 2}})
        );
    }

    #[test]
    fn test_covers_line_is_inclusive() {
        let range = Range::new(2, 5, 3, 0);
        assert!(!range.covers_line(1));
        assert!(range.covers_line(2));
        assert!(range.covers_line(3));
        assert!(!range.covers_line(4));
    }

    #[test]
    fn test_lines_of_inverted_range_is_start_only() {
        let range = Range::new(5, 0, 3, 0);
        assert_eq!(range.lines().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn test_location_key() {
        assert_eq!(Range::new(1, 2, 3, 4).location_key(), "1|2|3|4");
    }
}
