//! Coverage totals.

use serde::{Deserialize, Serialize};

/// Percentage with two decimals, truncated; an empty set counts as 100%.
#[must_use]
pub fn percent(covered: u32, total: u32) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let tenths_of_basis_points = (1000 * 100 * u64::from(covered)) / u64::from(total);
    ((tenths_of_basis_points as f64) / 10.0).floor() / 100.0
}

/// Covered/total counts for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Totals {
    /// Number of items
    pub total: u32,
    /// Items hit at least once
    pub covered: u32,
    /// Items excluded from counting
    pub skipped: u32,
    /// Covered percentage
    pub pct: f64,
}

/// Totals for every coverage dimension of one or more files.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    /// Line totals
    pub lines: Totals,
    /// Statement totals
    pub statements: Totals,
    /// Function totals
    pub functions: Totals,
    /// Branch arm totals
    pub branches: Totals,
    /// Branch truthiness totals, when tracked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branches_true: Option<Totals>,
}

impl Totals {
    fn add(&mut self, other: &Self) {
        self.total += other.total;
        self.covered += other.covered;
        self.skipped += other.skipped;
        self.pct = percent(self.covered, self.total);
    }
}

impl CoverageSummary {
    /// Fold another summary into this one.
    pub fn merge(&mut self, other: &Self) {
        self.lines.add(&other.lines);
        self.statements.add(&other.statements);
        self.functions.add(&other.functions);
        self.branches.add(&other.branches);
        if let Some(theirs) = &other.branches_true {
            self.branches_true.get_or_insert_with(Totals::default).add(theirs);
        }
    }

    /// No lines were counted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.total == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_full() {
        assert_eq!(percent(1, 1), 100.0);
    }

    #[test]
    fn test_percent_empty_set_is_full() {
        assert_eq!(percent(0, 0), 100.0);
    }

    #[test]
    fn test_percent_truncates() {
        assert_eq!(percent(1, 3), 33.33);
        assert!(percent(999_998, 999_999) < 100.0);
    }

    #[test]
    fn test_merge_recomputes_percentages() {
        let mut a = CoverageSummary {
            statements: Totals {
                total: 2,
                covered: 1,
                skipped: 0,
                pct: 50.0,
            },
            ..CoverageSummary::default()
        };
        let b = CoverageSummary {
            statements: Totals {
                total: 2,
                covered: 2,
                skipped: 0,
                pct: 100.0,
            },
            branches_true: Some(Totals {
                total: 1,
                covered: 0,
                skipped: 0,
                pct: 0.0,
            }),
            ..CoverageSummary::default()
        };
        a.merge(&b);
        assert_eq!(a.statements.total, 4);
        assert_eq!(a.statements.pct, 75.0);
        assert_eq!(a.branches_true.unwrap().total, 1);
        assert!(a.is_empty());
    }
}
