//! Collecting assertions over coverage dimensions.
//!
//! Every dimension of a case is checked independently; a failure is
//! recorded with its dimension label and checking continues, so one report
//! shows every disagreeing dimension.

use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};

use crate::result::VerifyError;

/// What a single assertion compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    /// Return value of the executed code
    Output,
    /// Derived per-line hit counts
    Lines,
    /// Per-function counters
    Functions,
    /// Per-branch arm counters
    Branches,
    /// Per-branch truthiness counters
    BranchesTrue,
    /// Per-statement counters
    Statements,
    /// Input source map carried in the record
    InputSourceMap,
    /// Extracted record against the declared baseline
    InitialCoverage,
    /// Extracted record path
    CoveragePath,
    /// Extracted coverage-global name
    CoverageVariable,
    /// Extracted record hash
    CoverageHash,
    /// Presence of an embedded or live record
    CoverageRecord,
    /// Output against a run with coverage disabled
    NoCoverageOutput,
    /// Whether the instrumenter accepted the input
    InstrumentationOutcome,
}

impl Dimension {
    /// Human-readable label used in diagnostics
    pub const fn label(self) -> &'static str {
        match self {
            Self::Output => "Output",
            Self::Lines => "Line coverage",
            Self::Functions => "Function coverage",
            Self::Branches => "Branch coverage",
            Self::BranchesTrue => "Branch truthiness coverage",
            Self::Statements => "Statement coverage",
            Self::InputSourceMap => "Input source map",
            Self::InitialCoverage => "Initial coverage",
            Self::CoveragePath => "Coverage path",
            Self::CoverageVariable => "Coverage variable",
            Self::CoverageHash => "Coverage hash",
            Self::CoverageRecord => "Coverage record",
            Self::NoCoverageOutput => "No-coverage output",
            Self::InstrumentationOutcome => "Instrumentation outcome",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single failed dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionFailure {
    /// Which dimension disagreed
    pub dimension: Dimension,
    /// Expected value, rendered
    pub expected: String,
    /// Actual value, rendered
    pub actual: String,
    /// Index of this failure in the sequence
    pub index: usize,
}

impl DimensionFailure {
    /// As a crate error
    pub fn to_error(&self) -> VerifyError {
        VerifyError::DimensionMismatch {
            dimension: self.dimension.label().to_string(),
            expected: self.expected.clone(),
            actual: self.actual.clone(),
        }
    }
}

impl fmt::Display for DimensionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mismatch: expected {}, got {}",
            self.dimension, self.expected, self.actual
        )
    }
}

/// Whether checking continues after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssertionMode {
    /// Collect all failures
    #[default]
    Collect,
    /// Stop on first failure
    FailFast,
}

/// Collector of per-dimension assertion failures.
#[derive(Debug, Default)]
pub struct DimensionAssertions {
    failures: Vec<DimensionFailure>,
    mode: AssertionMode,
    assertion_count: usize,
}

impl DimensionAssertions {
    /// Empty collector in [`AssertionMode::Collect`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty collector in `mode`
    #[must_use]
    pub fn with_mode(mode: AssertionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Assert structural equality.
    pub fn assert_eq<T: PartialEq + Debug>(&mut self, dimension: Dimension, actual: &T, expected: &T) {
        self.assert_eq_by(dimension, actual, expected, |a, b| a == b);
    }

    /// Assert equality under a custom comparison.
    pub fn assert_eq_by<T: Debug>(
        &mut self,
        dimension: Dimension,
        actual: &T,
        expected: &T,
        eq: impl Fn(&T, &T) -> bool,
    ) {
        if self.should_stop() {
            return;
        }
        self.assertion_count += 1;
        if !eq(actual, expected) {
            self.record_failure(dimension, format!("{expected:?}"), format!("{actual:?}"));
        }
    }

    /// Assert a condition, describing the expectation in words.
    pub fn assert_true(&mut self, dimension: Dimension, condition: bool, expectation: &str) {
        if self.should_stop() {
            return;
        }
        self.assertion_count += 1;
        if !condition {
            self.record_failure(dimension, expectation.to_string(), "not satisfied".to_string());
        }
    }

    /// Record a failure outright.
    pub fn fail(&mut self, dimension: Dimension, expected: impl Into<String>, actual: impl Into<String>) {
        self.assertion_count += 1;
        self.record_failure(dimension, expected.into(), actual.into());
    }

    fn record_failure(&mut self, dimension: Dimension, expected: String, actual: String) {
        tracing::debug!(%dimension, %expected, %actual, "dimension mismatch");
        let index = self.failures.len();
        self.failures.push(DimensionFailure {
            dimension,
            expected,
            actual,
            index,
        });
    }

    /// Whether a fail-fast collector already failed
    pub fn should_stop(&self) -> bool {
        self.mode == AssertionMode::FailFast && !self.failures.is_empty()
    }

    /// All failures so far
    #[must_use]
    pub fn failures(&self) -> &[DimensionFailure] {
        &self.failures
    }

    /// Consume the collector, returning its failures
    pub fn into_failures(self) -> Vec<DimensionFailure> {
        self.failures
    }

    /// Number of failures
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Number of assertions checked
    #[must_use]
    pub const fn assertion_count(&self) -> usize {
        self.assertion_count
    }

    /// Whether every assertion passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// First failure as an error, if any.
    pub fn verify(&self) -> Result<(), VerifyError> {
        self.failures.first().map_or(Ok(()), |f| Err(f.to_error()))
    }

    /// Clear failures and counts
    pub fn clear(&mut self) {
        self.failures.clear();
        self.assertion_count = 0;
    }

    /// Counts of checked, passed and failed assertions
    #[must_use]
    pub fn summary(&self) -> AssertionSummary {
        AssertionSummary {
            total: self.assertion_count,
            passed: self.assertion_count - self.failures.len(),
            failed: self.failures.len(),
        }
    }
}

/// Summary of assertion results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionSummary {
    /// Total assertions checked
    pub total: usize,
    /// Assertions that passed
    pub passed: usize,
    /// Assertions that failed
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_every_failing_dimension() {
        let mut soft = DimensionAssertions::new();
        soft.assert_eq(Dimension::Output, &1, &2);
        soft.assert_eq(Dimension::Lines, &vec![1], &vec![1]);
        soft.assert_eq(Dimension::Statements, &"a", &"b");
        assert_eq!(soft.failure_count(), 2);
        assert_eq!(soft.failures()[1].dimension, Dimension::Statements);
        assert_eq!(soft.failures()[1].index, 1);
        assert_eq!(
            soft.summary(),
            AssertionSummary {
                total: 3,
                passed: 1,
                failed: 2
            }
        );
    }

    #[test]
    fn test_fail_fast_stops_after_first_failure() {
        let mut soft = DimensionAssertions::with_mode(AssertionMode::FailFast);
        soft.assert_true(Dimension::CoverageRecord, false, "record present");
        soft.assert_eq(Dimension::Output, &1, &2);
        assert_eq!(soft.failure_count(), 1);
        assert_eq!(soft.assertion_count(), 1);
        assert!(soft.should_stop());
    }

    #[test]
    fn test_failure_converts_to_labeled_error() {
        let mut soft = DimensionAssertions::new();
        soft.assert_eq(Dimension::Functions, &vec![0], &vec![1]);
        let err = soft.verify().unwrap_err();
        assert_eq!(err.dimension(), Some("Function coverage"));
        assert_eq!(
            err.to_string(),
            "Function coverage mismatch: expected [1], got [0]"
        );
        assert_eq!(soft.failures()[0].to_string(), err.to_string());
    }

    #[test]
    fn test_custom_comparison() {
        let mut soft = DimensionAssertions::new();
        soft.assert_eq_by(Dimension::Output, &1.0_f64, &1.0000001, |a, b| {
            (a - b).abs() < 1e-3
        });
        assert!(soft.all_passed());
        soft.clear();
        assert_eq!(soft.assertion_count(), 0);
    }
}
