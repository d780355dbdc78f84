//! Per-case execution context and the coverage-global it owns.
//!
//! Each verification run gets its own [`ExecutionContext`] with a unique
//! slot id, so cases running concurrently never share a coverage-global.
//! The [`CoverageGlobal`] follows the embedded initializer's contract:
//! register on first call, keep an existing record with the same hash, and
//! replace one whose hash differs.

use std::collections::BTreeMap;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::coverage::FileCoverage;
use crate::extract::InitialCoverage;
use crate::result::{VerifyError, VerifyResult};

/// What an initializer call did to the coverage-global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// No record existed for the path
    Registered,
    /// A record with the same hash existed and was kept
    Memoized,
    /// A record with a different hash was replaced
    Replaced,
}

/// Registered record and the hash it was registered with.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRecord {
    /// Identity hash of the embedded record
    pub hash: String,
    /// Maps and live counters
    pub coverage: FileCoverage,
}

/// Coverage records keyed by path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageGlobal {
    records: BTreeMap<String, LiveRecord>,
}

impl CoverageGlobal {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the initializer contract for a record read from instrumented code.
    pub fn initialize(&mut self, initial: &InitialCoverage) -> VerifyResult<InitOutcome> {
        let coverage = initial.file_coverage()?;
        Ok(self.register(&initial.path, &initial.hash, coverage))
    }

    /// Register `coverage` under `path` unless a record with `hash` is
    /// already there.
    pub fn register(&mut self, path: &str, hash: &str, coverage: FileCoverage) -> InitOutcome {
        let outcome = match self.records.get(path) {
            None => InitOutcome::Registered,
            Some(existing) if existing.hash == hash => InitOutcome::Memoized,
            Some(_) => InitOutcome::Replaced,
        };
        if outcome != InitOutcome::Memoized {
            self.records.insert(
                path.to_string(),
                LiveRecord {
                    hash: hash.to_string(),
                    coverage,
                },
            );
        }
        debug!(path, ?outcome, "coverage initializer ran");
        outcome
    }

    /// Live record for `path`
    pub fn get(&self, path: &str) -> Option<&FileCoverage> {
        self.records.get(path).map(|r| &r.coverage)
    }

    /// Live record and registration hash for `path`
    pub fn record(&self, path: &str) -> Option<&LiveRecord> {
        self.records.get(path)
    }

    /// Registered paths in order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Number of registered records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// `s[id]++`
    pub fn hit_statement(&mut self, path: &str, id: u32) -> VerifyResult<()> {
        let counter = self.live(path)?.s.get_mut(&id).ok_or_else(|| unknown(path, "s", id))?;
        *counter += 1;
        trace!(path, id, "statement probe");
        Ok(())
    }

    /// `f[id]++`
    pub fn hit_function(&mut self, path: &str, id: u32) -> VerifyResult<()> {
        let counter = self.live(path)?.f.get_mut(&id).ok_or_else(|| unknown(path, "f", id))?;
        *counter += 1;
        trace!(path, id, "function probe");
        Ok(())
    }

    /// `b[id][arm]++`
    pub fn hit_branch(&mut self, path: &str, id: u32, arm: usize) -> VerifyResult<()> {
        let arms = self.live(path)?.b.get_mut(&id).ok_or_else(|| unknown(path, "b", id))?;
        let counter = arms.get_mut(arm).ok_or_else(|| unknown(path, "b arm", id))?;
        *counter += 1;
        trace!(path, id, arm, "branch probe");
        Ok(())
    }

    /// `bT[id][arm]++`
    pub fn hit_branch_true(&mut self, path: &str, id: u32, arm: usize) -> VerifyResult<()> {
        let arms = self
            .live(path)?
            .b_t
            .as_mut()
            .and_then(|b_t| b_t.get_mut(&id))
            .ok_or_else(|| unknown(path, "bT", id))?;
        let counter = arms.get_mut(arm).ok_or_else(|| unknown(path, "bT arm", id))?;
        *counter += 1;
        trace!(path, id, arm, "branch truthiness probe");
        Ok(())
    }

    fn live(&mut self, path: &str) -> VerifyResult<&mut FileCoverage> {
        self.records
            .get_mut(path)
            .map(|r| &mut r.coverage)
            .ok_or_else(|| VerifyError::Execution {
                message: format!("probe fired for unregistered file {path}"),
            })
    }
}

fn unknown(path: &str, counter: &str, id: u32) -> VerifyError {
    VerifyError::Execution {
        message: format!("probe for unknown {counter} id {id} in {path}"),
    }
}

/// Isolated execution state of one verification run.
#[derive(Debug)]
pub struct ExecutionContext {
    coverage_variable: String,
    slot: String,
    global: CoverageGlobal,
}

impl ExecutionContext {
    /// Context binding the coverage-global under `coverage_variable`, in a
    /// slot of its own.
    pub fn new(coverage_variable: impl Into<String>) -> Self {
        let coverage_variable = coverage_variable.into();
        let slot = format!("{coverage_variable}_{}", Uuid::new_v4().simple());
        Self {
            coverage_variable,
            slot,
            global: CoverageGlobal::new(),
        }
    }

    /// Name the instrumented code reads the coverage-global from
    pub fn coverage_variable(&self) -> &str {
        &self.coverage_variable
    }

    /// Unique id of this context's coverage-global slot
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Bind a fresh, empty coverage-global.
    pub fn install_baseline(&mut self) {
        trace!(slot = %self.slot, "installing baseline coverage-global");
        self.global.reset();
    }

    /// Current coverage-global
    pub fn global(&self) -> &CoverageGlobal {
        &self.global
    }

    /// Mutable coverage-global, for the sandbox
    pub fn global_mut(&mut self) -> &mut CoverageGlobal {
        &mut self.global
    }

    /// Take the coverage-global, leaving an empty one bound.
    pub fn take_global(&mut self) -> CoverageGlobal {
        std::mem::take(&mut self.global)
    }
}
