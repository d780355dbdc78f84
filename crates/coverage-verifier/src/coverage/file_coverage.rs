//! Per-file coverage record.
//!
//! Field names and nesting follow the Istanbul file coverage format so that a
//! record serialises to exactly what an instrumented program registers under
//! its coverage-global.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::summary::{percent, CoverageSummary, Totals};
use super::{Range, SourceMap};

/// Hit counts keyed by statement/function id (or by line number).
pub type HitMap = BTreeMap<u32, u32>;

/// Per-arm hit counts keyed by branch id.
pub type BranchHitMap = BTreeMap<u32, Vec<u32>>;

/// Kind of a branch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchType {
    /// `a && b`, `a || b`, `a ?? b`
    BinaryExpr,
    /// `a ? b : c`
    CondExpr,
    /// `function f(a = 1)`
    DefaultArg,
    /// `if` / `else`
    If,
    /// `switch` cases
    Switch,
}

/// Declaration metadata for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Function name, `(anonymous_<id>)` when unnamed
    pub name: String,
    /// Range of the declaration head
    pub decl: Range,
    /// Range of the whole function
    pub loc: Range,
    /// Start line of `loc`, kept for legacy reporters
    pub line: u32,
}

/// Metadata for one branch point and its arms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Range of the whole branching construct
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<Range>,
    /// Branch kind
    #[serde(rename = "type")]
    pub branch_type: BranchType,
    /// One range per arm
    #[serde(default)]
    pub locations: Vec<Range>,
    /// Start line, kept for legacy reporters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Branch {
    /// Line the branch is attributed to
    #[must_use]
    pub fn attributed_line(&self) -> u32 {
        match (self.line, self.loc) {
            (Some(line), _) if line > 0 => line,
            (_, Some(loc)) => loc.start.line,
            _ => self.locations.first().map_or(0, |r| r.start.line),
        }
    }
}

/// Coverage for a single file: static maps plus runtime counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCoverage {
    /// Whether this is a placeholder for a file that was never loaded
    #[serde(default)]
    pub all: bool,
    /// Logical identity of the file
    pub path: String,
    /// Statement ranges keyed by statement id
    #[serde(default)]
    pub statement_map: BTreeMap<u32, Range>,
    /// Function metadata keyed by function id
    #[serde(default)]
    pub fn_map: BTreeMap<u32, Function>,
    /// Branch metadata keyed by branch id
    #[serde(default)]
    pub branch_map: BTreeMap<u32, Branch>,
    /// Statement counters
    #[serde(default)]
    pub s: HitMap,
    /// Function counters
    #[serde(default)]
    pub f: HitMap,
    /// Branch counters, one entry per arm
    #[serde(default)]
    pub b: BranchHitMap,
    /// Branch truthiness counters, present only with logic reporting
    #[serde(rename = "bT", default, skip_serializing_if = "Option::is_none")]
    pub b_t: Option<BranchHitMap>,
    /// Source map handed to the instrumenter, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_source_map: Option<SourceMap>,
}

impl FileCoverage {
    /// An empty record for `path`.
    #[must_use]
    pub fn empty(path: impl Into<String>, report_logic: bool) -> Self {
        Self {
            all: false,
            path: path.into(),
            statement_map: BTreeMap::new(),
            fn_map: BTreeMap::new(),
            branch_map: BTreeMap::new(),
            s: BTreeMap::new(),
            f: BTreeMap::new(),
            b: BTreeMap::new(),
            b_t: report_logic.then(BTreeMap::new),
            input_source_map: None,
        }
    }

    /// Hit counts per source line, derived from statement coverage.
    ///
    /// A line reads the highest counter among the statements whose range
    /// spans it. Lines no statement spans are absent.
    #[must_use]
    pub fn line_coverage(&self) -> HitMap {
        let mut lines = HitMap::new();
        for (id, count) in &self.s {
            let Some(range) = self.statement_map.get(id) else {
                continue;
            };
            for line in range.lines() {
                lines
                    .entry(line)
                    .and_modify(|hits| *hits = (*hits).max(*count))
                    .or_insert(*count);
            }
        }
        lines
    }

    /// Lines that are spanned by statements but were never executed.
    #[must_use]
    pub fn uncovered_lines(&self) -> Vec<u32> {
        self.line_coverage()
            .into_iter()
            .filter_map(|(line, hits)| (hits == 0).then_some(line))
            .collect()
    }

    /// Whether counters use exactly the ids their maps declare.
    #[must_use]
    pub fn counters_match_maps(&self) -> bool {
        self.s.keys().eq(self.statement_map.keys())
            && self.f.keys().eq(self.fn_map.keys())
            && self.b.keys().eq(self.branch_map.keys())
    }

    /// Whether every counter id is declared by the corresponding map.
    #[must_use]
    pub fn counters_within_maps(&self) -> bool {
        self.s.keys().all(|k| self.statement_map.contains_key(k))
            && self.f.keys().all(|k| self.fn_map.contains_key(k))
            && self.b.keys().all(|k| self.branch_map.contains_key(k))
    }

    /// Zero every counter while keeping the maps.
    pub fn reset_hits(&mut self) {
        self.s.values_mut().for_each(|v| *v = 0);
        self.f.values_mut().for_each(|v| *v = 0);
        for arms in self.b.values_mut() {
            arms.iter_mut().for_each(|v| *v = 0);
        }
        if let Some(b_t) = &mut self.b_t {
            for arms in b_t.values_mut() {
                arms.iter_mut().for_each(|v| *v = 0);
            }
        }
    }

    /// Totals and percentages for every dimension.
    #[must_use]
    pub fn to_summary(&self) -> CoverageSummary {
        CoverageSummary {
            lines: simple_totals(&self.line_coverage()),
            statements: simple_totals(&self.s),
            functions: simple_totals(&self.f),
            branches: branch_totals(&self.b),
            branches_true: self.b_t.as_ref().map(branch_totals),
        }
    }
}

fn simple_totals(hits: &HitMap) -> Totals {
    let total = hits.len() as u32;
    let covered = hits.values().filter(|&&v| v > 0).count() as u32;
    Totals {
        total,
        covered,
        skipped: 0,
        pct: percent(covered, total),
    }
}

fn branch_totals(hits: &BranchHitMap) -> Totals {
    let mut totals = Totals::default();
    for arms in hits.values() {
        totals.covered += arms.iter().filter(|&&v| v > 0).count() as u32;
        totals.total += arms.len() as u32;
    }
    totals.pct = percent(totals.covered, totals.total);
    totals
}
