//! Istanbul-compatible coverage record model.
//!
//! A [`FileCoverage`] is synthesised once by the instrumenter, embedded as a
//! literal inside generated code, materialised at first execution and then
//! mutated only through counter increments.

mod builder;
mod file_coverage;
mod range;
pub mod schema;
mod source_map;
mod summary;

pub use builder::SourceCoverage;
pub use file_coverage::{Branch, BranchHitMap, BranchType, FileCoverage, Function, HitMap};
pub use range::{Location, Range};
pub use schema::{coverage_fn_ident, coverage_hash, coverage_magic_value, COVERAGE_MAGIC_KEY};
pub use source_map::SourceMap;
pub use summary::{percent, CoverageSummary, Totals};
