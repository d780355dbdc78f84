//! Coverage Verifier: checks Istanbul-compatible coverage records embedded
//! by a source-to-source JavaScript instrumenter.
//!
//! Instrumented code carries its coverage record as literal bindings inside
//! a generated initializer function. This crate recovers that record from
//! the generated code, runs the code through an external sandbox, and
//! compares the live counters against expectations one dimension at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     Coverage Verifier Architecture                   │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌──────────────┐    ┌────────────────┐           │
//! │   │ Fixture    │    │ Instrumenter │    │ Execution      │           │
//! │   │ (YAML)     │───►│ (external,   │───►│ Sandbox        │           │
//! │   │            │    │  exclusions) │    │ (external)     │           │
//! │   └────────────┘    └──────┬───────┘    └───────┬────────┘           │
//! │                            │ code               │ live record        │
//! │                            ▼                    ▼                    │
//! │   ┌────────────┐    ┌──────────────┐    ┌────────────────┐           │
//! │   │ Parse      │───►│ Extractor +  │───►│ Verification   │           │
//! │   │ (swc,      │    │ Literal      │    │ Engine         │           │
//! │   │  JSX on)   │    │ Reconstructor│    │ (per dimension)│           │
//! │   └────────────┘    └──────────────┘    └────────────────┘           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The instrumenter and the sandbox are traits; this crate ships neither a
//! JavaScript transform nor a JavaScript engine.

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod result;

/// Coverage record model, builder and schema identity
#[allow(clippy::must_use_candidate, clippy::missing_errors_doc)]
pub mod coverage;

/// swc-backed JavaScript parsing
#[allow(clippy::missing_errors_doc)]
pub mod parse;

/// Literal value reconstruction from syntax trees
pub mod literal;

/// Locating and extracting embedded coverage records
#[allow(clippy::missing_errors_doc)]
pub mod extract;

/// Initializer and probe rendering
#[allow(clippy::missing_errors_doc)]
pub mod template;

/// `unstableExclude` glob matching
#[allow(clippy::missing_errors_doc)]
pub mod exclude;

/// Instrumenter and case options
#[allow(clippy::missing_errors_doc, clippy::struct_excessive_bools)]
pub mod options;

/// Per-case execution context and coverage-global
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
pub mod runtime;

/// External instrumenter contract
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
pub mod instrumenter;

/// External execution sandbox contract
#[allow(clippy::must_use_candidate)]
pub mod sandbox;

/// Collecting per-dimension assertions
pub mod assertion;

/// Verification engine and suite runner
#[allow(clippy::must_use_candidate, clippy::missing_errors_doc)]
pub mod verifier;

/// YAML fixture documents
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
pub mod fixture;

/// Tracing subscriber setup
pub mod logging;

pub use assertion::{AssertionMode, Dimension, DimensionAssertions, DimensionFailure};
pub use coverage::{
    BranchHitMap, BranchType, CoverageSummary, FileCoverage, HitMap, Range, SourceCoverage,
    SourceMap,
};
pub use exclude::{is_excluded, ExclusionMatcher};
pub use extract::{read_debug_coverage_comment, read_initial_coverage, InitialCoverage};
pub use fixture::{load_dir, run_fixtures, FixtureDoc, FixtureEntry, GuardRegistry};
pub use instrumenter::{
    passthrough, ExcludingInstrumenter, InstrumentError, InstrumentOutput, InstrumentRequest,
    Instrumenter,
};
pub use literal::{reconstruct, Omission, Reconstructor};
pub use parse::{parse_source, ParseError, ParsedSource};
pub use options::{InstrumentLogOptions, InstrumentOptions, TestOptions, TransformOptions};
pub use result::{VerifyError, VerifyResult};
pub use runtime::{CoverageGlobal, ExecutionContext, InitOutcome};
pub use sandbox::{ExecutableUnit, ExecutionMode, ExecutionSandbox};
pub use verifier::{
    annotated_code, CaseReport, CaseSpec, CaseState, Expectations, SkipReason, SuiteReport,
    VerificationEngine,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        CaseSpec, ExecutionContext, ExecutionSandbox, Expectations, InstrumentError,
        InstrumentOutput, InstrumentRequest, Instrumenter, VerificationEngine, VerifyError,
        VerifyResult,
    };
}
