//! Verification engine.
//!
//! Drives one case through `Pending -> Instrumented -> Executed ->
//! Verified | MismatchFailed`, with `Failed` reachable from any step and
//! `Skipped` after instrumentation for generate-only and no-coverage cases.
//!
//! ```text
//! case ──► Instrumenter ──► instrumented code ──┬──► ExecutionSandbox ──► live record
//!                                               │                              │
//!                                               └──► extract::read_initial ────┤
//!                                                                              ▼
//!                                                                DimensionAssertions
//! ```
//!
//! Each case owns its [`ExecutionContext`], so a suite runs every case
//! concurrently without sharing a coverage-global.

use std::collections::BTreeMap;
use std::fmt;

use futures::future::join_all;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn};

use crate::assertion::{AssertionMode, Dimension, DimensionAssertions, DimensionFailure};
use crate::coverage::{BranchHitMap, CoverageSummary, FileCoverage, HitMap, SourceMap};
use crate::extract::{read_debug_coverage_comment, read_initial_coverage};
use crate::instrumenter::{InstrumentError, InstrumentOutput, InstrumentRequest, Instrumenter};
use crate::logging;
use crate::options::{prepare_instrument_options, InstrumentOptions, TestOptions};
use crate::result::VerifyError;
use crate::runtime::ExecutionContext;
use crate::sandbox::{ExecutableUnit, ExecutionMode, ExecutionSandbox};

#[cfg(test)]
mod tests;

/// Expected per-dimension results of one case.
///
/// Absent dimensions expect an empty mapping. Ids may be written as
/// integers or strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Expectations {
    /// Return value of the executed code; absent means `null`
    pub out: Value,
    /// Hits per source line
    #[serde(deserialize_with = "id_map")]
    pub lines: HitMap,
    /// Hits per function id
    #[serde(deserialize_with = "id_map")]
    pub functions: HitMap,
    /// Arm hits per branch id
    #[serde(deserialize_with = "id_map")]
    pub branches: BranchHitMap,
    /// Truthy-arm hits per branch id
    #[serde(deserialize_with = "id_map")]
    pub branches_true: BranchHitMap,
    /// Hits per statement id
    #[serde(deserialize_with = "id_map")]
    pub statements: HitMap,
    /// Source map the record must carry
    pub input_source_map: Option<SourceMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct IdKey(u32);

impl<'de> Deserialize<'de> for IdKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = IdKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer id or its decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<IdKey, E> {
                u32::try_from(v).map(IdKey).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<IdKey, E> {
                u32::try_from(v).map(IdKey).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<IdKey, E> {
                v.trim().parse().map(IdKey).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

fn id_map<'de, D, V>(deserializer: D) -> Result<BTreeMap<u32, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let raw = Option::<BTreeMap<IdKey, V>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k.0, v))
        .collect())
}

/// One verification case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseSpec {
    /// Case name, used in logs and reports
    pub name: String,
    /// Source to instrument
    pub code: String,
    /// Case flags
    pub options: TestOptions,
    /// Free-form instrumenter options
    pub instrument_options: Value,
    /// Source map handed to the instrumenter
    pub input_source_map: Option<SourceMap>,
    /// Arguments passed to the executed code
    pub args: Value,
    /// Expected results
    pub expected: Expectations,
    /// Declared record before execution; when absent the debug comment,
    /// or else the live record with counters zeroed, is used
    pub baseline: Option<Value>,
}

impl CaseSpec {
    /// Case with default options and no expectations
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            options: TestOptions::default(),
            instrument_options: Value::Object(serde_json::Map::new()),
            input_source_map: None,
            args: Value::Array(Vec::new()),
            expected: Expectations::default(),
            baseline: None,
        }
    }

    /// Replace the case flags
    #[must_use]
    pub fn with_options(mut self, options: TestOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the instrumenter options
    #[must_use]
    pub fn with_instrument_options(mut self, options: Value) -> Self {
        self.instrument_options = options;
        self
    }

    /// Replace the arguments
    #[must_use]
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// Replace the expectations
    #[must_use]
    pub fn expecting(mut self, expected: Expectations) -> Self {
        self.expected = expected;
        self
    }

    /// Instrumenter options with verifier defaults and the source map
    /// filled in
    pub fn prepared_options(&self) -> Value {
        let mut options = prepare_instrument_options(&self.instrument_options, self.options.debug);
        if let (Some(map), Value::Object(obj)) = (&self.input_source_map, &mut options) {
            if let Ok(value) = serde_json::to_value(map) {
                obj.insert("inputSourceMap".to_string(), value);
            }
        }
        options
    }
}

/// Why a case stopped after instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Only generation was requested
    GenerateOnly,
    /// Output matched the no-coverage run
    NoCoverage,
    /// An environment guard did not hold
    Guard,
}

/// Lifecycle state of a case.
#[derive(Debug)]
pub enum CaseState {
    /// Not started
    Pending,
    /// Instrumenter produced code
    Instrumented,
    /// Sandbox ran the code
    Executed,
    /// Stopped by an error
    Failed(VerifyError),
    /// Stopped after instrumentation on purpose
    Skipped(SkipReason),
    /// Every dimension matched
    Verified,
    /// At least one dimension disagreed
    MismatchFailed(Vec<DimensionFailure>),
}

impl CaseState {
    /// Short state name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Instrumented => "instrumented",
            Self::Executed => "executed",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
            Self::Verified => "verified",
            Self::MismatchFailed(_) => "mismatch-failed",
        }
    }

    /// Whether no further transition happens
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::Skipped(_) | Self::Verified | Self::MismatchFailed(_)
        )
    }

    /// Whether the case counts as passing
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Verified | Self::Skipped(_))
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one case.
#[derive(Debug)]
pub struct CaseReport {
    /// Case name
    pub name: String,
    /// Final state
    pub state: CaseState,
    /// Names of every state passed through, in order
    pub history: Vec<&'static str>,
    /// Code the instrumenter produced
    pub instrumented_code: Option<String>,
    /// Value the executed code returned
    pub output: Option<Value>,
    /// Totals of the live record
    pub summary: Option<CoverageSummary>,
}

impl CaseReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: CaseState::Pending,
            history: vec![CaseState::Pending.name()],
            instrumented_code: None,
            output: None,
            summary: None,
        }
    }

    pub(crate) fn skipped(name: &str, reason: SkipReason) -> Self {
        Self::new(name).finish(CaseState::Skipped(reason))
    }

    pub(crate) fn failed(name: &str, err: VerifyError) -> Self {
        Self::new(name).finish(CaseState::Failed(err))
    }

    fn transition(&mut self, state: CaseState) {
        debug!(case = %self.name, from = %self.state, to = %state, "case transition");
        self.history.push(state.name());
        self.state = state;
    }

    fn finish(mut self, state: CaseState) -> Self {
        match &state {
            CaseState::Failed(err) => error!(case = %self.name, %err, "case failed"),
            CaseState::MismatchFailed(failures) => {
                for failure in failures {
                    warn!(case = %self.name, %failure, "case mismatch");
                }
            }
            _ => info!(case = %self.name, state = %state, "case finished"),
        }
        self.transition(state);
        self
    }

    /// Whether the case passed
    pub const fn is_success(&self) -> bool {
        self.state.is_success()
    }

    /// Dimension failures of a mismatched case
    pub fn failures(&self) -> &[DimensionFailure] {
        match &self.state {
            CaseState::MismatchFailed(failures) => failures,
            _ => &[],
        }
    }

    /// The first problem as an error, if the case did not pass.
    pub fn into_result(self) -> Result<Self, VerifyError> {
        match self.state {
            CaseState::Failed(err) => Err(err),
            CaseState::MismatchFailed(ref failures) if !failures.is_empty() => {
                Err(failures[0].to_error())
            }
            _ => Ok(self),
        }
    }
}

/// Outcomes of a suite.
#[derive(Debug, Default)]
pub struct SuiteReport {
    /// Reports in case order
    pub reports: Vec<CaseReport>,
}

impl SuiteReport {
    /// Number of passing cases
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    /// Number of failing cases
    pub fn failed(&self) -> usize {
        self.reports.len() - self.passed()
    }

    /// Whether every case passed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Report for the case named `name`
    pub fn get(&self, name: &str) -> Option<&CaseReport> {
        self.reports.iter().find(|r| r.name == name)
    }
}

/// Runs cases through an instrumenter and a sandbox.
#[derive(Debug, Clone)]
pub struct VerificationEngine<I, S> {
    instrumenter: I,
    sandbox: S,
    assertion_mode: AssertionMode,
}

impl<I: Instrumenter, S: ExecutionSandbox> VerificationEngine<I, S> {
    /// Engine collecting every failing dimension
    pub fn new(instrumenter: I, sandbox: S) -> Self {
        Self {
            instrumenter,
            sandbox,
            assertion_mode: AssertionMode::Collect,
        }
    }

    /// Stop comparing at the first failing dimension
    #[must_use]
    pub fn with_assertion_mode(mut self, mode: AssertionMode) -> Self {
        self.assertion_mode = mode;
        self
    }

    /// The instrumenter under test
    pub fn instrumenter(&self) -> &I {
        &self.instrumenter
    }

    /// Verify `case` in a fresh execution context.
    pub async fn verify(&self, case: &CaseSpec) -> CaseReport {
        let raw_options = case.prepared_options();
        let options = match InstrumentOptions::from_value(&raw_options) {
            Ok(options) => options,
            Err(err) => return CaseReport::failed(&case.name, err),
        };
        let mut context = ExecutionContext::new(options.coverage_variable.clone());
        let span = info_span!("verify_case", case = %case.name, slot = %context.slot());
        let run = self.run(case, raw_options, &options, &mut context);
        tracing::Instrument::instrument(run, span).await
    }

    /// Verify every case concurrently, one context each.
    pub async fn verify_suite(&self, cases: &[CaseSpec]) -> SuiteReport {
        let reports = join_all(cases.iter().map(|case| self.verify(case))).await;
        let suite = SuiteReport { reports };
        info!(
            passed = suite.passed(),
            failed = suite.failed(),
            "suite finished"
        );
        suite
    }

    /// Verify `case` in `context`.
    pub async fn verify_in(&self, case: &CaseSpec, context: &mut ExecutionContext) -> CaseReport {
        let raw_options = case.prepared_options();
        match InstrumentOptions::from_value(&raw_options) {
            Ok(options) => self.run(case, raw_options, &options, context).await,
            Err(err) => CaseReport::failed(&case.name, err),
        }
    }

    async fn run(
        &self,
        case: &CaseSpec,
        raw_options: Value,
        options: &InstrumentOptions,
        context: &mut ExecutionContext,
    ) -> CaseReport {
        let mut report = CaseReport::new(&case.name);
        if case.options.debug {
            logging::init(&options.instrument_log);
            debug!(case = %case.name, code = %annotated_code(&case.code), "source");
        }

        let request = InstrumentRequest {
            code: case.code.clone(),
            filename: case.options.file_name().to_string(),
            options: raw_options,
            transform: case.options.transform_options,
        };

        let output = match Instrumenter::instrument(&self.instrumenter, &request) {
            Ok(output) => output,
            Err(err) => return instrumentation_failed(case, report, &err),
        };
        if case.options.expect_error {
            let mut assertions = DimensionAssertions::new();
            assertions.fail(Dimension::InstrumentationOutcome, "an error", "success");
            report.instrumented_code = Some(output.code);
            return report.finish(CaseState::MismatchFailed(assertions.into_failures()));
        }
        if case.options.debug {
            debug!(case = %case.name, code = %annotated_code(&output.code), "instrumented");
        }
        report.instrumented_code = Some(output.code.clone());
        report.transition(CaseState::Instrumented);

        if case.options.generate_only {
            return report.finish(CaseState::Skipped(SkipReason::GenerateOnly));
        }
        if case.options.no_coverage {
            let state = self.compare_without_coverage(case, &request, &output);
            return report.finish(state);
        }

        context.install_baseline();
        let unit = ExecutableUnit::wrap(
            &output.code,
            ExecutionMode::from_async_flag(case.options.is_async),
        );
        let value = match self.sandbox.execute(&unit, &case.args, context).await {
            Ok(value) => value,
            Err(err) => return report.finish(CaseState::Failed(err)),
        };
        report.output = Some(value.clone());
        report.transition(CaseState::Executed);

        let global = context.take_global();
        let path = case.options.file_name();
        let Some(live) = global.get(path) else {
            return report.finish(CaseState::Failed(VerifyError::MissingRecord {
                path: path.to_string(),
            }));
        };
        report.summary = Some(live.to_summary());

        let mut assertions = DimensionAssertions::with_mode(self.assertion_mode);
        compare_live(&mut assertions, &value, live, &case.expected);
        compare_embedded(&mut assertions, case, options, &output.code, live);

        let state = if assertions.all_passed() {
            CaseState::Verified
        } else {
            CaseState::MismatchFailed(assertions.into_failures())
        };
        report.finish(state)
    }

    fn compare_without_coverage(
        &self,
        case: &CaseSpec,
        request: &InstrumentRequest,
        output: &InstrumentOutput,
    ) -> CaseState {
        match self.instrumenter.instrument_without_coverage(request) {
            Ok(reference) => {
                let mut assertions = DimensionAssertions::new();
                assertions.assert_eq(Dimension::NoCoverageOutput, &output.code, &reference.code);
                if assertions.all_passed() {
                    CaseState::Skipped(SkipReason::NoCoverage)
                } else {
                    CaseState::MismatchFailed(assertions.into_failures())
                }
            }
            Err(err) => CaseState::Failed(VerifyError::Instrumentation {
                message: err.to_string(),
                annotated: annotated_code(&case.code),
            }),
        }
    }
}

fn instrumentation_failed(
    case: &CaseSpec,
    report: CaseReport,
    err: &InstrumentError,
) -> CaseReport {
    if case.options.expect_error {
        debug!(case = %case.name, %err, "instrumentation failed as expected");
        return report.finish(CaseState::Verified);
    }
    let annotated = annotated_code(&case.code);
    if !case.options.quiet && !case.options.stops_after_instrumentation() {
        error!(case = %case.name, "Error instrumenting:\n{annotated}");
    }
    report.finish(CaseState::Failed(VerifyError::Instrumentation {
        message: err.to_string(),
        annotated,
    }))
}

fn compare_live(
    assertions: &mut DimensionAssertions,
    output: &Value,
    live: &FileCoverage,
    expected: &Expectations,
) {
    assertions.assert_eq_by(Dimension::Output, output, &expected.out, loose_eq);
    assertions.assert_eq(Dimension::Lines, &live.line_coverage(), &expected.lines);
    assertions.assert_eq(Dimension::Functions, &live.f, &expected.functions);
    assertions.assert_eq(Dimension::Branches, &live.b, &expected.branches);
    let branches_true = live.b_t.clone().unwrap_or_default();
    assertions.assert_eq(Dimension::BranchesTrue, &branches_true, &expected.branches_true);
    assertions.assert_eq(Dimension::Statements, &live.s, &expected.statements);
    assertions.assert_eq(
        Dimension::InputSourceMap,
        &live.input_source_map,
        &expected.input_source_map,
    );
}

fn compare_embedded(
    assertions: &mut DimensionAssertions,
    case: &CaseSpec,
    options: &InstrumentOptions,
    code: &str,
    live: &FileCoverage,
) {
    let initial = match read_initial_coverage(code) {
        Ok(Some(initial)) => initial,
        Ok(None) => {
            assertions.fail(Dimension::CoverageRecord, "an embedded record", "none");
            return;
        }
        Err(err) => {
            assertions.fail(Dimension::CoverageRecord, "a readable record", err.to_string());
            return;
        }
    };

    match baseline(case, code, live) {
        Ok(baseline) => {
            assertions.assert_eq(Dimension::InitialCoverage, &initial.coverage_data, &baseline);
        }
        Err(err) => assertions.fail(Dimension::InitialCoverage, "a baseline", err.to_string()),
    }
    if let Some(file) = &case.options.file {
        assertions.assert_eq(Dimension::CoveragePath, &initial.path, file);
    }
    assertions.assert_eq(
        Dimension::CoverageVariable,
        &initial.gcv,
        &options.coverage_variable,
    );
    assertions.assert_true(
        Dimension::CoverageHash,
        !initial.hash.is_empty(),
        "a non-empty hash",
    );
}

fn baseline(case: &CaseSpec, code: &str, live: &FileCoverage) -> Result<Value, VerifyError> {
    if let Some(declared) = &case.baseline {
        return Ok(declared.clone());
    }
    if let Some(commented) = read_debug_coverage_comment(code)? {
        return Ok(commented);
    }
    let mut zeroed = live.clone();
    zeroed.reset_hits();
    Ok(serde_json::to_value(zeroed)?)
}

/// Deep equality that compares every number by value.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| loose_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Source with right-aligned 1-based line numbers, for error dumps.
pub fn annotated_code(code: &str) -> String {
    code.split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:>6}: {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}
