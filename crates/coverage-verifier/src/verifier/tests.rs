use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use regex::Regex;
use serde_json::json;

use super::*;
use crate::coverage::{coverage_fn_ident, BranchType, Range, SourceCoverage};
use crate::instrumenter::{passthrough, ExcludingInstrumenter};
use crate::result::VerifyResult;
use crate::template::{branch_probe, branch_true_probe, function_probe, render_initializer, statement_probe};

/// One statement per non-empty line, a function per `function` line and a
/// logical branch per `||` line.
#[derive(Debug, Default)]
struct LineInstrumenter;

impl Instrumenter for LineInstrumenter {
    fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError> {
        if let Some(line) = request.code.lines().position(|l| l.contains("@@")) {
            return Err(InstrumentError::new("Unexpected token `@`").at(line as u32 + 1, 0));
        }
        let options = request
            .instrument_options()
            .map_err(|e| InstrumentError::new(e.to_string()))?;
        let ident = coverage_fn_ident(&request.filename);
        let mut cov = SourceCoverage::new(&request.filename, options.report_logic);
        if let Some(map) = options.input_source_map.clone() {
            cov.set_input_source_map(map);
        }

        let mut body = Vec::new();
        for (i, text) in request.code.lines().enumerate() {
            let line = i as u32 + 1;
            let end = text.len() as u32;
            if text.trim().is_empty() {
                body.push(text.to_string());
                continue;
            }
            let mut probes = vec![statement_probe(
                &ident,
                cov.new_statement(Range::new(line, 0, line, end)),
            )];
            if text.trim_start().starts_with("function") {
                let range = Range::new(line, 0, line, end);
                probes.push(function_probe(&ident, cov.new_function(None, range, range)));
            }
            if text.contains("||") {
                let b = cov.new_branch(BranchType::BinaryExpr, Range::new(line, 0, line, end));
                cov.add_branch_path(b, Range::new(line, 0, line, 1));
                cov.add_branch_path(b, Range::new(line, 2, line, 3));
                probes.push(branch_probe(&ident, b, 0));
                if options.report_logic {
                    probes.push(branch_true_probe(&ident, b, 0));
                }
            }
            body.push(format!("{}; {text}", probes.join(", ")));
        }

        let record = cov.into_coverage();
        let initializer = render_initializer(&record, &options.coverage_variable, options.initializer_style())
            .map_err(|e| InstrumentError::new(e.to_string()))?;
        Ok(InstrumentOutput::code(format!("{initializer}\n{}\n", body.join("\n"))))
    }
}

/// Registers the embedded record and fires every probe in the body once.
#[derive(Debug)]
struct ReplaySandbox {
    output: Value,
    calls: AtomicUsize,
}

impl ReplaySandbox {
    fn returning(output: Value) -> Self {
        Self {
            output,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExecutionSandbox for ReplaySandbox {
    async fn execute(
        &self,
        unit: &ExecutableUnit,
        _args: &Value,
        context: &mut ExecutionContext,
    ) -> VerifyResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if unit.body.contains("throw ") {
            return Err(VerifyError::Execution {
                message: "Uncaught Error: boom".to_string(),
            });
        }
        let Some(initial) = read_initial_coverage(&unit.body)? else {
            return Ok(self.output.clone());
        };
        let path = initial.path.clone();
        context.global_mut().initialize(&initial)?;

        let probe = Regex::new(r"cov_\d+\(\)\.(bT|s|f|b)\[(\d+)\](?:\[(\d+)\])?\+\+").unwrap();
        for caps in probe.captures_iter(&unit.body) {
            let id: u32 = caps[2].parse().unwrap();
            let arm: usize = caps.get(3).map_or(0, |m| m.as_str().parse().unwrap());
            let global = context.global_mut();
            match &caps[1] {
                "s" => global.hit_statement(&path, id)?,
                "f" => global.hit_function(&path, id)?,
                "b" => global.hit_branch(&path, id, arm)?,
                _ => global.hit_branch_true(&path, id, arm)?,
            }
        }
        Ok(self.output.clone())
    }
}

/// Emits code without any coverage.
struct BareInstrumenter;

impl Instrumenter for BareInstrumenter {
    fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError> {
        Ok(InstrumentOutput::code(passthrough(&request.code, true)))
    }
}

fn engine(output: Value) -> VerificationEngine<LineInstrumenter, ReplaySandbox> {
    VerificationEngine::new(LineInstrumenter, ReplaySandbox::returning(output))
}

fn two_line_case() -> CaseSpec {
    CaseSpec::new("straight line", "var x = args[0];\noutput = x + 1;").expecting(Expectations {
        out: json!(2),
        lines: [(1, 1), (2, 1)].into(),
        statements: [(0, 1), (1, 1)].into(),
        ..Expectations::default()
    })
}

fn options(f: impl FnOnce(&mut TestOptions)) -> TestOptions {
    let mut options = TestOptions::default();
    f(&mut options);
    options
}

#[tokio::test]
async fn test_matching_case_is_verified() {
    let report = engine(json!(2)).verify(&two_line_case()).await;
    assert!(matches!(report.state, CaseState::Verified), "{:?}", report.state);
    assert_eq!(
        report.history,
        vec!["pending", "instrumented", "executed", "verified"]
    );
    let summary = report.summary.unwrap();
    assert_eq!(summary.statements.covered, 2);
    assert!(report.instrumented_code.unwrap().contains("__testing_coverage__"));
}

#[tokio::test]
async fn test_every_failing_dimension_is_reported() {
    let mut case = two_line_case();
    case.expected.statements = [(0, 1), (1, 2)].into();
    let report = engine(json!(3)).verify(&case).await;
    let dimensions: Vec<_> = report.failures().iter().map(|f| f.dimension.label()).collect();
    assert_eq!(dimensions, vec!["Output", "Statement coverage"]);
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_fail_fast_reports_first_dimension_only() {
    let mut case = two_line_case();
    case.expected.statements = [(0, 1), (1, 2)].into();
    let report = engine(json!(3))
        .with_assertion_mode(AssertionMode::FailFast)
        .verify(&case)
        .await;
    assert_eq!(report.failures().len(), 1);
    let err = report.into_result().unwrap_err();
    assert_eq!(err.dimension(), Some("Output"));
}

#[tokio::test]
async fn test_output_compares_numbers_by_value() {
    let mut case = two_line_case();
    case.expected.out = json!(2.0);
    let report = engine(json!(2)).verify(&case).await;
    assert!(report.is_success());
}

#[tokio::test]
async fn test_functions_branches_and_truthiness() {
    let case = CaseSpec::new("logic", "function f() {}\nvar y = a || b;")
        .with_instrument_options(json!({ "reportLogic": true }))
        .expecting(Expectations {
            lines: [(1, 1), (2, 1)].into(),
            statements: [(0, 1), (1, 1)].into(),
            functions: [(0, 1)].into(),
            branches: [(0, vec![1, 0])].into(),
            branches_true: [(0, vec![1, 0])].into(),
            ..Expectations::default()
        });
    let report = engine(Value::Null).verify(&case).await;
    assert!(report.is_success(), "{:?}", report.state);
}

#[tokio::test]
async fn test_instrumentation_error_carries_annotated_source() {
    let case = CaseSpec::new("bad", "var a = 1;\nvar b = @@;");
    let report = engine(Value::Null).verify(&case).await;
    let CaseState::Failed(VerifyError::Instrumentation { message, annotated }) = &report.state else {
        panic!("expected instrumentation failure, got {:?}", report.state);
    };
    assert!(message.contains("Unexpected token"));
    assert_eq!(annotated, "     1: var a = 1;\n     2: var b = @@;");
    assert_eq!(report.history, vec!["pending", "failed"]);
}

#[tokio::test]
async fn test_expected_instrumentation_error() {
    let failing = CaseSpec::new("bad", "@@").with_options(options(|o| o.expect_error = true));
    let report = engine(Value::Null).verify(&failing).await;
    assert!(matches!(report.state, CaseState::Verified));

    let succeeding = CaseSpec::new("good", "a();").with_options(options(|o| o.expect_error = true));
    let report = engine(Value::Null).verify(&succeeding).await;
    assert_eq!(
        report.failures()[0].dimension,
        Dimension::InstrumentationOutcome
    );
}

#[tokio::test]
async fn test_generate_only_never_executes() {
    let engine = engine(Value::Null);
    let case = two_line_case().with_options(options(|o| o.generate_only = true));
    let report = engine.verify(&case).await;
    assert!(matches!(report.state, CaseState::Skipped(SkipReason::GenerateOnly)));
    assert!(report.instrumented_code.is_some());
    assert_eq!(engine.sandbox.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_coverage_matches_excluded_passthrough() {
    let engine = VerificationEngine::new(
        ExcludingInstrumenter::new(LineInstrumenter),
        ReplaySandbox::returning(Value::Null),
    );
    let excluded = CaseSpec::new("excluded", "console.log('hello');")
        .with_options(options(|o| {
            o.no_coverage = true;
            o.file = Some("somepath/file/excluded.js".to_string());
        }))
        .with_instrument_options(json!({ "unstableExclude": ["somepath/**/excluded.*"] }));
    let report = engine.verify(&excluded).await;
    assert!(matches!(report.state, CaseState::Skipped(SkipReason::NoCoverage)), "{:?}", report.state);
    assert_eq!(
        report.instrumented_code.as_deref(),
        Some("\"use strict\";\nconsole.log('hello');\n")
    );

    let included = CaseSpec::new("included", "console.log('hello');")
        .with_options(options(|o| o.no_coverage = true));
    let report = engine.verify(&included).await;
    assert_eq!(report.failures()[0].dimension, Dimension::NoCoverageOutput);
}

#[tokio::test]
async fn test_missing_live_record() {
    let engine = VerificationEngine::new(BareInstrumenter, ReplaySandbox::returning(Value::Null));
    let report = engine.verify(&CaseSpec::new("bare", "a();")).await;
    let CaseState::Failed(err) = &report.state else {
        panic!("expected failure, got {:?}", report.state);
    };
    assert_eq!(err.to_string(), "No coverage found for [unknown]");
}

#[tokio::test]
async fn test_execution_error_fails_case() {
    let report = engine(Value::Null)
        .verify(&CaseSpec::new("throws", "throw new Error('boom');"))
        .await;
    assert!(matches!(report.state, CaseState::Failed(VerifyError::Execution { .. })));
    assert_eq!(report.history, vec!["pending", "instrumented", "failed"]);
}

#[tokio::test]
async fn test_embedded_identity_checks() {
    let case = CaseSpec::new("named", "a();")
        .with_options(options(|o| o.file = Some("/src/named.js".to_string())))
        .with_instrument_options(json!({ "coverageVariable": "__cov__" }))
        .expecting(Expectations {
            lines: [(1, 1)].into(),
            statements: [(0, 1)].into(),
            ..Expectations::default()
        });
    let report = engine(Value::Null).verify(&case).await;
    assert!(report.is_success(), "{:?}", report.state);
    assert!(report.instrumented_code.unwrap().contains("\"__cov__\""));
}

#[tokio::test]
async fn test_declared_baseline_mismatch() {
    let mut case = two_line_case();
    case.baseline = Some(json!({ "path": "elsewhere.js" }));
    let report = engine(json!(2)).verify(&case).await;
    assert_eq!(
        report.failures().iter().map(|f| f.dimension).collect::<Vec<_>>(),
        vec![Dimension::InitialCoverage]
    );
}

#[tokio::test]
async fn test_baseline_without_debug_comment() {
    let case = two_line_case()
        .with_instrument_options(json!({ "debugInitialCoverageComment": false, "compact": true }));
    let report = engine(json!(2)).verify(&case).await;
    assert!(report.is_success(), "{:?}", report.state);
    assert!(!report
        .instrumented_code
        .unwrap()
        .contains("__coverage_data_json_comment__"));
}

#[tokio::test]
async fn test_input_source_map_passes_through() {
    let map = SourceMap {
        sources: vec!["a.ts".to_string()],
        mappings: "AAAA".to_string(),
        ..SourceMap::default()
    };
    let mut case = two_line_case();
    case.input_source_map = Some(map.clone());
    case.expected.input_source_map = Some(map);
    let report = engine(json!(2)).verify(&case).await;
    assert!(report.is_success(), "{:?}", report.state);

    let mut missing = two_line_case();
    missing.expected.input_source_map = Some(SourceMap::default());
    let report = engine(json!(2)).verify(&missing).await;
    assert_eq!(report.failures()[0].dimension, Dimension::InputSourceMap);
}

#[tokio::test]
async fn test_suite_runs_cases_independently() {
    let engine = engine(json!(2));
    let mut wrong = two_line_case();
    wrong.name = "wrong".to_string();
    wrong.expected.out = json!(5);
    let cases = vec![two_line_case(), wrong, two_line_case()];
    let suite = engine.verify_suite(&cases).await;
    assert_eq!(suite.passed(), 2);
    assert_eq!(suite.failed(), 1);
    assert!(!suite.get("wrong").unwrap().is_success());
    assert_eq!(engine.sandbox.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_explicit_context_is_reused_cleanly() {
    let engine = engine(json!(2));
    let mut context = ExecutionContext::new("__testing_coverage__");
    let first = engine.verify_in(&two_line_case(), &mut context).await;
    let second = engine.verify_in(&two_line_case(), &mut context).await;
    assert!(first.is_success());
    assert!(second.is_success(), "{:?}", second.state);
}

#[test]
fn test_expectations_accept_string_and_integer_ids() {
    let expected: Expectations = serde_yaml_ng::from_str(
        "out: 3\nlines:\n  1: 1\n  '2': 0\nbranches:\n  '0': [1, 0]\nstatements: ~\n",
    )
    .unwrap();
    assert_eq!(expected.out, json!(3));
    assert_eq!(expected.lines, [(1, 1), (2, 0)].into());
    assert_eq!(expected.branches, [(0, vec![1, 0])].into());
    assert!(expected.statements.is_empty());
    assert!(expected.functions.is_empty());

    let from_json: Expectations =
        serde_json::from_value(json!({ "functions": { "0": 2 } })).unwrap();
    assert_eq!(from_json.functions, [(0, 2)].into());
    assert!(serde_json::from_value::<Expectations>(json!({ "lines": { "x": 1 } })).is_err());
}

#[test]
fn test_loose_equality() {
    assert!(loose_eq(&json!({ "a": [1, 2.0] }), &json!({ "a": [1.0, 2] })));
    assert!(!loose_eq(&json!({ "a": 1 }), &json!({ "a": 1, "b": 2 })));
    assert!(!loose_eq(&json!("1"), &json!(1)));
    assert!(loose_eq(&Value::Null, &Value::Null));
}

#[test]
fn test_annotated_code_numbers_lines() {
    assert_eq!(annotated_code("a\nb"), "     1: a\n     2: b");
    assert_eq!(annotated_code(""), "     1: ");
}

#[test]
fn test_prepared_options_carry_source_map() {
    let mut case = CaseSpec::new("c", "a();");
    case.input_source_map = Some(SourceMap::default());
    let prepared = case.prepared_options();
    assert_eq!(prepared["inputSourceMap"]["version"], json!(3));
    assert_eq!(prepared["coverageVariable"], json!("__testing_coverage__"));
}

/// Counts calls before delegating to [`LineInstrumenter`].
#[derive(Debug, Default)]
struct CountingInstrumenter {
    calls: AtomicUsize,
}

impl Instrumenter for CountingInstrumenter {
    fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LineInstrumenter.instrument(request)
    }
}

#[tokio::test]
async fn test_verify_runs_the_instrumenter_once() {
    let engine = VerificationEngine::new(
        CountingInstrumenter::default(),
        ReplaySandbox::returning(json!(2)),
    );
    let report = engine.verify(&two_line_case()).await;
    assert!(report.is_success(), "{:?}", report.state);
    assert_eq!(engine.instrumenter().calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.sandbox.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_undecodable_options_fail_before_instrumenting() {
    let engine = VerificationEngine::new(
        CountingInstrumenter::default(),
        ReplaySandbox::returning(Value::Null),
    );
    let case = two_line_case().with_instrument_options(json!({ "compact": "yes" }));
    let report = engine.verify(&case).await;
    assert!(matches!(report.state, CaseState::Failed(VerifyError::Json(_))), "{:?}", report.state);
    assert_eq!(report.history, vec!["pending", "failed"]);
    assert_eq!(engine.instrumenter().calls.load(Ordering::SeqCst), 0);

    let mut context = ExecutionContext::new("__testing_coverage__");
    let report = engine.verify_in(&case, &mut context).await;
    assert!(matches!(report.state, CaseState::Failed(VerifyError::Json(_))));
}
