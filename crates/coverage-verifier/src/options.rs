//! Options handed to the instrumenter and options of a single test case.
//!
//! All structs deserialize from camelCase keys and fall back to defaults
//! for anything absent, so fixture documents only spell out what differs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coverage::SourceMap;
use crate::exclude::ExclusionMatcher;
use crate::result::VerifyResult;
use crate::template::InitializerStyle;

/// Coverage-global name used by instrumenters when none is configured.
pub const DEFAULT_COVERAGE_VARIABLE: &str = "__coverage__";

/// Coverage-global name the verifier uses when a case does not set one.
pub const TESTING_COVERAGE_VARIABLE: &str = "__testing_coverage__";

/// Target file name when a case does not set one.
pub const DEFAULT_FILE_NAME: &str = "unknown";

/// Logging configuration carried inside [`InstrumentOptions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstrumentLogOptions {
    /// `error`, `warn`, `info`, `debug` or `trace`; anything else is off
    pub level: Option<String>,
    /// Emit span enter/close events
    pub enable_trace: bool,
}

/// Options recognized by the instrumenter contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstrumentOptions {
    /// Name of the coverage-global binding
    pub coverage_variable: String,
    /// Single-line output
    pub compact: bool,
    /// Record branch truthiness (`bT`)
    pub report_logic: bool,
    /// Class method names left uninstrumented
    pub ignore_class_methods: Vec<String>,
    /// Source map passed through into the record
    pub input_source_map: Option<SourceMap>,
    /// Instrumenter logging
    pub instrument_log: InstrumentLogOptions,
    /// Append the baseline record as a debug comment
    pub debug_initial_coverage_comment: bool,
    /// Glob patterns of files to pass through uninstrumented
    pub unstable_exclude: Option<Vec<String>>,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            coverage_variable: DEFAULT_COVERAGE_VARIABLE.to_string(),
            compact: false,
            report_logic: false,
            ignore_class_methods: Vec::new(),
            input_source_map: None,
            instrument_log: InstrumentLogOptions::default(),
            debug_initial_coverage_comment: false,
            unstable_exclude: None,
        }
    }
}

impl InstrumentOptions {
    /// Decode from a free-form JSON object.
    pub fn from_value(value: &Value) -> VerifyResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Rendering style for the embedded initializer
    pub fn initializer_style(&self) -> InitializerStyle {
        InitializerStyle {
            compact: self.compact,
            debug_comment: self.debug_initial_coverage_comment,
        }
    }

    /// Compiled `unstableExclude` patterns, if any are configured
    pub fn exclusion_matcher(&self) -> VerifyResult<Option<ExclusionMatcher>> {
        match &self.unstable_exclude {
            Some(patterns) if !patterns.is_empty() => Ok(Some(ExclusionMatcher::new(patterns)?)),
            _ => Ok(None),
        }
    }
}

/// Module-kind flags of the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformOptions {
    /// Treat input as an ES module; unset means module
    pub is_module: Option<bool>,
}

impl TransformOptions {
    /// Effective module flag
    pub fn is_module(&self) -> bool {
        self.is_module.unwrap_or(true)
    }
}

/// Options of one verification case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestOptions {
    /// Target file name
    pub file: Option<String>,
    /// Only instrument; skip execution and coverage checks
    pub generate_only: bool,
    /// Compare against an instrumentation run without coverage
    pub no_coverage: bool,
    /// Execute the instrumented code as an async function
    pub is_async: bool,
    /// Trace-level instrumenter logs and annotated code dumps
    pub debug: bool,
    /// Suppress instrumenter error dumps
    pub quiet: bool,
    /// Instrumentation is expected to fail
    pub expect_error: bool,
    /// Module-kind flags
    pub transform_options: TransformOptions,
}

impl TestOptions {
    /// Target file name, or the default one
    pub fn file_name(&self) -> &str {
        self.file.as_deref().unwrap_or(DEFAULT_FILE_NAME)
    }

    /// Whether the case stops after instrumentation
    pub fn stops_after_instrumentation(&self) -> bool {
        self.generate_only || self.no_coverage
    }
}

/// Fill in verifier defaults on free-form instrumenter options.
///
/// Sets `coverageVariable` to [`TESTING_COVERAGE_VARIABLE`] and turns on
/// the baseline debug comment when either is absent.
/// With `debug`, forces trace logging with span events and pretty output.
pub fn prepare_instrument_options(raw: &Value, debug: bool) -> Value {
    let mut options = match raw {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    options
        .entry("coverageVariable")
        .or_insert_with(|| Value::String(TESTING_COVERAGE_VARIABLE.to_string()));
    options
        .entry("debugInitialCoverageComment")
        .or_insert(Value::Bool(true));
    if debug {
        options.insert(
            "instrumentLog".to_string(),
            serde_json::json!({ "level": "trace", "enableTrace": true }),
        );
        options.insert("compact".to_string(), Value::Bool(false));
    }
    Value::Object(options)
}
