//! Contract with the external source-to-source instrumenter.
//!
//! The verifier never instruments code itself. It calls an [`Instrumenter`]
//! with the source, target file name and free-form options, and judges
//! the generated code. [`ExcludingInstrumenter`] layers the
//! `unstableExclude` behavior over any implementation: excluded files come
//! back as a plain pass-through.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::coverage::SourceMap;
use crate::options::{InstrumentOptions, TransformOptions};
use crate::result::VerifyResult;

/// One instrumentation call.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentRequest {
    /// Original source
    pub code: String,
    /// Target file name, recorded as the coverage path
    pub filename: String,
    /// Instrumenter options as free-form JSON
    pub options: Value,
    /// Module-kind flags
    pub transform: TransformOptions,
}

impl InstrumentRequest {
    /// Request with default transform flags
    pub fn new(code: impl Into<String>, filename: impl Into<String>, options: Value) -> Self {
        Self {
            code: code.into(),
            filename: filename.into(),
            options,
            transform: TransformOptions::default(),
        }
    }

    /// Typed view of the options
    pub fn instrument_options(&self) -> VerifyResult<InstrumentOptions> {
        InstrumentOptions::from_value(&self.options)
    }
}

/// Generated code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentOutput {
    /// Instrumented (or passed-through) code
    pub code: String,
    /// Output source map, if the instrumenter produced one
    pub source_map: Option<SourceMap>,
}

impl InstrumentOutput {
    /// Output carrying only code
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source_map: None,
        }
    }
}

/// The instrumenter rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InstrumentError {
    /// Error text
    pub message: String,
    /// 1-based line of the offending construct
    pub line: Option<u32>,
    /// 0-based column of the offending construct
    pub column: Option<u32>,
}

impl InstrumentError {
    /// Error without a position
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Attach a source position
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

/// Source-to-source coverage instrumenter.
pub trait Instrumenter: Send + Sync {
    /// Instrument `request.code` for `request.filename`.
    fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError>;

    /// Run the same transform with coverage disabled.
    ///
    /// Implementations whose transform does nothing else return the
    /// pass-through form, which is the default.
    fn instrument_without_coverage(
        &self,
        request: &InstrumentRequest,
    ) -> Result<InstrumentOutput, InstrumentError> {
        Ok(InstrumentOutput::code(passthrough(
            &request.code,
            request.transform.is_module(),
        )))
    }
}

impl<T: Instrumenter + ?Sized> Instrumenter for &T {
    fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError> {
        (**self).instrument(request)
    }

    fn instrument_without_coverage(
        &self,
        request: &InstrumentRequest,
    ) -> Result<InstrumentOutput, InstrumentError> {
        (**self).instrument_without_coverage(request)
    }
}

/// Source as emitted by a transform that inserts no probes.
///
/// Module output gains a leading `"use strict";` directive unless one is
/// already there; output always ends in exactly one newline.
pub fn passthrough(code: &str, is_module: bool) -> String {
    let body = code.trim_end_matches(['\n', '\r']);
    let has_directive = body.starts_with("\"use strict\"") || body.starts_with("'use strict'");
    if is_module && !has_directive {
        format!("\"use strict\";\n{body}\n")
    } else {
        format!("{body}\n")
    }
}

/// Applies `unstableExclude` before delegating to the inner instrumenter.
#[derive(Debug, Clone, Default)]
pub struct ExcludingInstrumenter<I> {
    inner: I,
}

impl<I: Instrumenter> ExcludingInstrumenter<I> {
    /// Wrap `inner`
    pub fn new(inner: I) -> Self {
        Self { inner }
    }

    /// The wrapped instrumenter
    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<I: Instrumenter> Instrumenter for ExcludingInstrumenter<I> {
    fn instrument(&self, request: &InstrumentRequest) -> Result<InstrumentOutput, InstrumentError> {
        let options = request
            .instrument_options()
            .map_err(|e| InstrumentError::new(e.to_string()))?;
        let matcher = options
            .exclusion_matcher()
            .map_err(|e| InstrumentError::new(e.to_string()))?;

        if let Some(pattern) = matcher
            .as_ref()
            .and_then(|m| m.matching_pattern(&request.filename))
        {
            info!(file = %request.filename, pattern, "file excluded from instrumentation");
            return self.inner.instrument_without_coverage(request);
        }

        debug!(file = %request.filename, "instrumenting");
        self.inner.instrument(request)
    }

    fn instrument_without_coverage(
        &self,
        request: &InstrumentRequest,
    ) -> Result<InstrumentOutput, InstrumentError> {
        self.inner.instrument_without_coverage(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::has_coverage_markers;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits a probe in front of the code and counts calls.
    #[derive(Default)]
    struct ProbeEverything {
        calls: AtomicUsize,
    }

    impl Instrumenter for ProbeEverything {
        fn instrument(
            &self,
            request: &InstrumentRequest,
        ) -> Result<InstrumentOutput, InstrumentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InstrumentOutput::code(format!(
                "var __coverage__ = {{}};\ncov_1().s[0]++;\n{}",
                request.code
            )))
        }
    }

    #[test]
    fn test_passthrough_forms() {
        assert_eq!(
            passthrough("console.log('hello');", true),
            "\"use strict\";\nconsole.log('hello');\n"
        );
        assert_eq!(passthrough("a();\n\n", false), "a();\n");
        assert_eq!(passthrough("'use strict';\na();", true), "'use strict';\na();\n");
    }

    #[test]
    fn test_excluded_file_is_passed_through() {
        let instrumenter = ExcludingInstrumenter::new(ProbeEverything::default());
        let request = InstrumentRequest::new(
            "console.log('hello');",
            "somepath/file/excluded.js",
            json!({ "unstableExclude": ["somepath/**/excluded.*"] }),
        );
        let output = instrumenter.instrument(&request).unwrap();
        assert_eq!(output.code, "\"use strict\";\nconsole.log('hello');\n");
        assert_eq!(instrumenter.inner().calls.load(Ordering::SeqCst), 0);
        assert!(!has_coverage_markers(&output.code, "__coverage__"));
    }

    #[test]
    fn test_windows_style_path_is_excluded() {
        let instrumenter = ExcludingInstrumenter::new(ProbeEverything::default());
        let request = InstrumentRequest::new(
            "x();",
            r"C:\Users\project\test\file.test.js",
            json!({ "unstableExclude": ["**/*.test.*"] }),
        );
        let output = instrumenter.instrument(&request).unwrap();
        assert!(!has_coverage_markers(&output.code, "__coverage__"));
    }

    #[test]
    fn test_included_file_is_instrumented() {
        let instrumenter = ExcludingInstrumenter::new(ProbeEverything::default());
        let request = InstrumentRequest::new(
            "x();",
            "src/file.js",
            json!({ "unstableExclude": ["**/*.test.*"] }),
        );
        let output = instrumenter.instrument(&request).unwrap();
        assert!(has_coverage_markers(&output.code, "__coverage__"));
        assert_eq!(instrumenter.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_pattern_is_an_instrumentation_error() {
        let instrumenter = ExcludingInstrumenter::new(ProbeEverything::default());
        let request =
            InstrumentRequest::new("x();", "a.js", json!({ "unstableExclude": ["a/***"] }));
        let err = instrumenter.instrument(&request).unwrap_err();
        assert!(err.message.contains("a/***"));
    }

    #[test]
    fn test_instrument_error_position() {
        let err = InstrumentError::new("Unexpected token").at(3, 4);
        assert_eq!((err.line, err.column), (Some(3), Some(4)));
        assert_eq!(err.to_string(), "Unexpected token");
    }
}
