//! YAML assertion documents.
//!
//! A fixture file holds one or more YAML documents, each describing a piece
//! of code, how to instrument it, and the tests to run against it:
//!
//! ```yaml
//! name: simple if
//! code: |
//!   output = args[0] ? 1 : 2;
//! instrumentOpts:
//!   esModules: false
//! tests:
//!   - name: truthy
//!     args: [true]
//!     out: 1
//!     lines: { 1: 1 }
//!     statements: { '0': 1 }
//! ```
//!
//! A file that fails to parse becomes a single `loaderr` entry so the
//! remaining files still run.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::coverage::SourceMap;
use crate::instrumenter::Instrumenter;
use crate::options::TestOptions;
use crate::result::{VerifyError, VerifyResult};
use crate::sandbox::ExecutionSandbox;
use crate::verifier::{CaseReport, CaseSpec, Expectations, SkipReason, SuiteReport, VerificationEngine};

/// Entry name given to a file that could not be loaded.
pub const LOAD_ERROR_NAME: &str = "loaderr";

/// One test of a fixture document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixtureTest {
    /// Test name
    pub name: Option<String>,
    /// Arguments for the executed code
    pub args: Value,
    /// Everything else is an expectation
    #[serde(flatten)]
    pub expected: Expectations,
}

/// One YAML document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixtureDoc {
    /// File the document came from
    #[serde(skip)]
    pub file: String,
    /// Suite name
    pub name: Option<String>,
    /// Source to instrument
    pub code: String,
    /// Case flags shared by every test
    pub opts: TestOptions,
    /// Free-form instrumenter options; `esModules` sets the module flag
    pub instrument_opts: Value,
    /// Source map handed to the instrumenter
    pub input_source_map: Option<SourceMap>,
    /// Name of an environment precondition
    pub guard: Option<String>,
    /// Tests against the instrumented code
    pub tests: Vec<FixtureTest>,
}

impl FixtureDoc {
    /// `<file>/<name>`, with `suite` for unnamed documents
    pub fn suite_name(&self) -> String {
        format!("{}/{}", self.file, self.name.as_deref().unwrap_or("suite"))
    }

    /// Verification cases, one per test.
    ///
    /// Unset `opts.file` defaults to the fixture file, and an unset module
    /// flag is taken from `instrumentOpts.esModules`.
    pub fn cases(&self) -> Vec<CaseSpec> {
        let mut options = self.opts.clone();
        if options.file.is_none() {
            options.file = Some(self.file.clone());
        }
        if options.transform_options.is_module.is_none() {
            options.transform_options.is_module =
                self.instrument_opts.get("esModules").and_then(Value::as_bool);
        }

        self.tests
            .iter()
            .map(|test| CaseSpec {
                name: format!(
                    "{}/{}",
                    self.suite_name(),
                    test.name.as_deref().unwrap_or("default test")
                ),
                code: self.code.clone(),
                options: options.clone(),
                instrument_options: self.instrument_opts.clone(),
                input_source_map: self.input_source_map.clone(),
                args: if test.args.is_null() {
                    Value::Array(Vec::new())
                } else {
                    test.args.clone()
                },
                expected: test.expected.clone(),
                baseline: None,
            })
            .collect()
    }
}

/// A loaded document or a file that failed to load.
#[derive(Debug, Clone, PartialEq)]
pub enum FixtureEntry {
    /// Parsed document
    Doc(FixtureDoc),
    /// The file could not be parsed
    LoadError {
        /// Fixture file
        file: String,
        /// Parser message
        message: String,
    },
}

impl FixtureEntry {
    /// Display name of the entry
    pub fn name(&self) -> String {
        match self {
            Self::Doc(doc) => doc.suite_name(),
            Self::LoadError { file, .. } => format!("{file}/{LOAD_ERROR_NAME}"),
        }
    }
}

/// Parse every document in `contents`.
///
/// A parse failure keeps the documents read before it and appends a
/// [`FixtureEntry::LoadError`].
pub fn load_str(file: &str, contents: &str) -> Vec<FixtureEntry> {
    let mut entries = Vec::new();
    for document in serde_yaml_ng::Deserializer::from_str(contents) {
        match FixtureDoc::deserialize(document) {
            Ok(mut doc) => {
                doc.file = file.to_string();
                entries.push(FixtureEntry::Doc(doc));
            }
            Err(e) => {
                warn!(file, error = %e, "unable to load fixture");
                entries.push(FixtureEntry::LoadError {
                    file: file.to_string(),
                    message: format!("Unable to load file [{file}]\n{e}"),
                });
                break;
            }
        }
    }
    debug!(file, documents = entries.len(), "fixture loaded");
    entries
}

/// Read and parse one fixture file, named by its file name.
pub fn load_file(path: &Path) -> VerifyResult<Vec<FixtureEntry>> {
    let contents = std::fs::read_to_string(path)?;
    let file = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    Ok(load_str(&file, &contents))
}

/// Load every `.yaml` file in `dir`, in name order.
///
/// With `filter`, only files whose name contains a match of that regular
/// expression are loaded.
pub fn load_dir(dir: &Path, filter: Option<&str>) -> VerifyResult<Vec<FixtureEntry>> {
    let filter = filter
        .map(|f| {
            Regex::new(f).map_err(|e| VerifyError::InvalidPattern {
                pattern: f.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()?;

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let wanted = name.ends_with(".yaml") && filter.as_ref().map_or(true, |re| re.is_match(name));
        if wanted {
            files.push(path);
        }
    }
    files.sort();

    let mut entries = Vec::new();
    for path in files {
        entries.extend(load_file(&path)?);
    }
    info!(dir = %dir.display(), entries = entries.len(), "fixtures loaded");
    Ok(entries)
}

type GuardFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Named environment preconditions.
///
/// A document whose guard is registered and returns `false` is skipped;
/// unknown guards do not skip.
#[derive(Default)]
pub struct GuardRegistry {
    guards: HashMap<String, GuardFn>,
}

impl fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardRegistry")
            .field("guards", &self.guards.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GuardRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `guard` under `name`
    #[must_use]
    pub fn with_guard(mut self, name: impl Into<String>, guard: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.guards.insert(name.into(), Box::new(guard));
        self
    }

    /// Whether a document with `guard` should be skipped
    pub fn should_skip(&self, guard: Option<&str>) -> bool {
        guard
            .and_then(|name| self.guards.get(name))
            .is_some_and(|check| !check())
    }
}

/// Run every fixture entry through `engine`.
///
/// Load errors are reported as failed entries and guarded documents as
/// skipped cases; everything else runs concurrently. Reports follow entry
/// order.
pub async fn run_fixtures<I, S>(
    engine: &VerificationEngine<I, S>,
    entries: &[FixtureEntry],
    guards: &GuardRegistry,
) -> SuiteReport
where
    I: Instrumenter,
    S: ExecutionSandbox,
{
    enum Slot {
        Done(CaseReport),
        Run,
    }

    let mut slots = Vec::new();
    let mut cases = Vec::new();
    for entry in entries {
        match entry {
            FixtureEntry::LoadError { message, .. } => {
                slots.push(Slot::Done(CaseReport::failed(
                    &entry.name(),
                    VerifyError::Fixture {
                        message: message.clone(),
                    },
                )));
            }
            FixtureEntry::Doc(doc) if guards.should_skip(doc.guard.as_deref()) => {
                info!(suite = %doc.suite_name(), guard = ?doc.guard, "[SKIP] guard not satisfied");
                slots.extend(
                    doc.cases()
                        .iter()
                        .map(|case| Slot::Done(CaseReport::skipped(&case.name, SkipReason::Guard))),
                );
            }
            FixtureEntry::Doc(doc) => {
                let doc_cases = doc.cases();
                slots.extend(doc_cases.iter().map(|_| Slot::Run));
                cases.extend(doc_cases);
            }
        }
    }

    let mut ran = engine.verify_suite(&cases).await.reports.into_iter();
    let reports = slots
        .into_iter()
        .filter_map(|slot| match slot {
            Slot::Done(report) => Some(report),
            Slot::Run => ran.next(),
        })
        .collect();
    SuiteReport { reports }
}
