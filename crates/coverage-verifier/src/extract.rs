//! Embedding Locator & Extractor.
//!
//! Finds the self-describing coverage initializer in instrumented output
//! and rebuilds the record it declares, from the static literal text only.
//! A function is the coverage scope when one of its own `var` declarations
//! is initialized with an object literal carrying the schema-identity
//! marker; the outermost such function wins.

use serde_json::Value;
use swc_core::ecma::ast::{Decl, Expr, Function, Lit, Pat, Program, Prop, PropName, PropOrSpread, Stmt};
use swc_core::ecma::visit::{Visit, VisitWith};
use tracing::debug;

use crate::coverage::schema::{is_schema_marker, COVERAGE_HASH_KEY, COVERAGE_MAGIC_KEY};
use crate::coverage::FileCoverage;
use crate::literal::Reconstructor;
use crate::parse::{parse_source, ParsedSource};
use crate::result::{VerifyError, VerifyResult};

/// Bindings read from the coverage scope, in the order they are checked.
pub const REQUIRED_BINDINGS: [&str; 4] = ["path", "hash", "gcv", "coverageData"];

/// Keys a reconstructed `coverageData` must carry.
pub const REQUIRED_RECORD_KEYS: [&str; 7] = [
    "path",
    "statementMap",
    "fnMap",
    "branchMap",
    "s",
    "f",
    "b",
];

/// Marker opening the optional debug comment that carries the baseline.
pub const DEBUG_COMMENT_PREFIX: &str = "__coverage_data_json_comment__::";

/// Record recovered from instrumented source.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialCoverage {
    /// Path the record was generated for
    pub path: String,
    /// Identity hash of the record
    pub hash: String,
    /// Name of the coverage-global binding
    pub gcv: String,
    /// Record payload with identity fields stripped
    pub coverage_data: Value,
}

impl InitialCoverage {
    /// Decode the payload into a typed record.
    pub fn file_coverage(&self) -> VerifyResult<FileCoverage> {
        Ok(serde_json::from_value(self.coverage_data.clone())?)
    }
}

/// Locate and rebuild the embedded coverage record of `code`.
///
/// Returns `Ok(None)` when no coverage scope exists. A scope missing any
/// required binding, or a payload missing a required key, is an
/// [`VerifyError::IncompleteRecord`].
pub fn read_initial_coverage(code: &str) -> VerifyResult<Option<InitialCoverage>> {
    let parsed = parse_source(code)?;
    let Some(scope) = locate_coverage_scope(parsed.program()) else {
        debug!("no coverage scope in instrumented output");
        return Ok(None);
    };
    let (line, column) = parsed.position(scope.span);
    debug!(line, column, "coverage scope located");
    extract_from_scope(&parsed, &scope).map(Some)
}

/// Outermost function whose own declarations carry the schema marker.
pub fn locate_coverage_scope(program: &Program) -> Option<Function> {
    let mut locator = ScopeLocator { found: None };
    program.visit_with(&mut locator);
    locator.found
}

struct ScopeLocator {
    found: Option<Function>,
}

impl Visit for ScopeLocator {
    fn visit_function(&mut self, function: &Function) {
        if self.found.is_some() {
            return;
        }
        if is_coverage_scope(function) {
            self.found = Some(function.clone());
            return;
        }
        function.visit_children_with(self);
    }
}

fn is_coverage_scope(function: &Function) -> bool {
    direct_declarators(function).any(|(_, init)| match init {
        Expr::Object(object) => object.props.iter().any(is_marker_prop),
        _ => false,
    })
}

fn is_marker_prop(prop: &PropOrSpread) -> bool {
    let PropOrSpread::Prop(prop) = prop else {
        return false;
    };
    let Prop::KeyValue(kv) = &**prop else {
        return false;
    };
    let key: &str = match &kv.key {
        PropName::Ident(ident) => &ident.sym,
        PropName::Str(s) => &s.value,
        _ => return false,
    };
    matches!(&*kv.value, Expr::Lit(Lit::Str(v)) if is_schema_marker(key, &v.value))
}

fn direct_declarators(function: &Function) -> impl Iterator<Item = (&str, &Expr)> {
    function
        .body
        .iter()
        .flat_map(|body| body.stmts.iter())
        .filter_map(|stmt| match stmt {
            Stmt::Decl(Decl::Var(decl)) => Some(decl.decls.iter()),
            _ => None,
        })
        .flatten()
        .filter_map(|declarator| {
            let Pat::Ident(binding) = &declarator.name else {
                return None;
            };
            Some((&*binding.id.sym, declarator.init.as_deref()?))
        })
}

fn extract_from_scope(source: &ParsedSource, scope: &Function) -> VerifyResult<InitialCoverage> {
    let mut reconstructor = Reconstructor::new(source);
    let mut values = Vec::with_capacity(REQUIRED_BINDINGS.len());
    for name in REQUIRED_BINDINGS {
        let init = direct_declarators(scope)
            .find(|(binding, _)| *binding == name)
            .map(|(_, init)| init)
            .ok_or_else(|| incomplete(name))?;
        let value = reconstructor
            .reconstruct(name, init)
            .ok_or_else(|| incomplete(name))?;
        values.push(value);
    }

    let omitted = reconstructor.omissions().len();
    if omitted > 0 {
        debug!(omitted, "coverage scope contained non-literal nodes");
    }

    let mut values = values.into_iter();
    let path = string_binding(values.next(), "path")?;
    let hash = string_binding(values.next(), "hash")?;
    let gcv = string_binding(values.next(), "gcv")?;
    let mut coverage_data = values.next().ok_or_else(|| incomplete("coverageData"))?;

    let Some(record) = coverage_data.as_object_mut() else {
        return Err(incomplete("coverageData"));
    };
    record.retain(|key, _| key != COVERAGE_MAGIC_KEY && key != COVERAGE_HASH_KEY);
    if let Some(key) = REQUIRED_RECORD_KEYS
        .iter()
        .find(|key| !record.contains_key(**key))
    {
        return Err(incomplete(&format!("coverageData.{key}")));
    }

    debug!(path = %path, hash = %hash, gcv = %gcv, "coverage record extracted");
    Ok(InitialCoverage {
        path,
        hash,
        gcv,
        coverage_data,
    })
}

fn string_binding(value: Option<Value>, name: &str) -> VerifyResult<String> {
    match value {
        Some(Value::String(s)) => Ok(s),
        _ => Err(incomplete(name)),
    }
}

fn incomplete(name: &str) -> VerifyError {
    VerifyError::IncompleteRecord {
        missing: name.to_string(),
    }
}

/// Read the baseline record from the debug comment, if the instrumenter
/// emitted one.
pub fn read_debug_coverage_comment(code: &str) -> VerifyResult<Option<Value>> {
    let pattern = format!(r"(?s)/\*{}(.*?)\*/", regex::escape(DEBUG_COMMENT_PREFIX));
    let re = regex::Regex::new(&pattern).map_err(|e| VerifyError::InvalidPattern {
        pattern: pattern.clone(),
        message: e.to_string(),
    })?;
    let Some(captures) = re.captures(code) else {
        return Ok(None);
    };
    let json = captures.get(1).map_or("", |m| m.as_str());
    Ok(Some(serde_json::from_str(json)?))
}

/// Functions in `program` that carry the schema marker, for diagnostics.
pub fn count_coverage_scopes(program: &Program) -> usize {
    struct Counter(usize);
    impl Visit for Counter {
        fn visit_function(&mut self, function: &Function) {
            if is_coverage_scope(function) {
                self.0 += 1;
            }
            function.visit_children_with(self);
        }
    }
    let mut counter = Counter(0);
    program.visit_with(&mut counter);
    counter.0
}
