//! Text of the embedded initializer and of the probe expressions.
//!
//! The initializer declares `path`, `hash`, `gcv` and `coverageData` as
//! literal bindings, registers the record under the coverage-global on its
//! first call, keeps an already registered record whose hash matches, and
//! replaces one whose hash differs. After the first call the function
//! rebinds itself to a closure returning the live record.

use serde_json::Value;

use crate::coverage::schema::{
    coverage_fn_ident, coverage_hash, coverage_magic_value, COVERAGE_FN_PREFIX, COVERAGE_HASH_KEY,
    COVERAGE_MAGIC_KEY,
};
use crate::coverage::FileCoverage;
use crate::extract::DEBUG_COMMENT_PREFIX;
use crate::result::VerifyResult;

/// Formatting of the rendered initializer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitializerStyle {
    /// Emit everything on one line
    pub compact: bool,
    /// Append the baseline as a debug comment
    pub debug_comment: bool,
}

impl InitializerStyle {
    /// Multi-line output
    pub const fn pretty() -> Self {
        Self {
            compact: false,
            debug_comment: false,
        }
    }

    /// Single-line output
    pub const fn compact() -> Self {
        Self {
            compact: true,
            debug_comment: false,
        }
    }

    /// Also append the debug comment
    pub const fn with_debug_comment(mut self) -> Self {
        self.debug_comment = true;
        self
    }
}

/// Render the initializer function for `record`, followed by a call to it.
pub fn render_initializer(
    record: &FileCoverage,
    gcv: &str,
    style: InitializerStyle,
) -> VerifyResult<String> {
    let ident = coverage_fn_ident(&record.path);
    let hash = coverage_hash(record)?;
    let baseline = serde_json::to_value(record)?;

    let mut data = baseline.clone();
    if let Value::Object(map) = &mut data {
        map.insert(
            COVERAGE_MAGIC_KEY.to_string(),
            Value::String(coverage_magic_value().to_string()),
        );
        map.insert(COVERAGE_HASH_KEY.to_string(), Value::String(hash.clone()));
    }

    let data = if style.compact {
        serde_json::to_string(&data)?
    } else {
        serde_json::to_string_pretty(&data)?
    };
    let path = serde_json::to_string(&record.path)?;
    let hash = serde_json::to_string(&hash)?;
    let gcv = serde_json::to_string(gcv)?;

    let lines = [
        format!("function {ident}() {{"),
        format!("var path = {path};"),
        format!("var hash = {hash};"),
        "var global = new ((function () {}).constructor)(\"return this\")();".to_string(),
        format!("var gcv = {gcv};"),
        format!("var coverageData = {data};"),
        "var coverage = global[gcv] || (global[gcv] = {});".to_string(),
        "if (!coverage[path] || coverage[path].hash !== hash) {".to_string(),
        "coverage[path] = coverageData;".to_string(),
        "}".to_string(),
        "var actualCoverage = coverage[path];".to_string(),
        "{".to_string(),
        format!("{ident} = function () {{"),
        "return actualCoverage;".to_string(),
        "};".to_string(),
        "}".to_string(),
        "return actualCoverage;".to_string(),
        "}".to_string(),
        format!("{ident}();"),
    ];

    let mut out = if style.compact {
        lines.join("")
    } else {
        indent(&lines)
    };

    if style.debug_comment {
        out.push_str(&debug_comment(&baseline)?);
    }
    Ok(out)
}

fn indent(lines: &[String]) -> String {
    let mut depth = 0usize;
    let mut out = String::new();
    for line in lines {
        if line.starts_with('}') {
            depth = depth.saturating_sub(1);
        }
        for (i, part) in line.lines().enumerate() {
            out.push_str(&"  ".repeat(depth));
            if i > 0 {
                out.push_str("  ");
            }
            out.push_str(part);
            out.push('\n');
        }
        if line.ends_with('{') {
            depth += 1;
        }
    }
    out
}

/// `/*__coverage_data_json_comment__::{json}*/` for a baseline record.
pub fn debug_comment(baseline: &Value) -> VerifyResult<String> {
    // `\/` is a valid JSON escape and keeps the comment closed
    let json = serde_json::to_string(baseline)?.replace("*/", "*\\/");
    Ok(format!("/*{DEBUG_COMMENT_PREFIX}{json}*/"))
}

/// `cov_<n>().s[<id>]++`
pub fn statement_probe(fn_ident: &str, id: u32) -> String {
    format!("{fn_ident}().s[{id}]++")
}

/// `cov_<n>().f[<id>]++`
pub fn function_probe(fn_ident: &str, id: u32) -> String {
    format!("{fn_ident}().f[{id}]++")
}

/// `cov_<n>().b[<id>][<arm>]++`
pub fn branch_probe(fn_ident: &str, id: u32, arm: u32) -> String {
    format!("{fn_ident}().b[{id}][{arm}]++")
}

/// `cov_<n>().bT[<id>][<arm>]++`
pub fn branch_true_probe(fn_ident: &str, id: u32, arm: u32) -> String {
    format!("{fn_ident}().bT[{id}][{arm}]++")
}

/// Whether `code` contains a probe call or a reference to `gcv`.
pub fn has_coverage_markers(code: &str, gcv: &str) -> bool {
    let has_probe = code.match_indices(COVERAGE_FN_PREFIX).any(|(at, _)| {
        let rest = &code[at + COVERAGE_FN_PREFIX.len()..];
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        digits > 0 && rest[digits..].starts_with("()")
    });
    has_probe || (!gcv.is_empty() && code.contains(gcv)) || code.contains(COVERAGE_MAGIC_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{BranchType, Range, SourceCoverage};

    fn record() -> FileCoverage {
        let mut cov = SourceCoverage::new("/src/a.js", false);
        cov.new_statement(Range::new(1, 0, 1, 20));
        let b = cov.new_branch(BranchType::If, Range::new(1, 0, 1, 20));
        cov.add_branch_path(b, Range::new(1, 0, 1, 20));
        cov.into_coverage()
    }

    #[test]
    fn test_pretty_initializer_shape() {
        let out = render_initializer(&record(), "__coverage__", InitializerStyle::pretty()).unwrap();
        let ident = coverage_fn_ident("/src/a.js");
        assert!(out.starts_with(&format!("function {ident}() {{\n  var path = \"/src/a.js\";")));
        assert!(out.contains("var gcv = \"__coverage__\";"));
        assert!(out.contains("coverage[path].hash !== hash"));
        assert!(out.contains(coverage_magic_value()));
        assert!(out.trim_end().ends_with(&format!("{ident}();")));
    }

    #[test]
    fn test_compact_initializer_is_single_line() {
        let out =
            render_initializer(&record(), "__coverage__", InitializerStyle::compact()).unwrap();
        assert!(!out.contains('\n'));
    }

    #[test]
    fn test_debug_comment_escapes_comment_terminator() {
        let comment = debug_comment(&serde_json::json!({ "path": "a*/b.js" })).unwrap();
        assert_eq!(
            comment,
            "/*__coverage_data_json_comment__::{\"path\":\"a*\\/b.js\"}*/"
        );
    }

    #[test]
    fn test_probe_expressions() {
        assert_eq!(statement_probe("cov_7", 3), "cov_7().s[3]++");
        assert_eq!(function_probe("cov_7", 0), "cov_7().f[0]++");
        assert_eq!(branch_probe("cov_7", 1, 2), "cov_7().b[1][2]++");
        assert_eq!(branch_true_probe("cov_7", 1, 0), "cov_7().bT[1][0]++");
    }

    #[test]
    fn test_marker_detection() {
        assert!(has_coverage_markers("cov_123().s[0]++;", "__coverage__"));
        assert!(has_coverage_markers("global.__coverage__", "__coverage__"));
        assert!(!has_coverage_markers(
            "\"use strict\";\nconsole.log('hello');\n",
            "__coverage__"
        ));
        assert!(!has_coverage_markers("var cov_x = 1;", "__coverage__"));
    }

    #[test]
    fn test_empty_coverage_variable_matches_nothing() {
        assert!(!has_coverage_markers("console.log('hello');", ""));
        assert!(has_coverage_markers("cov_1().s[0]++;", ""));
    }
}
