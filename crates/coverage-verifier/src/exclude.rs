//! Exclusion Matcher.
//!
//! Decides from a path string alone whether a file is skipped by the
//! instrumenter. Paths are normalized to forward slashes with drive
//! letters removed, so `C:\p\test\a.js`, `p\test\a.js`, `/home/p/test/a.js`
//! and `p/test/a.js` are judged alike. Patterns use [`glob::Pattern`]
//! syntax extended with brace alternation (`{a,b}`, nestable), which is
//! expanded before compilation.

use glob::{MatchOptions, Pattern};

use crate::result::{VerifyError, VerifyResult};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    alternatives: Vec<Pattern>,
}

/// Compiled set of exclusion globs.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    patterns: Vec<CompiledPattern>,
}

impl ExclusionMatcher {
    /// Compile `patterns`.
    ///
    /// # Errors
    ///
    /// [`VerifyError::InvalidPattern`] for the first pattern that does not
    /// compile.
    pub fn new<I, S>(patterns: I) -> VerifyResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| compile(p.as_ref()))
            .collect::<VerifyResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Whether no patterns are configured
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `path` matches any configured pattern.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.matching_pattern(path).is_some()
    }

    /// The first configured pattern matching `path`, as written.
    pub fn matching_pattern(&self, path: &str) -> Option<&str> {
        let normalized = normalize_path(path);
        let relative = normalized.trim_start_matches('/');
        self.patterns
            .iter()
            .find(|p| {
                p.alternatives.iter().any(|alt| {
                    alt.matches_with(&normalized, MATCH_OPTIONS)
                        || alt.matches_with(relative, MATCH_OPTIONS)
                })
            })
            .map(|p| p.source.as_str())
    }
}

fn compile(source: &str) -> VerifyResult<CompiledPattern> {
    let alternatives = expand_braces(&source.replace('\\', "/"))
        .iter()
        .map(|alt| {
            Pattern::new(&strip_drive(alt)).map_err(|e| VerifyError::InvalidPattern {
                pattern: source.to_string(),
                message: e.to_string(),
            })
        })
        .collect::<VerifyResult<Vec<_>>>()?;
    Ok(CompiledPattern {
        source: source.to_string(),
        alternatives,
    })
}

/// One-shot form of [`ExclusionMatcher::is_excluded`].
pub fn is_excluded<S: AsRef<str>>(path: &str, patterns: &[S]) -> VerifyResult<bool> {
    Ok(ExclusionMatcher::new(patterns)?.is_excluded(path))
}

/// Forward slashes, no drive letter, no empty or `.` segments.
///
/// A path that started at a root keeps a single leading `/`.
pub fn normalize_path(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    let stripped = strip_drive(&slashed);
    let rooted = stripped.starts_with('/');
    let joined = stripped
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    if rooted {
        format!("/{joined}")
    } else {
        joined
    }
}

fn strip_drive(path: &str) -> String {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        path[2..].to_string()
    } else {
        path.to_string()
    }
}

/// Expand brace alternation into plain glob patterns.
///
/// `**/*.{test,spec}.{js,ts}` yields four patterns. Braces inside a
/// character class, and brace groups without a comma, are literal.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some((open, close, alternatives)) = first_brace_group(pattern) else {
        return vec![pattern.to_string()];
    };
    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    alternatives
        .iter()
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{suffix}")))
        .collect()
}

fn first_brace_group(pattern: &str) -> Option<(usize, usize, Vec<&str>)> {
    let bytes = pattern.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = pattern[search_from..].find('{') {
        let open = search_from + offset;
        search_from = open + 1;
        if inside_class(&bytes[..open]) {
            continue;
        }
        let mut depth = 0usize;
        let mut in_class = false;
        let mut parts = Vec::new();
        let mut part_start = open + 1;
        for (i, byte) in bytes.iter().enumerate().skip(open) {
            match byte {
                b'[' if !in_class => in_class = true,
                b']' if in_class => in_class = false,
                b'{' if !in_class => depth += 1,
                b'}' if !in_class => {
                    depth -= 1;
                    if depth == 0 {
                        if !parts.is_empty() {
                            parts.push(&pattern[part_start..i]);
                            return Some((open, i, parts));
                        }
                        break;
                    }
                }
                b',' if depth == 1 && !in_class => {
                    parts.push(&pattern[part_start..i]);
                    part_start = i + 1;
                }
                _ => {}
            }
        }
    }
    None
}

fn inside_class(prefix: &[u8]) -> bool {
    prefix.iter().fold(false, |in_class, byte| match byte {
        b'[' => true,
        b']' => false,
        _ => in_class,
    })
}
