//! Input source map carried through the record untouched.

use serde::{Deserialize, Serialize};

/// A version 3 source map as supplied to the instrumenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceMap {
    /// Source map version, always 3 in practice
    pub version: u32,
    /// Generated file name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Root prepended to every source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    /// Original sources
    pub sources: Vec<String>,
    /// Inline contents of the original sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    /// Symbol names
    pub names: Vec<String>,
    /// VLQ mappings
    pub mappings: String,
}

impl Default for SourceMap {
    fn default() -> Self {
        Self {
            version: 3,
            file: None,
            source_root: None,
            sources: Vec::new(),
            sources_content: None,
            names: Vec::new(),
            mappings: String::new(),
        }
    }
}
