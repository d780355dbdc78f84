//! Identity of embedded records: the schema marker, content hashes and the
//! name of the per-file probe function.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};

use super::FileCoverage;
use crate::result::VerifyResult;

/// Property name of the schema-identity marker inside `coverageData`.
pub const COVERAGE_MAGIC_KEY: &str = "_coverageSchema";

/// Property name of the content hash inside `coverageData`.
pub const COVERAGE_HASH_KEY: &str = "hash";

/// Prefix of the generated probe function.
pub const COVERAGE_FN_PREFIX: &str = "cov_";

const SCHEMA_NAME: &str = env!("CARGO_PKG_NAME");
// Major version doubles as schema version.
const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION_MAJOR");

/// Value of the schema-identity marker, stable for the whole process.
pub fn coverage_magic_value() -> &'static str {
    static VALUE: OnceLock<String> = OnceLock::new();
    VALUE.get_or_init(|| {
        let digest = Sha256::digest(format!("{SCHEMA_NAME}@{SCHEMA_VERSION}").as_bytes());
        format!("{digest:x}")
    })
}

/// Whether a marker key/value pair identifies a record of this schema.
#[must_use]
pub fn is_schema_marker(key: &str, value: &str) -> bool {
    key == COVERAGE_MAGIC_KEY && value == coverage_magic_value()
}

/// Content hash of a record, computed over its compact JSON form.
pub fn coverage_hash(coverage: &FileCoverage) -> VerifyResult<String> {
    let bytes = serde_json::to_vec(coverage)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Name of the probe function emitted for `path`, e.g. `cov_1234`.
#[must_use]
pub fn coverage_fn_ident(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    format!("{COVERAGE_FN_PREFIX}{}", u64::from_be_bytes(head))
}
