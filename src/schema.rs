use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use serde_sarif::sarif::Sarif;
use tracing::debug;

use crate::errors::UploadError;

/// Compiled once; the asset is fixed at build time so a compile failure is a
/// packaging bug and is surfaced as a schema violation with an empty pointer.
static SCHEMA_VALIDATOR: LazyLock<std::result::Result<jsonschema::Validator, String>> =
    LazyLock::new(|| {
        let schema = serde_json::from_str(include_str!("assets/sarif-schema.json"))
            .map_err(|err| format!("load result-format schema: {err}"))?;
        jsonschema::validator_for(&schema)
            .map_err(|err| format!("compile result-format schema: {err}"))
    });

/// Validates a result file and returns the parsed document.
///
/// The file must parse as JSON and conform to the structural result-format
/// schema. The error carries a JSON-pointer path to the first violation;
/// valid input produces no output beyond a debug log line.
pub(crate) fn validate_result_file(path: &Path) -> Result<Sarif> {
    let content = fs::read_to_string(path).map_err(|source| UploadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|err| UploadError::SchemaViolation {
            path: path.to_path_buf(),
            pointer: String::new(),
            detail: format!("not valid JSON: {err}"),
        })?;

    let validator =
        SCHEMA_VALIDATOR
            .as_ref()
            .map_err(|detail| UploadError::SchemaViolation {
                path: path.to_path_buf(),
                pointer: String::new(),
                detail: detail.clone(),
            })?;
    if let Some(error) = validator.iter_errors(&value).next() {
        return Err(UploadError::SchemaViolation {
            path: path.to_path_buf(),
            pointer: error.instance_path().to_string(),
            detail: error.to_string(),
        }
        .into());
    }

    let mut deserializer = serde_json::Deserializer::from_str(&content);
    let sarif: Sarif = serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
        UploadError::SchemaViolation {
            path: path.to_path_buf(),
            pointer: err.path().to_string(),
            detail: err.inner().to_string(),
        }
    })?;
    debug!("validated {}", path.display());
    Ok(sarif)
}
