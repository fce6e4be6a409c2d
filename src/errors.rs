use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the upload pipeline.
///
/// Schema and duplicate-category failures are fatal to the upload attempt and
/// propagate to the caller unmodified. Only rate-limit and transient-network
/// failures are worth retrying.
#[derive(Debug, Error)]
pub(crate) enum UploadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: SARIF schema violation at `{pointer}`: {detail}")]
    SchemaViolation {
        path: PathBuf,
        pointer: String,
        detail: String,
    },
    #[error(
        "aborting upload: only one result set per category is allowed per upload session, \
         and category \"{category}\" was already used"
    )]
    DuplicateCategory { category: String },
    #[error("authentication failed (HTTP {status}): {detail}")]
    Auth { status: u16, detail: String },
    #[error("rate limited by the code-scanning endpoint: {detail}")]
    RateLimit { detail: String },
    #[error("payload too large for the code-scanning endpoint: {detail}")]
    PayloadTooLarge { detail: String },
    #[error("upload rejected by the code-scanning endpoint (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("transient network failure while uploading{}: {detail}", status_suffix(.status))]
    Transient { status: Option<u16>, detail: String },
}

impl UploadError {
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::RateLimit { .. } | UploadError::Transient { .. }
        )
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!(" (HTTP {status})"),
        None => String::new(),
    }
}
