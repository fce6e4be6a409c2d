use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::errors::UploadError;
use crate::payload::UploadPayload;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 1_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Connection settings for the results-ingestion endpoint.
#[derive(Debug, Clone)]
pub(crate) struct ApiConnection {
    pub(crate) endpoint: String,
    pub(crate) token: String,
}

/// Blocking client for the results-ingestion endpoint.
pub(crate) struct Uploader {
    client: Client,
    connection: ApiConnection,
}

impl Uploader {
    pub(crate) fn new(connection: ApiConnection) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        Ok(Self { client, connection })
    }

    /// Submits the payload, retrying transient failures with backoff.
    ///
    /// Returns the opaque identifier the endpoint assigned to the accepted
    /// upload. Non-retryable failures surface immediately with the remote
    /// error detail attached.
    pub(crate) fn upload(&self, payload: &UploadPayload) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.submit(payload) {
                Ok(id) => return Ok(id),
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
                    warn!(
                        "upload attempt {attempt} failed ({err}); retrying in {}ms",
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn submit(&self, payload: &UploadPayload) -> std::result::Result<String, UploadError> {
        debug!("uploading analysis for {}", payload.git_ref);
        let response = self
            .client
            .put(&self.connection.endpoint)
            .bearer_auth(&self.connection.token)
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .map_err(|err| UploadError::Transient {
                status: None,
                detail: err.to_string(),
            })?;
        let status = response.status();
        if status.is_success() {
            let body: serde_json::Value =
                response.json().map_err(|err| UploadError::Transient {
                    status: Some(status.as_u16()),
                    detail: format!("malformed response body: {err}"),
                })?;
            return Ok(body
                .get("id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string());
        }
        let detail = response.text().unwrap_or_default();
        Err(categorize_failure(status, detail))
    }
}

fn categorize_failure(status: StatusCode, detail: String) -> UploadError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UploadError::Auth {
            status: status.as_u16(),
            detail,
        },
        StatusCode::TOO_MANY_REQUESTS => UploadError::RateLimit { detail },
        StatusCode::PAYLOAD_TOO_LARGE => UploadError::PayloadTooLarge { detail },
        status if status.is_client_error() => UploadError::Rejected {
            status: status.as_u16(),
            detail,
        },
        status => UploadError::Transient {
            status: Some(status.as_u16()),
            detail,
        },
    }
}
