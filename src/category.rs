use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde_json::Value;
use serde_sarif::sarif::{RunAutomationDetails, Sarif};

use crate::errors::UploadError;

/// Fills in `automationDetails.id` for runs that lack one.
///
/// Runs that already carry an id are left untouched. The id comes from the
/// category override when given, otherwise from the analysis key and the
/// environment description. Returns an updated copy of the document.
pub(crate) fn populate_run_automation_details(
    sarif: &Sarif,
    category: Option<&str>,
    analysis_key: &str,
    environment: Option<&str>,
) -> Result<Sarif> {
    let automation_id = automation_id(category, analysis_key, environment)?;
    let mut updated = sarif.clone();
    for run in &mut updated.runs {
        match run.automation_details.as_mut() {
            Some(details) if details.id.is_some() => {}
            Some(details) => details.id = Some(automation_id.clone()),
            None => {
                run.automation_details = Some(
                    RunAutomationDetails::builder()
                        .id(automation_id.clone())
                        .build(),
                );
            }
        }
    }
    Ok(updated)
}

/// Derives the automation id used to keep unrelated uploads apart.
///
/// A category override wins and is normalized to exactly one trailing slash.
/// The derived form is `analysisKey/` followed by the environment pairs in
/// key order, each rendered `key:value/`; non-string values render `key:/`.
pub(crate) fn automation_id(
    category: Option<&str>,
    analysis_key: &str,
    environment: Option<&str>,
) -> Result<String> {
    if let Some(category) = category {
        return Ok(format!("{}/", category.trim_end_matches('/')));
    }
    let mut id = format!("{analysis_key}/");
    let Some(environment) = environment else {
        return Ok(id);
    };
    let trimmed = environment.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(id);
    }
    let entries: BTreeMap<String, Value> =
        serde_json::from_str(trimmed).context("parse environment description")?;
    for (key, value) in entries {
        id.push_str(&key);
        id.push(':');
        if let Value::String(text) = value {
            id.push_str(&text);
        }
        id.push('/');
    }
    Ok(id)
}

/// Categories already claimed during one logical upload session.
///
/// Owned by the caller and discarded at session end, so unrelated sessions
/// never observe each other's uploads.
#[derive(Debug, Default)]
pub(crate) struct UploadSession {
    seen: BTreeSet<String>,
}

impl UploadSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Enforces at most one result-set document per sanitized category.
///
/// Runs inside a single document may share a category; they are uploaded
/// together and count as one use. A repeat across documents in the same
/// session fails with a duplicate-category error.
pub(crate) fn validate_unique_category(session: &mut UploadSession, sarif: &Sarif) -> Result<()> {
    let mut document_categories: BTreeMap<String, String> = BTreeMap::new();
    for run in &sarif.runs {
        let id = run
            .automation_details
            .as_ref()
            .and_then(|details| details.id.as_deref());
        let key = format!(
            "{}_{}",
            sanitize(id),
            sanitize(Some(run.tool.driver.name.as_str()))
        );
        document_categories
            .entry(key)
            .or_insert_with(|| id.unwrap_or(&run.tool.driver.name).to_string());
    }
    for (key, display) in document_categories {
        if !session.seen.insert(key) {
            return Err(UploadError::DuplicateCategory { category: display }.into());
        }
    }
    Ok(())
}

/// Lowercases and collapses non-alphanumeric runs to a single `_`.
///
/// Lossy on purpose: `abc/def` and `abc_def` map to the same key, so distinct
/// categories can collide. A rare spurious conflict is preferable to silently
/// overwriting unrelated results, so this is not tightened.
fn sanitize(value: Option<&str>) -> String {
    let raw = value.unwrap_or("_");
    let mut sanitized = String::with_capacity(raw.len());
    let mut previous_was_separator = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            sanitized.push(ch.to_ascii_lowercase());
            previous_was_separator = false;
        } else if !previous_was_separator {
            sanitized.push('_');
            previous_was_separator = true;
        }
    }
    sanitized
}
