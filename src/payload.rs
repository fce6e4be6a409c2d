use std::collections::BTreeSet;
use std::io::Write;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_sarif::sarif::Sarif;

/// Flavor of the results-ingestion endpoint being targeted.
///
/// Hosted deployments and enterprise releases from 3.1.0 onwards accept the
/// pull-request base fields; older enterprise releases reject unknown fields,
/// so the payload omits them entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApiTarget {
    Hosted,
    Enterprise { version: String },
}

impl ApiTarget {
    pub(crate) fn supports_pull_request_base(&self) -> bool {
        match self {
            ApiTarget::Hosted => true,
            ApiTarget::Enterprise { version } => version_at_least(version, (3, 1, 0)),
        }
    }
}

fn version_at_least(version: &str, minimum: (u64, u64, u64)) -> bool {
    let core = version.trim().trim_start_matches('v');
    let core = core.split(['-', '+']).next().unwrap_or(core);
    let mut parts = core.split('.');
    let mut component = |index: usize| -> Option<u64> {
        match parts.next() {
            Some(part) => part.parse().ok(),
            None if index > 0 => Some(0),
            None => None,
        }
    };
    let (Some(major), Some(minor), Some(patch)) = (component(0), component(1), component(2))
    else {
        return false;
    };
    (major, minor, patch) >= minimum
}

/// Base branch information for a pull-request analysis.
#[derive(Debug, Clone)]
pub(crate) enum PullRequestBase {
    /// Analysis ran on the synthetic merge commit; the base is the merge-base
    /// between the head and base branches.
    MergeRef {
        base_ref: String,
        merge_base_sha: String,
    },
    /// Analysis ran on the head commit; the base comes straight from the
    /// event payload.
    HeadRef { base_ref: String, base_sha: String },
}

/// Pull-request event metadata as written by the CI runner.
#[derive(Debug, Deserialize)]
pub(crate) struct PullRequestEvent {
    pub(crate) pull_request: PullRequestDetails,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PullRequestDetails {
    pub(crate) base: BranchRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchRef {
    #[serde(rename = "ref")]
    pub(crate) name: String,
    pub(crate) sha: String,
}

fn is_merge_ref(git_ref: &str) -> bool {
    git_ref.starts_with("refs/pull/") && git_ref.ends_with("/merge")
}

/// Picks the base branch fields for a pull-request analysis.
///
/// Merge-ref analyses report the merge-base commit as the base SHA; if the
/// merge-base is unknown the base fields are omitted rather than guessed.
/// Head-ref analyses use the base SHA declared by the event.
pub(crate) fn resolve_pull_request_base(
    event: &PullRequestEvent,
    git_ref: &str,
    merge_base: Option<&str>,
) -> Option<PullRequestBase> {
    let base_ref = format!("refs/heads/{}", event.pull_request.base.name);
    if is_merge_ref(git_ref) {
        merge_base.map(|sha| PullRequestBase::MergeRef {
            base_ref,
            merge_base_sha: sha.to_string(),
        })
    } else {
        Some(PullRequestBase::HeadRef {
            base_ref,
            base_sha: event.pull_request.base.sha.clone(),
        })
    }
}

/// Request body accepted by the results-ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct UploadPayload {
    pub(crate) commit_oid: String,
    #[serde(rename = "ref")]
    pub(crate) git_ref: String,
    pub(crate) analysis_key: String,
    pub(crate) analysis_name: String,
    pub(crate) sarif: String,
    pub(crate) checkout_uri: String,
    pub(crate) environment: String,
    pub(crate) tool_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) workflow_run_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) base_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) base_sha: Option<String>,
}

/// Assembles the upload request body.
///
/// `base_ref`/`base_sha` are populated only for pull-request analyses against
/// targets that understand them; everything else omits the fields.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_payload(
    commit_oid: &str,
    git_ref: &str,
    analysis_key: &str,
    analysis_name: &str,
    encoded_sarif: String,
    checkout_uri: &str,
    environment: &str,
    tool_names: Vec<String>,
    workflow_run_id: Option<i64>,
    target: &ApiTarget,
    pull_request: Option<&PullRequestBase>,
) -> UploadPayload {
    let mut payload = UploadPayload {
        commit_oid: commit_oid.to_string(),
        git_ref: git_ref.to_string(),
        analysis_key: analysis_key.to_string(),
        analysis_name: analysis_name.to_string(),
        sarif: encoded_sarif,
        checkout_uri: checkout_uri.to_string(),
        environment: environment.to_string(),
        tool_names,
        workflow_run_id,
        base_ref: None,
        base_sha: None,
    };
    if !target.supports_pull_request_base() {
        return payload;
    }
    match pull_request {
        Some(PullRequestBase::MergeRef {
            base_ref,
            merge_base_sha,
        }) => {
            payload.base_ref = Some(base_ref.clone());
            payload.base_sha = Some(merge_base_sha.clone());
        }
        Some(PullRequestBase::HeadRef { base_ref, base_sha }) => {
            payload.base_ref = Some(base_ref.clone());
            payload.base_sha = Some(base_sha.clone());
        }
        None => {}
    }
    payload
}

/// Serializes, gzips and base64-encodes a result-set document for transport.
pub(crate) fn encode_result_set(sarif: &Sarif) -> Result<String> {
    let json = serde_json::to_vec(sarif).context("serialize result set")?;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&json)
        .context("compress result set")?;
    let compressed = encoder.finish().context("finalize compression")?;
    Ok(STANDARD.encode(compressed))
}

/// Collects the distinct tool names driving the document's runs.
pub(crate) fn tool_names(sarif: &Sarif) -> Vec<String> {
    let names: BTreeSet<String> = sarif
        .runs
        .iter()
        .map(|run| run.tool.driver.name.clone())
        .collect();
    names.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    use serde_json::json;
    use serde_sarif::sarif::{Run, Tool, ToolComponent};

    fn sample_event(base_name: &str, base_sha: &str) -> PullRequestEvent {
        PullRequestEvent {
            pull_request: PullRequestDetails {
                base: BranchRef {
                    name: base_name.to_string(),
                    sha: base_sha.to_string(),
                },
            },
        }
    }

    fn build(target: &ApiTarget, pull_request: Option<&PullRequestBase>) -> UploadPayload {
        build_payload(
            "deadbeef",
            "refs/pull/42/merge",
            ".github/workflows/ci.yml:analyze",
            "CI analysis",
            "emFwcGVk".to_string(),
            "file:///work/checkout",
            "{}",
            vec!["CodeQL".to_string()],
            Some(7),
            target,
            pull_request,
        )
    }

    #[test]
    fn non_pull_request_events_omit_base_fields_on_every_target() {
        let targets = [
            ApiTarget::Hosted,
            ApiTarget::Enterprise {
                version: "3.1.0".to_string(),
            },
            ApiTarget::Enterprise {
                version: "2.22.1".to_string(),
            },
        ];
        for target in &targets {
            let payload = build(target, None);
            assert_eq!(payload.base_ref, None, "target {target:?}");
            assert_eq!(payload.base_sha, None, "target {target:?}");
        }
    }

    #[test]
    fn merge_ref_analysis_reports_merge_base_sha_on_new_targets() {
        let event = sample_event("main", "base000");
        let base = resolve_pull_request_base(&event, "refs/pull/42/merge", Some("M"))
            .expect("merge-ref base");

        let payload = build(&ApiTarget::Hosted, Some(&base));

        assert_eq!(payload.base_ref.as_deref(), Some("refs/heads/main"));
        assert_eq!(payload.base_sha.as_deref(), Some("M"));
    }

    #[test]
    fn head_ref_analysis_reports_declared_base_sha() {
        let event = sample_event("main", "base000");
        let base = resolve_pull_request_base(&event, "refs/pull/42/head", Some("M"))
            .expect("head-ref base");

        let payload = build(&ApiTarget::Hosted, Some(&base));

        assert_eq!(payload.base_ref.as_deref(), Some("refs/heads/main"));
        assert_eq!(payload.base_sha.as_deref(), Some("base000"));
    }

    #[test]
    fn merge_ref_analysis_without_merge_base_omits_base_fields() {
        let event = sample_event("main", "base000");

        let base = resolve_pull_request_base(&event, "refs/pull/42/merge", None);

        assert!(base.is_none());
    }

    #[test]
    fn old_enterprise_targets_omit_base_fields_even_for_pull_requests() {
        let event = sample_event("main", "base000");
        let base = resolve_pull_request_base(&event, "refs/pull/42/merge", Some("M"))
            .expect("merge-ref base");
        let target = ApiTarget::Enterprise {
            version: "2.22.1".to_string(),
        };

        let payload = build(&target, Some(&base));

        assert_eq!(payload.base_ref, None);
        assert_eq!(payload.base_sha, None);
    }

    #[test]
    fn serialized_payload_drops_absent_optional_fields() {
        let payload = build(&ApiTarget::Hosted, None);

        let value = serde_json::to_value(&payload).expect("serialize payload");
        let object = value.as_object().expect("payload object");

        assert!(!object.contains_key("base_ref"));
        assert!(!object.contains_key("base_sha"));
        assert_eq!(value["ref"], "refs/pull/42/merge");
        assert_eq!(value["workflow_run_id"], 7);
    }

    #[test]
    fn enterprise_version_gate_is_three_one_zero() {
        for (version, expected) in [
            ("3.1.0", true),
            ("3.1.1", true),
            ("3.2.0", true),
            ("4.0.0", true),
            ("v3.1.0", true),
            ("3.1.0-rc1", true),
            ("3.1", true),
            ("3.0.4", false),
            ("2.22.1", false),
            ("not-a-version", false),
        ] {
            let target = ApiTarget::Enterprise {
                version: version.to_string(),
            };
            assert_eq!(
                target.supports_pull_request_base(),
                expected,
                "version {version}"
            );
        }
    }

    #[test]
    fn encoded_result_set_round_trips_through_gzip() {
        let run = Run::builder()
            .tool(Tool {
                driver: ToolComponent::builder().name("CodeQL").build(),
                extensions: None,
                properties: None,
            })
            .results(Vec::new())
            .build();
        let sarif = Sarif::builder()
            .version(json!("2.1.0"))
            .runs(vec![run])
            .build();

        let encoded = encode_result_set(&sarif).expect("encode");

        let compressed = STANDARD.decode(encoded).expect("base64 decode");
        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut decompressed = String::new();
        decoder
            .read_to_string(&mut decompressed)
            .expect("gunzip payload");
        let value: serde_json::Value = serde_json::from_str(&decompressed).expect("parse");
        assert_eq!(value["runs"][0]["tool"]["driver"]["name"], "CodeQL");
    }

    #[test]
    fn tool_names_are_sorted_and_deduplicated() {
        let make_run = |name: &str| {
            Run::builder()
                .tool(Tool {
                    driver: ToolComponent::builder().name(name).build(),
                    extensions: None,
                    properties: None,
                })
                .results(Vec::new())
                .build()
        };
        let sarif = Sarif::builder()
            .version(json!("2.1.0"))
            .runs(vec![make_run("zzz"), make_run("CodeQL"), make_run("zzz")])
            .build();

        assert_eq!(
            tool_names(&sarif),
            vec!["CodeQL".to_string(), "zzz".to_string()]
        );
    }

    #[test]
    fn pull_request_event_parses_from_runner_json() {
        let event: PullRequestEvent = serde_json::from_str(
            r#"{"pull_request": {"base": {"ref": "main", "sha": "base000"}, "number": 42}}"#,
        )
        .expect("parse event");

        assert_eq!(event.pull_request.base.name, "main");
        assert_eq!(event.pull_request.base.sha, "base000");
    }
}
