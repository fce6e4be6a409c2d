use serde_sarif::sarif::{Result as SarifResult, Sarif};
use tracing::info;

/// Tool release that shipped the fingerprint-prone rule results.
const AFFECTED_TOOL_NAME: &str = "CodeQL";
const AFFECTED_TOOL_VERSION: &str = "2.11.2";

const FINGERPRINT_PRONE_RULE_ID: &str = "rb/weak-cryptographic-algorithm";
const DENIED_MESSAGE_FRAGMENTS: [&str; 2] = ["MD5", "SHA1"];

/// Removes results known to be false positives from affected tool releases.
///
/// Version matching is exact string equality; `2.11.3` fixed the rule and its
/// results are retained. The input document is never mutated, and the
/// operation is idempotent. A single summary line reports the pruned count.
pub(crate) fn prune_invalid_results(sarif: &Sarif) -> Sarif {
    let mut pruned = sarif.clone();
    let mut removed = 0usize;
    for run in &mut pruned.runs {
        if run.tool.driver.name != AFFECTED_TOOL_NAME {
            continue;
        }
        if run.tool.driver.semantic_version.as_deref() != Some(AFFECTED_TOOL_VERSION) {
            continue;
        }
        if let Some(results) = run.results.take() {
            let kept: Vec<SarifResult> = results
                .into_iter()
                .filter(|result| {
                    let drop = is_known_false_positive(result);
                    if drop {
                        removed += 1;
                    }
                    !drop
                })
                .collect();
            run.results = Some(kept);
        }
    }
    if removed > 0 {
        info!("pruned {removed} results believed to be false positives");
    }
    pruned
}

fn is_known_false_positive(result: &SarifResult) -> bool {
    if result.rule_id.as_deref() != Some(FINGERPRINT_PRONE_RULE_ID) {
        return false;
    }
    let message = result.message.text.as_deref().unwrap_or_default();
    DENIED_MESSAGE_FRAGMENTS
        .iter()
        .any(|fragment| message.contains(fragment))
}
