//! Playbook matching and learning.
//!
//! A playbook is a `(pattern, action_template)` pair distilled from
//! past cases. On investigation start the highest-scoring match above
//! threshold guides planning; on completion the playbook's usage stats
//! are updated, counting success only when the stop condition was MET.

use crate::error::Result;
use crate::graph::retrieval::jaccard_similarity;
use crate::graph::store::GraphStore;
use crate::graph::types::CaseRecord;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Minimum match score for a playbook to guide a case.
pub const MATCH_THRESHOLD: f64 = 0.5;

/// A playbook selected for a case.
#[derive(Debug, Clone)]
pub struct MatchedPlaybook {
    pub playbook_id: Uuid,
    pub name: String,
    pub match_score: f64,
    pub action_template: Value,
}

/// Find the best playbook for `(case_type, scope)` above the threshold.
///
/// The score combines scope-key overlap with the evidence-signal
/// fingerprint: half from matching scope keys, half from Jaccard over
/// the signal edge types the playbook pattern names versus the ones the
/// case has seen so far.
pub fn find_matching(
    store: &GraphStore,
    case: &CaseRecord,
    signal_fingerprint: &BTreeSet<String>,
) -> Result<Option<MatchedPlaybook>> {
    let mut best: Option<MatchedPlaybook> = None;

    for (id, name, pattern, template, _uses, _successes) in store.all_playbooks()? {
        let score = match_score(&pattern, case, signal_fingerprint);
        if score <= MATCH_THRESHOLD {
            continue;
        }
        let replace = match &best {
            Some(current) => {
                score > current.match_score
                    || (score == current.match_score && id < current.playbook_id)
            }
            None => true,
        };
        if replace {
            best = Some(MatchedPlaybook {
                playbook_id: id,
                name,
                match_score: score,
                action_template: template,
            });
        }
    }

    Ok(best)
}

fn match_score(pattern: &Value, case: &CaseRecord, signal_fingerprint: &BTreeSet<String>) -> f64 {
    // Case type is a gate, not a component.
    let pattern_type = pattern.get("case_type").and_then(Value::as_str).unwrap_or("");
    if pattern_type != case.case_type.to_string() {
        return 0.0;
    }

    let scope_keys: BTreeSet<String> = pattern
        .get("scope_keys")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let case_keys: BTreeSet<String> = case
        .scope
        .as_object()
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();
    let scope_score = jaccard_similarity(&scope_keys, &case_keys);

    let pattern_signals: BTreeSet<String> = pattern
        .get("signal_fingerprint")
        .and_then(Value::as_array)
        .map(|signals| {
            signals
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // Before any signals are known the fingerprint leg falls out of the
    // average rather than dragging the score down.
    if pattern_signals.is_empty() && signal_fingerprint.is_empty() {
        scope_score
    } else if signal_fingerprint.is_empty() {
        0.5 * scope_score + 0.5 * 0.5
    } else {
        0.5 * scope_score + 0.5 * jaccard_similarity(&pattern_signals, signal_fingerprint)
    }
}

/// Record a use of the playbook on case completion.
pub fn record_usage(
    store: &GraphStore,
    playbook_id: Uuid,
    case_id: Uuid,
    success: bool,
) -> Result<()> {
    store.record_playbook_usage(playbook_id, case_id, success)
}

/// Distill a completed case into a playbook.
pub fn record_from_case(
    store: &GraphStore,
    case: &CaseRecord,
    name: &str,
    signal_fingerprint: &BTreeSet<String>,
) -> Result<Uuid> {
    let actions = store.actions_for_case(case.id)?;
    let sequence: Vec<Value> = actions
        .iter()
        .map(|a| json!({"type": a.action_type, "args": a.args}))
        .collect();

    let pattern = json!({
        "case_type": case.case_type.to_string(),
        "scope_keys": case
            .scope
            .as_object()
            .map(|obj| obj.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default(),
        "signal_fingerprint": signal_fingerprint.iter().cloned().collect::<Vec<_>>(),
    });

    store.insert_playbook(name, pattern, json!({"action_sequence": sequence}))
}

/// Convenience for building a fingerprint from case edge types.
pub fn signal_fingerprint_for_case(store: &GraphStore, case_id: Uuid) -> Result<BTreeSet<String>> {
    Ok(store.edge_types_for_case(case_id)?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::CaseType;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn case_with_scope(scope: Value) -> CaseRecord {
        CaseRecord {
            id: Uuid::new_v4(),
            case_type: CaseType::AirportDisruption,
            scope,
            status: crate::graph::types::CaseStatus::Open,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_match_requires_case_type() {
        let pattern = json!({
            "case_type": "LANE_DISRUPTION",
            "scope_keys": ["airport"],
            "signal_fingerprint": [],
        });
        let case = case_with_scope(json!({"airport": "KJFK"}));
        assert_eq!(match_score(&pattern, &case, &BTreeSet::new()), 0.0);
    }

    #[test]
    fn test_scope_and_fingerprint_combine() {
        let pattern = json!({
            "case_type": "AIRPORT_DISRUPTION",
            "scope_keys": ["airport"],
            "signal_fingerprint": ["AIRPORT_HAS_FAA_DISRUPTION", "AIRPORT_WEATHER_RISK"],
        });
        let case = case_with_scope(json!({"airport": "KJFK"}));
        let fingerprint: BTreeSet<String> = ["AIRPORT_HAS_FAA_DISRUPTION", "AIRPORT_WEATHER_RISK"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let score = match_score(&pattern, &case, &fingerprint);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_find_matching_respects_threshold() {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();

        store
            .insert_playbook(
                "unrelated",
                json!({
                    "case_type": "AIRPORT_DISRUPTION",
                    "scope_keys": ["lane", "carrier"],
                    "signal_fingerprint": ["AIRPORT_MOVEMENT_COLLAPSE"],
                }),
                json!({"action_sequence": []}),
            )
            .unwrap();
        store
            .insert_playbook(
                "ground-stop-response",
                json!({
                    "case_type": "AIRPORT_DISRUPTION",
                    "scope_keys": ["airport"],
                    "signal_fingerprint": ["AIRPORT_HAS_FAA_DISRUPTION"],
                }),
                json!({"action_sequence": [{"type": "SET_POSTURE", "args": {}}]}),
            )
            .unwrap();

        let fingerprint: BTreeSet<String> = ["AIRPORT_HAS_FAA_DISRUPTION"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let matched = find_matching(&store, &case, &fingerprint).unwrap().unwrap();
        assert_eq!(matched.name, "ground-stop-response");
        assert!(matched.match_score > MATCH_THRESHOLD);
    }

    #[test]
    fn test_record_from_case_round_trip() {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        let fingerprint: BTreeSet<String> =
            ["AIRPORT_WEATHER_RISK"].iter().map(|s| s.to_string()).collect();

        let id = record_from_case(&store, &case, "weather-hold", &fingerprint).unwrap();
        record_usage(&store, id, case.id, true).unwrap();

        let books = store.all_playbooks().unwrap();
        let (_, name, pattern, _, uses, successes) = &books[0];
        assert_eq!(name, "weather-hold");
        assert_eq!(pattern["case_type"], "AIRPORT_DISRUPTION");
        assert_eq!((*uses, *successes), (1, 1));
    }
}
