//! Workflow-trace replay.
//!
//! The trace is the ground truth: replaying a case's recorded state
//! transitions against a fresh copy of the transition table must
//! reproduce the final state, posture and action set. Used to audit a
//! packet after the fact.

use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::graph::types::TraceEventType;
use crate::orchestrator::is_valid_transition;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Result of replaying a case's workflow trace.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayResult {
    pub case_id: Uuid,
    pub final_state: String,
    pub posture: Option<String>,
    pub action_types: Vec<String>,
    pub steps_replayed: usize,
    /// False when a recorded transition is not a row of the table or
    /// the recorded states do not chain.
    pub valid: bool,
}

/// Replay a case's recorded transitions against the transition table.
pub fn replay_trace(store: &GraphStore, case_id: Uuid) -> Result<ReplayResult> {
    let trace = store.trace_for_case(case_id)?;

    let mut current = "INIT".to_string();
    let mut steps = 0usize;
    let mut valid = true;

    for event in &trace {
        if event.event_type != TraceEventType::StateExit
            || event.ref_type.as_deref() != Some("state")
        {
            continue;
        }
        let recorded_state = event.meta.get("state").and_then(Value::as_str).unwrap_or("");
        let next = event
            .meta
            .get("transition_to")
            .and_then(Value::as_str)
            .unwrap_or("");

        if recorded_state != current || !is_valid_transition(&current, next) {
            valid = false;
            break;
        }
        current = next.to_string();
        steps += 1;
    }

    // Posture reproduces from the same persisted facts the packet uses.
    let posture = match store.completed_posture_outcome(case_id)? {
        Some(outcome) => outcome.payload["posture"].as_str().map(str::to_string),
        None => store
            .latest_trace_event(case_id, "risk_assessment")?
            .and_then(|e| {
                e.meta
                    .get("recommended_posture")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }),
    };

    let mut action_types: Vec<String> = store
        .actions_for_case(case_id)?
        .into_iter()
        .map(|a| a.action_type)
        .collect();
    action_types.sort();

    Ok(ReplayResult {
        case_id,
        final_state: current,
        posture,
        action_types,
        steps_replayed: steps,
        valid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::CaseType;
    use serde_json::json;

    #[test]
    fn test_replay_follows_recorded_transitions() {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();

        for (state, to) in [
            ("INIT", "INVESTIGATE"),
            ("INVESTIGATE", "QUANTIFY_RISK"),
            ("QUANTIFY_RISK", "CRITIQUE"),
            ("CRITIQUE", "EVALUATE_POLICY"),
            ("EVALUATE_POLICY", "PLAN_ACTIONS"),
            ("PLAN_ACTIONS", "EXECUTE"),
            ("EXECUTE", "COMPLETE"),
        ] {
            store
                .append_trace(
                    case.id,
                    TraceEventType::StateExit,
                    Some("state"),
                    None,
                    json!({"state": state, "transition_to": to}),
                )
                .unwrap();
        }

        let result = replay_trace(&store, case.id).unwrap();
        assert!(result.valid);
        assert_eq!(result.final_state, "COMPLETE");
        assert_eq!(result.steps_replayed, 7);
    }

    #[test]
    fn test_replay_rejects_illegal_transition() {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();

        store
            .append_trace(
                case.id,
                TraceEventType::StateExit,
                Some("state"),
                None,
                json!({"state": "INIT", "transition_to": "EXECUTE"}),
            )
            .unwrap();

        let result = replay_trace(&store, case.id).unwrap();
        assert!(!result.valid);
    }
}
