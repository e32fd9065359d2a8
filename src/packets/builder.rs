//! Decision packet construction.
//!
//! Built after COMPLETE from persisted rows only, so a packet read
//! twice is identical. `posture_emitted_at` comes from the SET_POSTURE
//! outcome when one completed, falling back to the posture stamp
//! recorded at planning time - never the wall clock at read time.

use crate::error::{Error, Result};
use crate::graph::store::GraphStore;
use crate::graph::types::{CaseStatus, TraceEventType};
use crate::packets::models::*;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Builds decision packets from the store.
pub struct PacketBuilder<'a> {
    store: &'a GraphStore,
}

impl<'a> PacketBuilder<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Build the packet for a case.
    pub fn build(&self, case_id: Uuid) -> Result<DecisionPacket> {
        let case = self
            .store
            .get_case(case_id)?
            .ok_or_else(|| Error::not_found("case", case_id))?;
        let trace = self.store.trace_for_case(case_id)?;
        let completed_at = trace
            .last()
            .map(|e| e.created_at)
            .unwrap_or(case.created_at);

        let evidence = self.store.evidence_for_case(case_id)?;
        let mut evidence_list: BTreeMap<String, Vec<EvidenceSummary>> = BTreeMap::new();
        for e in &evidence {
            evidence_list
                .entry(e.source_system.clone())
                .or_default()
                .push(EvidenceSummary {
                    id: e.id,
                    source_system: e.source_system.clone(),
                    retrieved_at: e.retrieved_at,
                    excerpt: e.excerpt.clone(),
                });
        }

        let top_claims: Vec<ClaimSummary> = self
            .store
            .visible_claims_for_case(case_id, completed_at, completed_at)?
            .into_iter()
            .take(10)
            .map(|c| ClaimSummary {
                id: c.id,
                text: c.text,
                confidence: c.confidence,
                status: c.status.to_string(),
            })
            .collect();

        let contradictions: Vec<ContradictionSummary> = self
            .store
            .contradictions_for_case(case_id)?
            .into_iter()
            .map(|c| ContradictionSummary {
                id: c.id,
                contradiction_type: c.contradiction_type,
                detected_at: c.detected_at,
                resolution_status: c.resolution_status,
                notes: c.notes,
            })
            .collect();

        let actions = self.store.actions_for_case(case_id)?;
        let to_summary = |a: &crate::graph::store::ActionRow| ActionSummary {
            id: a.id,
            action_type: a.action_type.clone(),
            args: a.args.clone(),
            state: a.state.clone(),
            risk_level: a.risk_level.clone(),
            requires_approval: a.requires_approval,
        };
        let actions_proposed: Vec<ActionSummary> = actions.iter().map(to_summary).collect();
        let actions_executed: Vec<ActionSummary> = actions
            .iter()
            .filter(|a| a.state == "COMPLETED")
            .map(to_summary)
            .collect();

        let risk_meta = self
            .store
            .latest_trace_event(case_id, "risk_assessment")?
            .map(|e| e.meta);

        let posture_decision =
            self.posture_decision(case_id, &case.scope, &risk_meta, completed_at)?;
        let metrics = self.metrics(
            case_id,
            &evidence,
            contradictions.len(),
            actions.len(),
            completed_at,
        )?;

        let blocked_section = if case.status == CaseStatus::Blocked {
            Some(self.blocked_section(case_id)?)
        } else {
            None
        };

        let workflow_trace: Vec<WorkflowStep> = trace
            .iter()
            .filter(|e| {
                matches!(
                    e.event_type,
                    TraceEventType::StateEnter | TraceEventType::StateExit
                ) && e.ref_type.as_deref() == Some("state")
            })
            .map(|e| WorkflowStep {
                seq: e.seq,
                event_type: e.event_type.to_string(),
                state: e.meta.get("state").and_then(Value::as_str).map(str::to_string),
                transition_to: e
                    .meta
                    .get("transition_to")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                condition: e
                    .meta
                    .get("condition")
                    .or_else(|| e.meta.get("condition_met"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                description: e
                    .meta
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                created_at: e.created_at,
            })
            .collect();

        let confidence_breakdown = risk_meta
            .as_ref()
            .and_then(|m| m.get("confidence_breakdown").cloned())
            .unwrap_or(Value::Null);

        let policies_applied = self.policies_applied(case_id)?;
        let cascade_impact = self.cascade_impact(&case.scope);

        Ok(DecisionPacket {
            case_id,
            case_type: case.case_type.to_string(),
            scope: case.scope,
            status: case.status.to_string(),
            created_at: case.created_at,
            completed_at,
            posture_decision,
            top_claims,
            evidence_list,
            contradictions,
            policies_applied,
            actions_proposed,
            actions_executed,
            blocked_section,
            metrics,
            workflow_trace,
            confidence_breakdown,
            cascade_impact,
        })
    }

    /// Posture from the completed SET_POSTURE outcome; for unhappy paths
    /// the last good risk assessment recovered from the trace, never a
    /// default.
    fn posture_decision(
        &self,
        case_id: Uuid,
        scope: &Value,
        risk_meta: &Option<Value>,
        completed_at: DateTime<Utc>,
    ) -> Result<PostureDecision> {
        let airport = scope.get("airport").and_then(Value::as_str).map(str::to_string);

        if let Some(outcome) = self.store.completed_posture_outcome(case_id)? {
            let posture = outcome.payload["posture"]
                .as_str()
                .unwrap_or("HOLD")
                .to_string();
            let effective_at = outcome.payload["effective_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(outcome.created_at);
            let reason = risk_meta
                .as_ref()
                .and_then(|m| m.get("rationale"))
                .and_then(Value::as_str)
                .unwrap_or("Posture executed by orchestrator")
                .to_string();
            return Ok(PostureDecision {
                posture,
                airport,
                effective_at,
                reason,
            });
        }

        match risk_meta {
            Some(meta) => Ok(PostureDecision {
                posture: meta
                    .get("recommended_posture")
                    .and_then(Value::as_str)
                    .unwrap_or("HOLD")
                    .to_string(),
                airport,
                effective_at: completed_at,
                reason: meta
                    .get("rationale")
                    .and_then(Value::as_str)
                    .unwrap_or("Recovered from last risk assessment")
                    .to_string(),
            }),
            None => Ok(PostureDecision {
                posture: "HOLD".to_string(),
                airport,
                effective_at: completed_at,
                reason: "Case ended before risk assessment; holding pending evidence".to_string(),
            }),
        }
    }

    fn metrics(
        &self,
        case_id: Uuid,
        evidence: &[crate::graph::types::Evidence],
        contradiction_count: usize,
        action_count: usize,
        completed_at: DateTime<Utc>,
    ) -> Result<PacketMetrics> {
        let first_signal_at = evidence
            .iter()
            .map(|e| e.retrieved_at)
            .min()
            .unwrap_or(completed_at);

        // Preference order: SET_POSTURE outcome, the planning-time
        // posture stamp, then completion time. All persisted - PDL must
        // not grow while the packet sits unread.
        let posture_emitted_at = match self.store.completed_posture_outcome(case_id)? {
            Some(outcome) => outcome.payload["effective_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(outcome.created_at),
            None => self
                .store
                .latest_trace_event(case_id, "posture_marked")?
                .and_then(|e| {
                    e.meta
                        .get("marked_at")
                        .and_then(Value::as_str)
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc))
                })
                .unwrap_or(completed_at),
        };

        let pdl_seconds = (posture_emitted_at - first_signal_at).num_milliseconds() as f64 / 1000.0;

        // Resolved uncertainty count from the final state summary.
        let resolved = self
            .store
            .latest_trace_event(case_id, "state")?
            .and_then(|e| {
                e.meta
                    .get("resolved_uncertainty_count")
                    .and_then(Value::as_i64)
            })
            .unwrap_or(0);

        Ok(PacketMetrics {
            first_signal_at,
            posture_emitted_at,
            pdl_seconds,
            evidence_count: evidence.len(),
            uncertainty_resolved_count: resolved as usize,
            contradiction_count,
            action_count,
        })
    }

    fn blocked_section(&self, case_id: Uuid) -> Result<BlockedSection> {
        let missing: Vec<Value> = self
            .store
            .unresolved_missing_evidence(case_id)?
            .into_iter()
            .map(|m| {
                json!({
                    "source_system": m.source_system,
                    "criticality": m.criticality.to_string(),
                    "reason": m.reason,
                    "created_at": m.created_at.to_rfc3339(),
                })
            })
            .collect();

        let policy_verdict = self
            .store
            .latest_trace_event(case_id, "policy")?
            .and_then(|e| e.meta.get("verdict").and_then(Value::as_str).map(str::to_string));

        Ok(BlockedSection {
            missing_evidence_requests: missing,
            policy_verdict,
            pending_approval_count: self.store.pending_approval_count(case_id)?,
        })
    }

    fn policies_applied(&self, case_id: Uuid) -> Result<Vec<Value>> {
        let mut applied: Vec<Value> = self
            .store
            .active_policies()?
            .into_iter()
            .map(|p| json!({"id": p.id.to_string(), "name": p.name, "rule": p.rule_text}))
            .collect();

        if let Some(event) = self.store.latest_trace_event(case_id, "policy")? {
            applied.push(json!({
                "verdict": event.meta.get("verdict"),
                "reasoning": event.meta.get("reasoning"),
            }));
        }
        Ok(applied)
    }

    /// Best-effort cascade analysis; a failure becomes an inline error
    /// and the packet stays complete.
    fn cascade_impact(&self, scope: &Value) -> Value {
        let airport = match scope.get("airport").and_then(Value::as_str) {
            Some(airport) => airport,
            None => return json!({"error": "case scope has no airport"}),
        };
        match self.store.cascade_from_airport(airport) {
            Ok(impact) => serde_json::to_value(impact)
                .unwrap_or_else(|e| json!({"error": format!("serialization: {}", e)})),
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::{NewAction, NewEvidence};
    use crate::graph::types::CaseType;
    use pretty_assertions::assert_eq;

    fn seeded_case(store: &GraphStore) -> Uuid {
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();

        let (evidence, _) = store
            .insert_evidence(NewEvidence {
                source_system: "METAR".to_string(),
                source_ref: "KJFK".to_string(),
                retrieved_at: Utc::now(),
                content_type: "application/json".to_string(),
                payload_sha256: "m1".to_string(),
                raw_path: None,
                excerpt: "{\"status\": \"has_data\"}".to_string(),
                meta: json!({}),
            })
            .unwrap();
        store
            .append_trace(
                case.id,
                TraceEventType::ToolResult,
                Some("evidence"),
                Some(&evidence.id.to_string()),
                json!({"source": "METAR"}),
            )
            .unwrap();

        case.id
    }

    #[test]
    fn test_packet_for_executed_posture() {
        let store = GraphStore::in_memory().unwrap();
        let case_id = seeded_case(&store);

        let action = store
            .insert_action(NewAction {
                case_id,
                action_type: "SET_POSTURE".to_string(),
                args: json!({"posture": "HOLD", "airport": "KJFK"}),
                risk_level: "HIGH".to_string(),
                requires_approval: false,
            })
            .unwrap();
        store.set_action_state(action.id, "COMPLETED").unwrap();
        store
            .insert_outcome(action.id, true, json!({"posture": "HOLD"}))
            .unwrap();
        store.set_case_status(case_id, CaseStatus::Resolved).unwrap();

        let packet = PacketBuilder::new(&store).build(case_id).unwrap();

        assert_eq!(packet.posture_decision.posture, "HOLD");
        assert_eq!(packet.status, "RESOLVED");
        assert_eq!(packet.actions_executed.len(), 1);
        assert!(packet.blocked_section.is_none());
        assert!(packet.evidence_list.contains_key("METAR"));
    }

    #[test]
    fn test_pdl_stable_across_reads() {
        let store = GraphStore::in_memory().unwrap();
        let case_id = seeded_case(&store);

        let action = store
            .insert_action(NewAction {
                case_id,
                action_type: "SET_POSTURE".to_string(),
                args: json!({"posture": "ACCEPT"}),
                risk_level: "LOW".to_string(),
                requires_approval: false,
            })
            .unwrap();
        store.set_action_state(action.id, "COMPLETED").unwrap();
        store
            .insert_outcome(action.id, true, json!({"posture": "ACCEPT"}))
            .unwrap();
        store.set_case_status(case_id, CaseStatus::Resolved).unwrap();

        let builder = PacketBuilder::new(&store);
        let first = builder.build(case_id).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        let second = builder.build(case_id).unwrap();

        assert_eq!(first.metrics.pdl_seconds, second.metrics.pdl_seconds);
        assert_eq!(
            first.metrics.posture_emitted_at,
            second.metrics.posture_emitted_at
        );
    }

    #[test]
    fn test_blocked_packet_lists_missing_evidence() {
        let store = GraphStore::in_memory().unwrap();
        let case_id = seeded_case(&store);

        store
            .insert_missing_evidence(
                Some(case_id),
                "METAR",
                "airport_signal",
                json!({"airport": "KJFK"}),
                "timeout after 3 attempts",
                crate::graph::types::Criticality::Blocking,
            )
            .unwrap();
        store.set_case_status(case_id, CaseStatus::Blocked).unwrap();

        let packet = PacketBuilder::new(&store).build(case_id).unwrap();
        let blocked = packet.blocked_section.unwrap();
        assert_eq!(blocked.missing_evidence_requests.len(), 1);
        assert_eq!(
            blocked.missing_evidence_requests[0]["source_system"],
            "METAR"
        );
        assert_eq!(blocked.missing_evidence_requests[0]["criticality"], "BLOCKING");
    }

    #[test]
    fn test_posture_recovered_from_risk_trace_when_blocked() {
        let store = GraphStore::in_memory().unwrap();
        let case_id = seeded_case(&store);

        store
            .append_trace(
                case_id,
                TraceEventType::ToolResult,
                Some("risk_assessment"),
                None,
                json!({
                    "risk_level": "HIGH",
                    "recommended_posture": "RESTRICT",
                    "confidence": 0.6,
                    "rationale": "IFR conditions with FAA silent",
                }),
            )
            .unwrap();
        store.set_case_status(case_id, CaseStatus::Blocked).unwrap();

        let packet = PacketBuilder::new(&store).build(case_id).unwrap();
        assert_eq!(packet.posture_decision.posture, "RESTRICT");
        assert!(packet.posture_decision.reason.contains("IFR"));
    }

    #[test]
    fn test_cascade_error_is_inline() {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({}))
            .unwrap();
        let packet = PacketBuilder::new(&store).build(case.id).unwrap();
        assert!(packet.cascade_impact.get("error").is_some());
    }
}
