//! Beam-search action planner.
//!
//! Deterministic - no engine call. The action library partitions into
//! investigations (value = the uncertainty value a fetch would resolve)
//! and interventions (value from the recommended posture and risk
//! level). Score = value - cost - risk_penalty; given the same belief
//! state the scores are bit-identical across runs.

use crate::belief::{BeliefState, Posture};
use crate::error::Result;
use crate::graph::store::GraphStore;
use serde_json::{json, Value};

/// Sequences kept per beam layer.
pub const BEAM_WIDTH: usize = 4;
/// Maximum planned sequence length.
pub const MAX_DEPTH: usize = 4;

/// An action proposed by the planner, not yet persisted.
#[derive(Debug, Clone)]
pub struct ProposedAction {
    pub action_type: String,
    pub args: Value,
    pub risk_level: String,
    pub requires_approval: bool,
    pub requires_notification: bool,
    pub playbook_guided: bool,
    pub score: f64,
}

/// Value of resolving one uncertainty, by type.
fn uncertainty_value(uncertainty_type: &str) -> f64 {
    match uncertainty_type {
        "airport_status_unknown" => 3.0,
        "weather_conditions_unknown" => 3.0,
        "forecast_unknown" => 1.5,
        "alerts_unknown" => 1.5,
        "movement_unknown" => 1.0,
        _ => 1.0,
    }
}

fn fetch_action_for(uncertainty_type: &str) -> Option<(&'static str, &'static str)> {
    match uncertainty_type {
        "airport_status_unknown" => Some(("FETCH_FAA_STATUS", "FAA_NAS")),
        "weather_conditions_unknown" => Some(("FETCH_METAR", "METAR")),
        "forecast_unknown" => Some(("FETCH_TAF", "TAF")),
        "alerts_unknown" => Some(("FETCH_NWS_ALERTS", "NWS_ALERTS")),
        "movement_unknown" => Some(("FETCH_ADSB", "ADSB")),
        _ => None,
    }
}

fn risk_penalty(risk_level: &str) -> f64 {
    match risk_level {
        "HIGH" => 1.0,
        "MEDIUM" => 0.5,
        _ => 0.0,
    }
}

fn posture_risk_level(posture: Posture) -> &'static str {
    match posture {
        Posture::Hold | Posture::Escalate => "HIGH",
        Posture::Restrict => "MEDIUM",
        Posture::Accept => "LOW",
    }
}

/// Build the candidate library for the current belief state.
fn candidates(
    belief: &BeliefState,
    risk_level: &str,
    posture: Posture,
    has_booking_evidence: bool,
) -> Vec<ProposedAction> {
    let airport = belief.airport_icao.clone().unwrap_or_default();
    let mut out = Vec::new();

    // Investigations: one fetch per open uncertainty.
    for uncertainty in belief.open_uncertainties() {
        if let Some((action_type, source)) = fetch_action_for(&uncertainty.uncertainty_type) {
            let value = uncertainty_value(&uncertainty.uncertainty_type);
            let cost = 1.0;
            out.push(ProposedAction {
                action_type: action_type.to_string(),
                args: json!({"airport": airport, "source": source}),
                risk_level: "LOW".to_string(),
                requires_approval: false,
                requires_notification: false,
                playbook_guided: false,
                score: value - cost,
            });
        }
    }

    // Interventions. SET_POSTURE always carries the decision itself.
    let posture_risk = posture_risk_level(posture);
    out.push(ProposedAction {
        action_type: "SET_POSTURE".to_string(),
        args: json!({"posture": posture.to_string(), "airport": airport}),
        risk_level: posture_risk.to_string(),
        requires_approval: false,
        requires_notification: false,
        playbook_guided: false,
        score: 10.0 - 0.5 - risk_penalty(posture_risk),
    });

    if posture != Posture::Accept {
        out.push(ProposedAction {
            action_type: "PUBLISH_GATEWAY_ADVISORY".to_string(),
            args: json!({"airport": airport, "posture": posture.to_string()}),
            risk_level: "MEDIUM".to_string(),
            requires_approval: false,
            requires_notification: true,
            playbook_guided: false,
            score: 4.0 - 0.5 - risk_penalty("MEDIUM"),
        });
    }

    if posture == Posture::Escalate || risk_level == "CRITICAL" {
        out.push(ProposedAction {
            action_type: "ESCALATE_OPS".to_string(),
            args: json!({"airport": airport, "risk_level": risk_level}),
            risk_level: "MEDIUM".to_string(),
            requires_approval: false,
            requires_notification: true,
            playbook_guided: false,
            score: 5.0 - 0.5 - risk_penalty("MEDIUM"),
        });
    }

    if posture == Posture::Hold
        && matches!(risk_level, "HIGH" | "CRITICAL")
        && has_booking_evidence
    {
        out.push(ProposedAction {
            action_type: "HOLD_CARGO".to_string(),
            args: json!({"airport": airport}),
            risk_level: "HIGH".to_string(),
            requires_approval: true,
            requires_notification: false,
            playbook_guided: false,
            score: 4.5 - 1.0 - risk_penalty("HIGH"),
        });
        out.push(ProposedAction {
            action_type: "NOTIFY_CUSTOMER".to_string(),
            args: json!({"airport": airport, "reason": "gateway hold"}),
            risk_level: "LOW".to_string(),
            requires_approval: false,
            requires_notification: true,
            playbook_guided: false,
            score: 3.0 - 0.5,
        });
    }

    // Deterministic candidate order before the search.
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.action_type.cmp(&b.action_type))
    });
    out.retain(|c| c.score > 0.0);
    out
}

/// Beam search over action sequences. Returns the best sequence in
/// order.
fn beam_search(candidates: Vec<ProposedAction>) -> Vec<ProposedAction> {
    if candidates.is_empty() {
        return Vec::new();
    }

    // A sequence is a set of candidate indexes with a cumulative score.
    let mut beam: Vec<(Vec<usize>, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (vec![i], c.score))
        .collect();
    beam.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    beam.truncate(BEAM_WIDTH);

    let mut best = beam[0].clone();

    for _depth in 1..MAX_DEPTH {
        let mut next: Vec<(Vec<usize>, f64)> = Vec::new();
        for (sequence, score) in &beam {
            for (i, candidate) in candidates.iter().enumerate() {
                if sequence.contains(&i) {
                    continue;
                }
                let mut extended = sequence.clone();
                extended.push(i);
                next.push((extended, score + candidate.score));
            }
        }
        if next.is_empty() {
            break;
        }
        next.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        next.truncate(BEAM_WIDTH);

        if next[0].1 > best.1 {
            best = next[0].clone();
        }
        beam = next;
    }

    best.0.into_iter().map(|i| candidates[i].clone()).collect()
}

/// Plan the action sequence for a case.
///
/// Pure given the belief state and risk assessment; booking evidence
/// presence gates shipment-level actions.
pub fn plan_actions(
    store: &GraphStore,
    belief: &BeliefState,
    risk_assessment: Option<&Value>,
) -> Result<Vec<ProposedAction>> {
    let risk_level = risk_assessment
        .and_then(|r| r.get("risk_level"))
        .and_then(Value::as_str)
        .unwrap_or("MEDIUM");

    let has_booking_evidence = store
        .evidence_for_case(belief.case_id)?
        .iter()
        .any(|e| e.source_system == "BOOKING");

    let library = candidates(belief, risk_level, belief.current_posture, has_booking_evidence);
    Ok(beam_search(library))
}

/// Merge a playbook action template into the planned sequence.
///
/// Template actions that match a planned type are taken in template
/// order with merged args (planner args win); planned actions outside
/// the template follow, marked unguided.
pub fn apply_playbook_guidance(
    base_actions: Vec<ProposedAction>,
    template: &Value,
) -> Vec<ProposedAction> {
    let sequence = match template.get("action_sequence").and_then(Value::as_array) {
        Some(sequence) if !sequence.is_empty() => sequence,
        _ => return base_actions,
    };

    let mut guided: Vec<ProposedAction> = Vec::new();
    for template_action in sequence {
        let template_type = template_action.get("type").and_then(Value::as_str).unwrap_or("");
        if let Some(base) = base_actions.iter().find(|a| a.action_type == template_type) {
            let mut action = base.clone();
            if let (Value::Object(merged), Some(Value::Object(template_args))) = (
                &mut action.args,
                template_action.get("args").cloned(),
            ) {
                for (key, value) in template_args {
                    merged.entry(key).or_insert(value);
                }
            }
            action.playbook_guided = true;
            guided.push(action);
        }
    }

    for action in base_actions {
        if !guided.iter().any(|g| g.action_type == action.action_type) {
            let mut action = action;
            action.playbook_guided = false;
            guided.push(action);
        }
    }
    guided
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::CaseType;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn belief_with(posture: Posture, airport: &str) -> BeliefState {
        let mut belief = BeliefState::new(Uuid::new_v4(), 10, 50);
        belief.airport_icao = Some(airport.to_string());
        belief.current_posture = posture;
        belief
    }

    fn plan(belief: &BeliefState, risk: &str) -> Vec<ProposedAction> {
        let store = GraphStore::in_memory().unwrap();
        // Mirror the belief's case so evidence lookups succeed.
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        let mut belief = belief.clone();
        belief.case_id = case.id;
        plan_actions(&store, &belief, Some(&json!({"risk_level": risk}))).unwrap()
    }

    #[test]
    fn test_accept_posture_plans_single_action() {
        let belief = belief_with(Posture::Accept, "KLAX");
        let actions = plan(&belief, "LOW");

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "SET_POSTURE");
        assert_eq!(actions[0].args["posture"], "ACCEPT");
        assert!(!actions[0].requires_notification);
    }

    #[test]
    fn test_hold_posture_includes_advisory() {
        let belief = belief_with(Posture::Hold, "KJFK");
        let actions = plan(&belief, "HIGH");

        let types: Vec<&str> = actions.iter().map(|a| a.action_type.as_str()).collect();
        assert!(types.contains(&"SET_POSTURE"));
        assert!(types.contains(&"PUBLISH_GATEWAY_ADVISORY"));
        // No booking evidence, so no shipment-level actions.
        assert!(!types.contains(&"HOLD_CARGO"));
    }

    #[test]
    fn test_set_posture_ranks_first() {
        let belief = belief_with(Posture::Hold, "KJFK");
        let actions = plan(&belief, "HIGH");
        assert_eq!(actions[0].action_type, "SET_POSTURE");
    }

    #[test]
    fn test_scores_deterministic() {
        let belief = belief_with(Posture::Restrict, "KORD");
        let first = plan(&belief, "MEDIUM");
        let second = plan(&belief, "MEDIUM");

        let a: Vec<(String, String)> = first
            .iter()
            .map(|x| (x.action_type.clone(), format!("{:.10}", x.score)))
            .collect();
        let b: Vec<(String, String)> = second
            .iter()
            .map(|x| (x.action_type.clone(), format!("{:.10}", x.score)))
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_escalate_adds_ops_escalation() {
        let belief = belief_with(Posture::Escalate, "KMIA");
        let actions = plan(&belief, "CRITICAL");
        let types: Vec<&str> = actions.iter().map(|a| a.action_type.as_str()).collect();
        assert!(types.contains(&"ESCALATE_OPS"));
    }

    #[test]
    fn test_playbook_guidance_merges_args() {
        let belief = belief_with(Posture::Hold, "KJFK");
        let base = plan(&belief, "HIGH");
        let template = json!({
            "action_sequence": [
                {"type": "PUBLISH_GATEWAY_ADVISORY", "args": {"channel": "ops-bridge"}},
                {"type": "SET_POSTURE", "args": {"posture": "RESTRICT"}}
            ]
        });

        let guided = apply_playbook_guidance(base, &template);

        // Template order first, then the rest.
        assert_eq!(guided[0].action_type, "PUBLISH_GATEWAY_ADVISORY");
        assert!(guided[0].playbook_guided);
        assert_eq!(guided[0].args["channel"], "ops-bridge");

        // Planner args win over template args.
        let set_posture = guided.iter().find(|a| a.action_type == "SET_POSTURE").unwrap();
        assert_eq!(set_posture.args["posture"], "HOLD");
    }

    #[test]
    fn test_open_uncertainty_adds_fetch_candidate() {
        let mut belief = belief_with(Posture::Hold, "KJFK");
        belief.add_uncertainty(crate::belief::Uncertainty {
            id: "metar".to_string(),
            question: "conditions?".to_string(),
            uncertainty_type: "weather_conditions_unknown".to_string(),
            missing_evidence_request_id: None,
            resolved: false,
            resolved_by_evidence_id: None,
        });
        let actions = plan(&belief, "HIGH");
        let types: Vec<&str> = actions.iter().map(|a| a.action_type.as_str()).collect();
        assert!(types.contains(&"FETCH_METAR"));
    }
}
