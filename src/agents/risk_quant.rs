//! Risk quantification agent.
//!
//! Calls the narrative engine with a compact context and expects a JSON
//! verdict. The engine's confidence is overwritten by a deterministic
//! per-source breakdown computed from evidence counts and penalties for
//! uncertainties and contradictions. Engine failure fails closed:
//! posture ESCALATE, confidence 0.25.

use crate::agents::{AgentContext, AgentOutcome, RoleAgent};
use crate::belief::BeliefState;
use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::graph::types::{ClaimStatus, NodeType, TraceEventType};
use crate::llm::{ChatMessage, NarrativeEngine};
use crate::signals::derive::SIGNAL_EDGE_TYPES;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::warn;

const RISK_SYSTEM_PROMPT: &str = "You are a SUPPLY CHAIN RISK QUANTIFICATION specialist for air \
freight forwarders. Assess the operational exposure of the airport from the structured signals \
provided and recommend a gateway posture.\n\
Posture guide: ground stop at a hub -> HOLD; ground delay program or IFR weather without FAA \
action -> RESTRICT; closure -> ESCALATE; all sources normal and consistent -> ACCEPT; sources \
contradict and exposure is unclear -> ESCALATE.\n\
Respond with JSON only: {\"reasoning\": ..., \"risk_factors\": [...], \"mitigating_factors\": \
[...], \"overall_severity\": 0..1, \"risk_level\": \"LOW|MEDIUM|HIGH|CRITICAL\", \
\"recommended_posture\": \"ACCEPT|RESTRICT|HOLD|ESCALATE\", \"confidence\": 0..1, \
\"rationale\": ...}";

/// Claim-text prefixes owned by this agent; cleared before re-assessment
/// so a critic-forced re-run does not duplicate them in the packet.
const OWNED_CLAIM_PREFIXES: [&str; 2] = ["Risk level is", "Risk factor identified:"];

/// LLM-backed risk assessment with deterministic confidence.
pub struct RiskQuantAgent;

#[async_trait]
impl RoleAgent for RiskQuantAgent {
    async fn run(&self, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome> {
        let icao = ctx.belief.airport_icao.clone().unwrap_or_default();
        let signals = self.load_signals(ctx.store, &icao)?;
        let cascade = ctx.store.cascade_from_airport(&icao).ok();

        let context = build_context(&icao, &signals, cascade.as_ref(), ctx.belief);
        let mut assessment = match ctx
            .engine
            .complete_json(RISK_SYSTEM_PROMPT, &[ChatMessage::user(context)], 0.0)
            .await
        {
            Ok(response) => normalize(response),
            Err(e) => {
                warn!(case = %ctx.case.id, error = %e, "risk engine unavailable, failing closed");
                fail_closed(&e.to_string())
            }
        };

        let (confidence, breakdown) = confidence_with_breakdown(ctx.store, ctx.belief, &signals)?;
        assessment["confidence"] = json!(confidence);
        assessment["confidence_breakdown"] = breakdown;
        assessment["evidence_count"] = json!(ctx.belief.evidence_count());
        assessment["uncertainty_count"] = json!(ctx.belief.uncertainty_count());
        assessment["contradiction_count"] = json!(ctx.belief.contradiction_count());

        self.persist_claims(ctx, &assessment)?;

        ctx.store.append_trace(
            ctx.case.id,
            TraceEventType::ToolResult,
            Some("risk_assessment"),
            None,
            json!({
                "risk_level": assessment["risk_level"],
                "recommended_posture": assessment["recommended_posture"],
                "confidence": assessment["confidence"],
                "confidence_breakdown": assessment["confidence_breakdown"],
                "rationale": assessment["rationale"],
            }),
        )?;
        ctx.belief.increment_tool_calls(1);

        Ok(AgentOutcome::RiskAssessed(assessment))
    }
}

/// Most recent signal attrs per kind.
#[derive(Debug, Default)]
pub struct SignalSet {
    pub faa: Option<Value>,
    pub weather: Option<Value>,
    pub movement: Option<Value>,
    pub alerts: Vec<Value>,
}

impl RiskQuantAgent {
    fn load_signals(&self, store: &GraphStore, icao: &str) -> Result<SignalSet> {
        let mut signals = SignalSet::default();
        let airport = match store.get_node_by_identifier(NodeType::Airport, icao)? {
            Some(node) => node,
            None => return Ok(signals),
        };

        for edge in store.latest_edges_per_source(airport.id, &SIGNAL_EDGE_TYPES, Utc::now())? {
            match edge.edge_type.as_str() {
                t if t.contains("FAA_DISRUPTION") => signals.faa = Some(edge.attrs),
                t if t.contains("WEATHER_RISK") => signals.weather = Some(edge.attrs),
                t if t.contains("MOVEMENT_COLLAPSE") => signals.movement = Some(edge.attrs),
                t if t.contains("NWS_ALERT") => signals.alerts.push(edge.attrs),
                _ => {}
            }
        }
        Ok(signals)
    }

    fn persist_claims(&self, ctx: &mut AgentContext<'_>, assessment: &Value) -> Result<()> {
        // A re-assessment replaces the earlier hypothesis claims.
        let removed = ctx
            .store
            .unlink_case_claims_by_prefix(ctx.case.id, &OWNED_CLAIM_PREFIXES)?;
        ctx.belief.claim_ids.retain(|id| !removed.contains(id));

        let risk_level = assessment["risk_level"].as_str().unwrap_or("MEDIUM");
        let posture = assessment["recommended_posture"].as_str().unwrap_or("HOLD");
        let confidence = assessment["confidence"].as_f64().unwrap_or(0.5);
        let rationale = assessment["rationale"].as_str().unwrap_or("");

        let claim = ctx.store.create_claim(
            &format!(
                "Risk level is {}. Recommended posture: {}. {}",
                risk_level, posture, rationale
            ),
            None,
            confidence,
            ClaimStatus::Hypothesis,
            Some(Utc::now()),
        )?;
        for evidence_id in ctx.belief.valid_evidence_ids.iter().take(3) {
            ctx.store.bind_claim_evidence(claim.id, *evidence_id)?;
        }
        ctx.store.append_trace(
            ctx.case.id,
            TraceEventType::ToolResult,
            Some("claim"),
            Some(&claim.id.to_string()),
            json!({"risk_level": risk_level, "posture": posture, "confidence": confidence}),
        )?;
        ctx.belief.claim_ids.push(claim.id);

        if let Some(factors) = assessment["risk_factors"].as_array() {
            for factor in factors.iter().take(5) {
                let text = factor.as_str().unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                let factor_claim = ctx.store.create_claim(
                    &format!("Risk factor identified: {}", text),
                    None,
                    confidence * 0.8,
                    ClaimStatus::Hypothesis,
                    Some(Utc::now()),
                )?;
                ctx.store.append_trace(
                    ctx.case.id,
                    TraceEventType::ToolResult,
                    Some("claim"),
                    Some(&factor_claim.id.to_string()),
                    json!({"risk_factor": text}),
                )?;
                ctx.belief.claim_ids.push(factor_claim.id);
            }
        }
        Ok(())
    }
}

fn build_context(
    icao: &str,
    signals: &SignalSet,
    cascade: Option<&crate::graph::traversal::CascadeImpact>,
    belief: &BeliefState,
) -> String {
    let mut parts = Vec::new();
    parts.push(format!("## Airport: {}", icao));

    parts.push("## FAA NAS Status".to_string());
    match &signals.faa {
        Some(faa) => parts.push(faa.to_string()),
        None => parts.push("No FAA disruption data available".to_string()),
    }

    parts.push("## Current Weather (METAR)".to_string());
    match &signals.weather {
        Some(weather) => parts.push(weather.to_string()),
        None => parts.push("No weather data available".to_string()),
    }

    parts.push("## NWS Weather Alerts".to_string());
    if signals.alerts.is_empty() {
        parts.push("No active weather alerts".to_string());
    } else {
        for alert in &signals.alerts {
            parts.push(alert.to_string());
        }
    }

    parts.push("## Aircraft Movement".to_string());
    match &signals.movement {
        Some(movement) => parts.push(
            json!({
                "aircraft_count": movement.get("aircraft_count"),
                "delta_percent": movement.get("delta_percent"),
                "movement_severity": movement.get("severity"),
            })
            .to_string(),
        ),
        None => parts.push("No movement data available".to_string()),
    }

    parts.push("## Uncertainties".to_string());
    for uncertainty in belief.open_uncertainties() {
        parts.push(format!("- {}", uncertainty.question));
    }

    parts.push("## Contradictions".to_string());
    for contradiction in &belief.contradictions {
        parts.push(format!(
            "- {}: {}",
            contradiction.contradiction_type, contradiction.why_it_matters
        ));
    }

    if let Some(cascade) = cascade {
        parts.push("## Cascade Impact".to_string());
        parts.push(
            json!({
                "affected_flights": cascade.total_flights,
                "affected_shipments": cascade.total_shipments,
                "affected_bookings": cascade.total_bookings,
                "revenue_at_risk_usd": cascade.total_revenue_at_risk,
                "sla_at_risk": cascade.sla_at_risk_count,
            })
            .to_string(),
        );
    }

    parts.push("## Structured Summary".to_string());
    parts.push(
        json!({
            "evidence_count": belief.evidence_count(),
            "valid_evidence_count": belief.valid_evidence_count(),
            "uncertainty_count": belief.uncertainty_count(),
            "contradiction_count": belief.contradiction_count(),
        })
        .to_string(),
    );

    parts.join("\n")
}

fn normalize(mut response: Value) -> Value {
    const POSTURES: [&str; 4] = ["ACCEPT", "RESTRICT", "HOLD", "ESCALATE"];
    const LEVELS: [&str; 4] = ["LOW", "MEDIUM", "HIGH", "CRITICAL"];

    if !response.is_object() {
        response = json!({});
    }

    let posture = response["recommended_posture"].as_str().unwrap_or("HOLD");
    if !POSTURES.contains(&posture) {
        response["recommended_posture"] = json!("HOLD");
    }
    let level = response["risk_level"].as_str().unwrap_or("MEDIUM");
    if !LEVELS.contains(&level) {
        response["risk_level"] = json!("MEDIUM");
    }

    let severity = response["overall_severity"].as_f64().unwrap_or(0.5);
    response["overall_severity"] = json!(severity.clamp(0.0, 1.0));
    let confidence = response["confidence"].as_f64().unwrap_or(0.5);
    response["confidence"] = json!(confidence.clamp(0.0, 1.0));

    for key in ["reasoning", "rationale"] {
        if !response[key].is_string() {
            response[key] = json!("");
        }
    }
    if !response["risk_factors"].is_array() {
        response["risk_factors"] = json!([]);
    }
    if !response["mitigating_factors"].is_array() {
        response["mitigating_factors"] = json!([]);
    }
    response
}

fn fail_closed(reason: &str) -> Value {
    json!({
        "reasoning": format!("Risk engine unavailable ({}). Failing closed.", reason),
        "risk_factors": ["LLM_UNAVAILABLE"],
        "mitigating_factors": [],
        "overall_severity": 0.8,
        "risk_level": "HIGH",
        "recommended_posture": "ESCALATE",
        "confidence": 0.25,
        "rationale": "Risk engine unavailable; escalate to duty manager for review.",
    })
}

/// Deterministic confidence: per-source credit, penalties for open
/// uncertainties and contradictions, a small evidence boost, clamped to
/// [0.25, 0.95].
fn confidence_with_breakdown(
    store: &GraphStore,
    belief: &BeliefState,
    signals: &SignalSet,
) -> Result<(f64, Value)> {
    let mut confidence = 0.30;
    let mut sources = serde_json::Map::new();
    let mut penalties = serde_json::Map::new();
    let mut boosts = serde_json::Map::new();

    let evidence = store.evidence_for_case(belief.case_id)?;
    let present: HashSet<&str> = evidence.iter().map(|e| e.source_system.as_str()).collect();
    let failed: HashSet<&str> = evidence
        .iter()
        .filter(|e| e.excerpt.contains("api_error"))
        .map(|e| e.source_system.as_str())
        .collect();

    let credit = |name: &str,
                      has_signal: bool,
                      full: f64,
                      error_credit: f64,
                      confidence: &mut f64,
                      sources: &mut serde_json::Map<String, Value>| {
        if has_signal || (present.contains(name) && !failed.contains(name)) {
            *confidence += full;
            sources.insert(
                name.to_string(),
                json!(format!("+{}% (source available)", (full * 100.0) as i64)),
            );
        } else if failed.contains(name) {
            *confidence += error_credit;
            sources.insert(
                name.to_string(),
                json!(format!(
                    "+{}% (API error - data unavailable)",
                    (error_credit * 100.0) as i64
                )),
            );
        } else {
            sources.insert(name.to_string(), json!("missing"));
        }
    };

    credit("METAR", signals.weather.is_some(), 0.18, 0.04, &mut confidence, &mut sources);
    credit("FAA_NAS", signals.faa.is_some(), 0.18, 0.04, &mut confidence, &mut sources);
    credit("ADSB", signals.movement.is_some(), 0.12, 0.02, &mut confidence, &mut sources);
    credit("NWS_ALERTS", !signals.alerts.is_empty(), 0.08, 0.02, &mut confidence, &mut sources);
    credit("TAF", false, 0.06, 0.01, &mut confidence, &mut sources);

    let uncertainty_count = belief.uncertainty_count();
    if uncertainty_count > 0 {
        let penalty = (uncertainty_count as f64 * 0.04).min(0.20);
        confidence -= penalty;
        penalties.insert(
            "uncertainties".to_string(),
            json!(format!("-{}% ({} unresolved)", (penalty * 100.0) as i64, uncertainty_count)),
        );
    }

    let contradiction_count = belief.contradiction_count();
    if contradiction_count > 0 {
        let penalty = (contradiction_count as f64 * 0.10).min(0.20);
        confidence -= penalty;
        penalties.insert(
            "contradictions".to_string(),
            json!(format!("-{}% ({} detected)", (penalty * 100.0) as i64, contradiction_count)),
        );
    }

    let evidence_count = belief.evidence_count();
    if evidence_count > 0 {
        let boost = (evidence_count as f64 * 0.01).min(0.05);
        confidence += boost;
        boosts.insert(
            "evidence_count".to_string(),
            json!(format!("+{}% ({} pieces)", (boost * 100.0) as i64, evidence_count)),
        );
    }

    let final_confidence = confidence.clamp(0.25, 0.95);
    let breakdown = json!({
        "base": 0.30,
        "sources": sources,
        "penalties": penalties,
        "boosts": boosts,
        "final": final_confidence,
    });
    Ok((final_confidence, breakdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::CaseType;
    use uuid::Uuid;

    #[test]
    fn test_normalize_rejects_bad_values() {
        let normalized = normalize(json!({
            "recommended_posture": "PANIC",
            "risk_level": "EXTREME",
            "overall_severity": 7.0,
            "confidence": -2.0,
        }));
        assert_eq!(normalized["recommended_posture"], "HOLD");
        assert_eq!(normalized["risk_level"], "MEDIUM");
        assert_eq!(normalized["overall_severity"], 1.0);
        assert_eq!(normalized["confidence"], 0.0);
    }

    #[test]
    fn test_fail_closed_defaults() {
        let verdict = fail_closed("timeout");
        assert_eq!(verdict["recommended_posture"], "ESCALATE");
        assert_eq!(verdict["risk_level"], "HIGH");
        assert_eq!(verdict["confidence"], 0.25);
    }

    #[test]
    fn test_confidence_floor_without_sources() {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        let belief = BeliefState::new(case.id, 10, 50);
        let signals = SignalSet::default();

        let (confidence, breakdown) =
            confidence_with_breakdown(&store, &belief, &signals).unwrap();
        assert!((confidence - 0.30).abs() < 1e-9);
        assert_eq!(breakdown["sources"]["METAR"], "missing");
    }

    #[test]
    fn test_confidence_penalized_by_contradictions() {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        let mut belief = BeliefState::new(case.id, 10, 50);
        belief.add_contradiction(crate::belief::ContradictionRef {
            claim_a: Uuid::new_v4(),
            claim_b: Uuid::new_v4(),
            contradiction_type: "FAA_WEATHER_MISMATCH".to_string(),
            why_it_matters: "mismatch".to_string(),
            resolved: false,
        });

        let mut signals = SignalSet::default();
        signals.faa = Some(json!({"has_disruption": false}));
        signals.weather = Some(json!({"severity": "HIGH"}));

        let (with_contradiction, _) =
            confidence_with_breakdown(&store, &belief, &signals).unwrap();
        belief.contradictions.clear();
        let (without, _) = confidence_with_breakdown(&store, &belief, &signals).unwrap();

        assert!(with_contradiction < without);
    }

    #[test]
    fn test_context_carries_structured_summary() {
        let belief = BeliefState::new(Uuid::new_v4(), 10, 50);
        let context = build_context("KJFK", &SignalSet::default(), None, &belief);
        assert!(context.contains("\"contradiction_count\":0"));
        assert!(context.contains("## Airport: KJFK"));
    }
}
