//! Contradiction detection between derived signals.
//!
//! After derivation, pairwise checks compare the most recent FACT edge
//! per source for the airport. Each hit creates two opposing claim rows
//! and one OPEN contradiction row.

use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::graph::types::ClaimStatus;
use crate::signals::derive::SIGNAL_EDGE_TYPES;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub const FAA_WEATHER_MISMATCH: &str = "FAA_WEATHER_MISMATCH";
pub const FAA_MOVEMENT_MISMATCH: &str = "FAA_MOVEMENT_MISMATCH";
pub const WEATHER_MOVEMENT_MISMATCH: &str = "WEATHER_MOVEMENT_MISMATCH";
pub const NWS_FAA_MISMATCH: &str = "NWS_FAA_MISMATCH";

/// A persisted contradiction with its two opposing claims.
#[derive(Debug, Clone)]
pub struct DetectedContradiction {
    pub contradiction_id: Uuid,
    pub claim_a: Uuid,
    pub claim_b: Uuid,
    pub contradiction_type: String,
    pub severity: String,
    pub explanation: String,
}

struct Finding {
    contradiction_type: &'static str,
    severity: &'static str,
    claim_a_text: String,
    claim_b_text: String,
    explanation: String,
}

/// Run all pairwise checks for an airport at `at` and persist the hits.
/// Types in `skip_types` are already recorded for the case and are not
/// re-persisted.
pub fn detect_and_persist(
    store: &GraphStore,
    airport_node: Uuid,
    icao: &str,
    at: DateTime<Utc>,
    skip_types: &[String],
) -> Result<Vec<DetectedContradiction>> {
    let edges = store.latest_edges_per_source(airport_node, &SIGNAL_EDGE_TYPES, at)?;

    let mut faa: Option<&Value> = None;
    let mut weather: Option<&Value> = None;
    let mut movement: Option<&Value> = None;
    let mut nws_alerts: Vec<&Value> = Vec::new();

    for edge in &edges {
        match edge.edge_type.as_str() {
            t if t.contains("FAA_DISRUPTION") => faa = Some(&edge.attrs),
            t if t.contains("WEATHER_RISK") => weather = Some(&edge.attrs),
            t if t.contains("MOVEMENT_COLLAPSE") => movement = Some(&edge.attrs),
            t if t.contains("NWS_ALERT") => nws_alerts.push(&edge.attrs),
            _ => {}
        }
    }

    let mut findings = Vec::new();
    if let (Some(faa), Some(weather)) = (faa, weather) {
        if let Some(finding) = check_faa_weather(icao, faa, weather) {
            findings.push(finding);
        }
    }
    if let (Some(faa), Some(movement)) = (faa, movement) {
        if let Some(finding) = check_faa_movement(icao, faa, movement) {
            findings.push(finding);
        }
    }
    if let (Some(weather), Some(movement)) = (weather, movement) {
        if let Some(finding) = check_weather_movement(icao, weather, movement) {
            findings.push(finding);
        }
    }
    if let Some(faa) = faa {
        for alert in &nws_alerts {
            if let Some(finding) = check_nws_faa(icao, alert, faa) {
                findings.push(finding);
                break;
            }
        }
    }

    findings
        .into_iter()
        .filter(|f| !skip_types.iter().any(|t| t == f.contradiction_type))
        .map(|finding| persist_finding(store, airport_node, finding))
        .collect()
}

fn faa_is_normal(faa: &Value) -> bool {
    !faa.get("has_disruption").and_then(Value::as_bool).unwrap_or_else(|| {
        faa.get("delay").and_then(Value::as_bool).unwrap_or(false)
            || faa.get("closure").and_then(Value::as_bool).unwrap_or(false)
    })
}

fn check_faa_weather(icao: &str, faa: &Value, weather: &Value) -> Option<Finding> {
    let flight_cat = weather.get("flight_category").and_then(Value::as_str).unwrap_or("");
    let severity = weather.get("severity").and_then(Value::as_str).unwrap_or("");
    let weather_bad = matches!(flight_cat, "IFR" | "LIFR") || severity == "HIGH";

    if faa_is_normal(faa) && weather_bad {
        return Some(Finding {
            contradiction_type: FAA_WEATHER_MISMATCH,
            severity: "HIGH",
            claim_a_text: format!("FAA reports normal operations at {}", icao),
            claim_b_text: format!(
                "Weather at {} shows {} conditions with {} risk",
                icao, flight_cat, severity
            ),
            explanation: format!(
                "FAA reports normal operations but weather shows {} conditions with {} risk",
                flight_cat, severity
            ),
        });
    }
    None
}

fn check_faa_movement(icao: &str, faa: &Value, movement: &Value) -> Option<Finding> {
    let is_ground_stop = faa
        .get("delay_type")
        .and_then(Value::as_str)
        .map(|t| t.eq_ignore_ascii_case("Ground Stop"))
        .unwrap_or(false);
    let count = movement.get("aircraft_count").and_then(Value::as_i64).unwrap_or(0);

    if is_ground_stop && count > 50 {
        return Some(Finding {
            contradiction_type: FAA_MOVEMENT_MISMATCH,
            severity: "HIGH",
            claim_a_text: format!("FAA reports a ground stop at {}", icao),
            claim_b_text: format!("{} aircraft are moving in the {} area", count, icao),
            explanation: format!(
                "FAA reports a ground stop but {} aircraft are active in the area",
                count
            ),
        });
    }
    None
}

fn check_weather_movement(icao: &str, weather: &Value, movement: &Value) -> Option<Finding> {
    let weather_good = weather.get("flight_category").and_then(Value::as_str) == Some("VFR")
        && weather.get("severity").and_then(Value::as_str) == Some("LOW");
    let movement_severity = movement.get("severity").and_then(Value::as_str).unwrap_or("");

    if weather_good && movement_severity == "HIGH" {
        let count = movement.get("aircraft_count").and_then(Value::as_i64).unwrap_or(0);
        return Some(Finding {
            contradiction_type: WEATHER_MOVEMENT_MISMATCH,
            severity: "MEDIUM",
            claim_a_text: format!("Weather at {} is VFR with low risk", icao),
            claim_b_text: format!(
                "Aircraft movement at {} collapsed to {} aircraft",
                icao, count
            ),
            explanation: "Weather is VFR but aircraft movement shows HIGH-severity collapse"
                .to_string(),
        });
    }
    None
}

fn check_nws_faa(icao: &str, alert: &Value, faa: &Value) -> Option<Finding> {
    let nws_severity = alert.get("severity").and_then(Value::as_str).unwrap_or("");
    let nws_severe = matches!(nws_severity, "Severe" | "Extreme");

    if nws_severe && faa_is_normal(faa) {
        let event = alert.get("event").and_then(Value::as_str).unwrap_or("weather alert");
        return Some(Finding {
            contradiction_type: NWS_FAA_MISMATCH,
            severity: "MEDIUM",
            claim_a_text: format!("NWS has an active {} ({}) near {}", event, nws_severity, icao),
            claim_b_text: format!("FAA reports normal operations at {}", icao),
            explanation: format!(
                "NWS reports {} severity '{}' but FAA shows no action yet - possibly a developing situation",
                nws_severity, event
            ),
        });
    }
    None
}

fn persist_finding(
    store: &GraphStore,
    airport_node: Uuid,
    finding: Finding,
) -> Result<DetectedContradiction> {
    let claim_a = store.create_claim(
        &finding.claim_a_text,
        Some(airport_node),
        0.7,
        ClaimStatus::Hypothesis,
        Some(Utc::now()),
    )?;
    let claim_b = store.create_claim(
        &finding.claim_b_text,
        Some(airport_node),
        0.7,
        ClaimStatus::Hypothesis,
        Some(Utc::now()),
    )?;
    let contradiction = store.insert_contradiction(
        claim_a.id,
        claim_b.id,
        finding.contradiction_type,
        &finding.explanation,
    )?;

    Ok(DetectedContradiction {
        contradiction_id: contradiction.id,
        claim_a: claim_a.id,
        claim_b: claim_b.id,
        contradiction_type: finding.contradiction_type.to_string(),
        severity: finding.severity.to_string(),
        explanation: finding.explanation,
    })
}
