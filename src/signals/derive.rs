//! Signal derivation from ingested evidence.
//!
//! For each successful source the deriver materializes one typed edge:
//!
//! - `AIRPORT_HAS_FAA_DISRUPTION` - emitted even when FAA reports
//!   normal, so contradiction checks can reason about "FAA says normal"
//! - `AIRPORT_WEATHER_RISK` - severity from fixed rules
//! - `AIRPORT_HAS_NWS_ALERT` - one edge per active alert
//! - `AIRPORT_MOVEMENT_COLLAPSE` - delta against the airport baseline
//!
//! Every derived edge is created DRAFT, bound to its evidence, then
//! promoted to FACT.

use crate::error::Result;
use crate::graph::store::{GraphStore, NewEdge};
use crate::ingestion::registry::{
    AirportIngestion, SOURCE_ADSB, SOURCE_FAA, SOURCE_METAR, SOURCE_NWS,
};
use crate::ingestion::weather::MetarObservation;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

pub const EDGE_FAA_DISRUPTION: &str = "AIRPORT_HAS_FAA_DISRUPTION";
pub const EDGE_WEATHER_RISK: &str = "AIRPORT_WEATHER_RISK";
pub const EDGE_NWS_ALERT: &str = "AIRPORT_HAS_NWS_ALERT";
pub const EDGE_MOVEMENT_COLLAPSE: &str = "AIRPORT_MOVEMENT_COLLAPSE";

/// Signal edge types derived per airport.
pub const SIGNAL_EDGE_TYPES: [&str; 4] = [
    EDGE_FAA_DISRUPTION,
    EDGE_WEATHER_RISK,
    EDGE_NWS_ALERT,
    EDGE_MOVEMENT_COLLAPSE,
];

/// Fallback movement baseline when the airport has no seeded baseline.
pub const DEFAULT_MOVEMENT_BASELINE: f64 = 60.0;

/// Weather phenomena treated as high severity regardless of category:
/// thunderstorm, hail, funnel cloud, sandstorm, duststorm.
const SEVERE_PHENOMENA: [&str; 5] = ["TS", "GR", "FC", "SS", "DS"];

/// Severity from METAR conditions.
pub fn weather_severity(metar: &MetarObservation) -> &'static str {
    if matches!(metar.flight_category.as_deref(), Some("IFR") | Some("LIFR")) {
        return "HIGH";
    }

    if let Some(wx) = &metar.weather {
        if SEVERE_PHENOMENA.iter().any(|p| wx.contains(p)) {
            return "HIGH";
        }
    }

    let wind_speed = metar.wind_speed.unwrap_or(0.0);
    let wind_gust = metar.wind_gust.unwrap_or(0.0);
    if wind_gust >= 35.0 || wind_speed >= 25.0 {
        return "HIGH";
    }
    if wind_gust >= 25.0 || wind_speed >= 15.0 {
        return "MEDIUM";
    }

    if metar.flight_category.as_deref() == Some("MVFR") {
        return "MEDIUM";
    }

    let visibility = metar.visibility_miles.unwrap_or(10.0);
    let ceiling = metar.ceiling_feet.unwrap_or(10_000);
    if visibility < 3.0 || ceiling < 1000 {
        return "MEDIUM";
    }

    "LOW"
}

/// Severity and baseline delta for a movement count.
pub fn movement_metrics(aircraft_count: i64, baseline: f64) -> (&'static str, f64) {
    let baseline = if baseline > 0.0 {
        baseline
    } else {
        DEFAULT_MOVEMENT_BASELINE
    };
    let delta = ((aircraft_count as f64 - baseline) / baseline * 1000.0).round() / 10.0;

    if aircraft_count == 0 {
        ("HIGH", -100.0)
    } else if aircraft_count < 10 {
        ("HIGH", delta)
    } else if aircraft_count < 30 {
        ("MEDIUM", delta)
    } else {
        ("LOW", delta)
    }
}

fn conditions_string(metar: &MetarObservation) -> String {
    let mut parts = Vec::new();
    if let Some(cat) = &metar.flight_category {
        parts.push(cat.clone());
    }
    if let Some(wx) = &metar.weather {
        if !wx.is_empty() {
            parts.push(wx.clone());
        }
    }
    let wind_speed = metar.wind_speed.unwrap_or(0.0);
    if wind_speed >= 15.0 {
        let mut wind = format!("Wind {}kt", wind_speed as i64);
        if let Some(gust) = metar.wind_gust {
            wind.push_str(&format!(" G{}kt", gust as i64));
        }
        parts.push(wind);
    }
    if parts.is_empty() {
        "VFR".to_string()
    } else {
        parts.join(", ")
    }
}

/// Derives signal edges from an ingestion result and persists them.
pub struct SignalDeriver<'a> {
    store: &'a GraphStore,
}

impl<'a> SignalDeriver<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Materialize signal edges for the airport, binding each to its
    /// source evidence and promoting it to FACT. Returns the created
    /// edge ids.
    pub fn derive_and_persist(
        &self,
        airport_node: Uuid,
        ingestion: &AirportIngestion,
        evidence_ids: &HashMap<String, Uuid>,
    ) -> Result<Vec<Uuid>> {
        let mut edge_ids = Vec::new();
        let baseline = self.movement_baseline(airport_node)?;

        // FAA: always emit, even when normal. An absent entry means "no
        // disruptions reported", which is slightly weaker evidence than
        // an explicit status row.
        if ingestion.faa.success {
            let (attrs, confidence, observed_at) = match &ingestion.faa.data {
                Some(status) => (
                    json!({
                        "delay": status.delay,
                        "delay_type": status.delay_type,
                        "reason": status.reason,
                        "avg_delay_minutes": status.avg_delay_minutes,
                        "closure": status.closure,
                        "status": if status.has_disruption() { "DISRUPTED" } else { "NORMAL" },
                        "has_disruption": status.has_disruption(),
                        "inferred_from_absence": false,
                    }),
                    0.95,
                    status.retrieved_at,
                ),
                None => (
                    json!({
                        "delay": false,
                        "delay_type": null,
                        "reason": null,
                        "avg_delay_minutes": null,
                        "closure": false,
                        "status": "NORMAL",
                        "has_disruption": false,
                        "inferred_from_absence": true,
                    }),
                    0.90,
                    ingestion.faa.retrieved_at,
                ),
            };
            edge_ids.push(self.persist_signal(
                airport_node,
                EDGE_FAA_DISRUPTION,
                SOURCE_FAA,
                attrs,
                confidence,
                Some(observed_at),
                None,
                evidence_ids.get(SOURCE_FAA).copied(),
            )?);
        }

        // Weather: one edge from the METAR observation.
        if let Some(metar) = ingestion.metar.data.as_ref().filter(|_| ingestion.metar.success) {
            let severity = weather_severity(metar);
            let attrs = json!({
                "flight_category": metar.flight_category,
                "wind_direction": metar.wind_direction,
                "wind_speed": metar.wind_speed,
                "wind_gust": metar.wind_gust,
                "visibility_miles": metar.visibility_miles,
                "ceiling_feet": metar.ceiling_feet,
                "ceiling_type": metar.ceiling_type,
                "weather": metar.weather.clone().map(|w| vec![w]).unwrap_or_default(),
                "temp_c": metar.temp_c,
                "dewpoint_c": metar.dewpoint_c,
                "raw_metar": metar.raw_text,
                "conditions": conditions_string(metar),
                "severity": severity,
            });
            edge_ids.push(self.persist_signal(
                airport_node,
                EDGE_WEATHER_RISK,
                "AVIATION_WEATHER",
                attrs,
                0.90,
                metar.observation_time.or(Some(metar.retrieved_at)),
                None,
                evidence_ids.get(SOURCE_METAR).copied(),
            )?);
        }

        // NWS: one edge per active alert, bounded by the alert expiry.
        if let Some(alerts) = ingestion.nws.data.as_ref().filter(|_| ingestion.nws.success) {
            for alert in alerts {
                let attrs = json!({
                    "event": alert.event,
                    "severity": alert.severity,
                    "certainty": alert.certainty,
                    "urgency": alert.urgency,
                    "headline": alert.headline,
                    "expires": alert.expires.map(|t| t.to_rfc3339()),
                });
                edge_ids.push(self.persist_signal(
                    airport_node,
                    EDGE_NWS_ALERT,
                    SOURCE_NWS,
                    attrs,
                    0.85,
                    alert.effective.or(Some(alert.retrieved_at)),
                    alert.expires,
                    evidence_ids.get(SOURCE_NWS).copied(),
                )?);
            }
        }

        // Movement: delta against the per-airport baseline.
        if let Some(snapshot) = ingestion.adsb.data.as_ref().filter(|_| ingestion.adsb.success) {
            let (severity, delta_percent) = movement_metrics(snapshot.aircraft_count, baseline);
            let attrs = json!({
                "aircraft_count": snapshot.aircraft_count,
                "timestamp": snapshot.time,
                "baseline": baseline,
                "delta_percent": delta_percent,
                "severity": severity,
            });
            edge_ids.push(self.persist_signal(
                airport_node,
                EDGE_MOVEMENT_COLLAPSE,
                SOURCE_ADSB,
                attrs,
                0.70,
                Some(snapshot.retrieved_at),
                None,
                evidence_ids.get(SOURCE_ADSB).copied(),
            )?);
        }

        Ok(edge_ids)
    }

    fn movement_baseline(&self, airport_node: Uuid) -> Result<f64> {
        let baseline = self
            .store
            .node_version_at(airport_node, Utc::now())?
            .and_then(|v| v.attrs.get("movement_baseline").and_then(Value::as_f64))
            .unwrap_or(DEFAULT_MOVEMENT_BASELINE);
        Ok(baseline)
    }

    #[allow(clippy::too_many_arguments)]
    fn persist_signal(
        &self,
        airport_node: Uuid,
        edge_type: &str,
        source_system: &str,
        attrs: Value,
        confidence: f64,
        event_time_start: Option<chrono::DateTime<Utc>>,
        event_time_end: Option<chrono::DateTime<Utc>>,
        evidence_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let edge = self.store.create_edge(NewEdge {
            src: airport_node,
            // Self-loop: the signal is about the airport itself.
            dst: airport_node,
            edge_type: edge_type.to_string(),
            attrs,
            source_system: source_system.to_string(),
            confidence,
            event_time_start,
            event_time_end,
            valid_from: None,
            valid_to: None,
            supersedes_edge_id: None,
        })?;

        if let Some(evidence_id) = evidence_id {
            self.store.bind_edge_evidence(edge.id, evidence_id)?;
            self.store.promote_edge_to_fact(edge.id)?;
        }

        Ok(edge.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metar(category: &str, wind: f64, gust: f64, vis: f64, ceiling: i64) -> MetarObservation {
        MetarObservation {
            icao: "KJFK".to_string(),
            observation_time: Some(Utc::now()),
            raw_text: String::new(),
            wind_direction: Some(250),
            wind_speed: Some(wind),
            wind_gust: Some(gust),
            visibility_miles: Some(vis),
            ceiling_feet: Some(ceiling),
            ceiling_type: None,
            weather: None,
            flight_category: Some(category.to_string()),
            temp_c: None,
            dewpoint_c: None,
            retrieved_at: Utc::now(),
        }
    }

    #[test]
    fn test_ifr_is_high() {
        assert_eq!(weather_severity(&metar("IFR", 5.0, 0.0, 0.5, 500)), "HIGH");
        assert_eq!(weather_severity(&metar("LIFR", 5.0, 0.0, 0.25, 200)), "HIGH");
    }

    #[test]
    fn test_wind_thresholds() {
        assert_eq!(weather_severity(&metar("VFR", 25.0, 0.0, 10.0, 5000)), "HIGH");
        assert_eq!(weather_severity(&metar("VFR", 10.0, 35.0, 10.0, 5000)), "HIGH");
        assert_eq!(weather_severity(&metar("VFR", 16.0, 0.0, 10.0, 5000)), "MEDIUM");
        assert_eq!(weather_severity(&metar("VFR", 8.0, 0.0, 10.0, 5000)), "LOW");
    }

    #[test]
    fn test_mvfr_and_marginal_conditions() {
        assert_eq!(weather_severity(&metar("MVFR", 5.0, 0.0, 5.0, 2500)), "MEDIUM");
        assert_eq!(weather_severity(&metar("VFR", 5.0, 0.0, 2.5, 5000)), "MEDIUM");
        assert_eq!(weather_severity(&metar("VFR", 5.0, 0.0, 10.0, 900)), "MEDIUM");
    }

    #[test]
    fn test_thunderstorm_phenomena_high() {
        let mut m = metar("VFR", 5.0, 0.0, 10.0, 5000);
        m.weather = Some("+TSRA".to_string());
        assert_eq!(weather_severity(&m), "HIGH");
    }

    #[test]
    fn test_movement_metrics() {
        let (severity, delta) = movement_metrics(0, 60.0);
        assert_eq!((severity, delta), ("HIGH", -100.0));

        let (severity, _) = movement_metrics(8, 60.0);
        assert_eq!(severity, "HIGH");

        let (severity, _) = movement_metrics(15, 60.0);
        assert_eq!(severity, "MEDIUM");

        let (severity, delta) = movement_metrics(120, 60.0);
        assert_eq!(severity, "LOW");
        assert!((delta - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_movement_baseline_fallback() {
        let (_, delta) = movement_metrics(30, 0.0);
        assert!((delta - (-50.0)).abs() < 1e-9);
    }

    proptest::proptest! {
        #[test]
        fn movement_severity_matches_count_bands(count in 0i64..500, baseline in 1.0f64..200.0) {
            let (severity, delta) = movement_metrics(count, baseline);
            match count {
                0..=9 => proptest::prop_assert_eq!(severity, "HIGH"),
                10..=29 => proptest::prop_assert_eq!(severity, "MEDIUM"),
                _ => proptest::prop_assert_eq!(severity, "LOW"),
            }
            proptest::prop_assert!(delta >= -100.0);
        }
    }
}
