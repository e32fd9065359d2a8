//! NWS active-alerts client.
//!
//! Source: `{base}/alerts/active?point={lat},{lon}`. Alerts carry NWS's
//! own severity taxonomy (Minor, Moderate, Severe, Extreme) which is
//! passed through untouched.

use crate::error::Result;
use crate::ingestion::http::HttpFetcher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An active weather alert near an airport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NwsAlert {
    pub event: String,
    pub severity: String,
    pub certainty: String,
    pub urgency: String,
    pub headline: String,
    pub effective: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub retrieved_at: DateTime<Utc>,
}

/// Coordinates for the airports the engine observes. Lookups outside
/// this table fall back to the continental US centroid so a fetch still
/// returns national-scale alerts rather than failing.
pub fn airport_coordinates(icao: &str) -> (f64, f64) {
    match icao {
        "KJFK" => (40.6413, -73.7781),
        "KLAX" => (33.9416, -118.4085),
        "KORD" => (41.9742, -87.9073),
        "KATL" => (33.6407, -84.4277),
        "KDFW" => (32.8998, -97.0403),
        "KDEN" => (39.8561, -104.6737),
        "KSFO" => (37.6213, -122.3790),
        "KSEA" => (47.4502, -122.3088),
        "KMIA" => (25.7959, -80.2870),
        "KBOS" => (42.3656, -71.0096),
        "KEWR" => (40.6895, -74.1745),
        "KIAH" => (29.9902, -95.3368),
        "KPHX" => (33.4343, -112.0116),
        "KCLT" => (35.2140, -80.9431),
        "KMEM" => (35.0424, -89.9767),
        "KSDF" => (38.1740, -85.7365),
        "KANC" | "PANC" => (61.1743, -149.9982),
        _ => (39.8283, -98.5795),
    }
}

/// Client for the NWS alerts API.
#[derive(Debug, Clone)]
pub struct NwsClient {
    fetcher: HttpFetcher,
    base_url: String,
}

impl NwsClient {
    pub fn new(fetcher: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    /// Fetch active alerts for the point closest to the airport.
    pub async fn fetch_alerts_for_airport(&self, icao: &str) -> Result<Vec<NwsAlert>> {
        let (lat, lon) = airport_coordinates(icao);
        let url = format!("{}/alerts/active", self.base_url);
        let body = self
            .fetcher
            .get_json("NWS_ALERTS", &url, &[("point", format!("{},{}", lat, lon))])
            .await?;

        Ok(parse_alerts(&body, Utc::now()))
    }
}

/// Parse the GeoJSON alert collection.
pub fn parse_alerts(body: &Value, retrieved_at: DateTime<Utc>) -> Vec<NwsAlert> {
    let features = match body.get("features").and_then(Value::as_array) {
        Some(features) => features,
        None => return Vec::new(),
    };

    features
        .iter()
        .filter_map(|f| f.get("properties"))
        .map(|props| NwsAlert {
            event: str_field(props, "event"),
            severity: props
                .get("severity")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            certainty: str_field(props, "certainty"),
            urgency: str_field(props, "urgency"),
            headline: str_field(props, "headline"),
            effective: time_field(props, "effective"),
            expires: time_field(props, "expires"),
            retrieved_at,
        })
        .collect()
}

fn str_field(props: &Value, key: &str) -> String {
    props
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn time_field(props: &Value, key: &str) -> Option<DateTime<Utc>> {
    props
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_alert_feature() {
        let body = json!({
            "features": [{
                "properties": {
                    "event": "Severe Thunderstorm Warning",
                    "severity": "Severe",
                    "certainty": "Observed",
                    "urgency": "Immediate",
                    "headline": "Severe Thunderstorm Warning until 3 PM EDT",
                    "effective": "2026-01-01T12:00:00+00:00",
                    "expires": "2026-01-01T15:00:00+00:00"
                }
            }]
        });
        let alerts = parse_alerts(&body, Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event, "Severe Thunderstorm Warning");
        assert_eq!(alerts[0].severity, "Severe");
        assert!(alerts[0].expires.is_some());
    }

    #[test]
    fn test_parse_empty_collection() {
        let body = json!({"features": []});
        assert!(parse_alerts(&body, Utc::now()).is_empty());
    }

    #[test]
    fn test_known_airport_coordinates() {
        let (lat, lon) = airport_coordinates("KJFK");
        assert!((lat - 40.6413).abs() < 1e-6);
        assert!((lon + 73.7781).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_airport_falls_back() {
        let (lat, _) = airport_coordinates("KXYZ");
        assert!((lat - 39.8283).abs() < 1e-6);
    }
}
