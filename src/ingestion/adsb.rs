//! ADS-B movement client.
//!
//! Source: `{base}/api/states/all?lamin=..&lamax=..&lomin=..&lomax=..`.
//! The aircraft count inside an airport's bounding box is a live proxy
//! for movement; a feed answering `{"states": null}` is degraded data,
//! distinct from an empty box.

use crate::error::Result;
use crate::ingestion::http::HttpFetcher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A point-in-time movement snapshot for an airport's bounding box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdsbSnapshot {
    pub icao: String,
    /// Feed timestamp (unix seconds) when present.
    pub time: Option<i64>,
    pub aircraft_count: i64,
    pub retrieved_at: DateTime<Utc>,
}

/// Bounding box `(lat_min, lat_max, lon_min, lon_max)` around an
/// airport. Unknown airports get a one-degree box centered on the NWS
/// coordinate table.
pub fn airport_bbox(icao: &str) -> (f64, f64, f64, f64) {
    match icao {
        "KJFK" => (40.3, 41.0, -74.2, -73.3),
        "KLAX" => (33.6, 34.3, -118.8, -117.9),
        "KORD" => (41.6, 42.3, -88.4, -87.5),
        "KATL" => (33.3, 34.0, -84.9, -84.0),
        "KDFW" => (32.5, 33.2, -97.5, -96.6),
        "KDEN" => (39.5, 40.2, -105.1, -104.2),
        "KSFO" => (37.3, 38.0, -122.8, -121.9),
        "KSEA" => (47.1, 47.8, -122.7, -121.8),
        "KMIA" => (25.4, 26.1, -80.7, -79.8),
        "KBOS" => (42.0, 42.7, -71.5, -70.6),
        "KMEM" => (34.7, 35.4, -90.4, -89.5),
        "KSDF" => (37.8, 38.5, -86.2, -85.3),
        _ => {
            let (lat, lon) = crate::ingestion::nws::airport_coordinates(icao);
            (lat - 0.5, lat + 0.5, lon - 0.5, lon + 0.5)
        }
    }
}

/// Client for the ADS-B states API.
#[derive(Debug, Clone)]
pub struct AdsbClient {
    fetcher: HttpFetcher,
    base_url: String,
}

impl AdsbClient {
    pub fn new(fetcher: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    /// Fetch the movement snapshot for an airport. `None` means the feed
    /// answered with null states - degraded data, not an empty sky.
    pub async fn fetch_snapshot(&self, icao: &str) -> Result<Option<AdsbSnapshot>> {
        let (lat_min, lat_max, lon_min, lon_max) = airport_bbox(icao);
        let url = format!("{}/api/states/all", self.base_url);
        let body = self
            .fetcher
            .get_json(
                "ADSB",
                &url,
                &[
                    ("lamin", lat_min.to_string()),
                    ("lamax", lat_max.to_string()),
                    ("lomin", lon_min.to_string()),
                    ("lomax", lon_max.to_string()),
                ],
            )
            .await?;

        Ok(parse_snapshot(icao, &body, Utc::now()))
    }
}

/// Parse a states response. Null states collapse to `None`.
pub fn parse_snapshot(icao: &str, body: &Value, retrieved_at: DateTime<Utc>) -> Option<AdsbSnapshot> {
    let states = body.get("states")?;
    if states.is_null() {
        return None;
    }

    let aircraft_count = states.as_array().map(|a| a.len() as i64).unwrap_or(0);
    Some(AdsbSnapshot {
        icao: icao.to_string(),
        time: body.get("time").and_then(Value::as_i64),
        aircraft_count,
        retrieved_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_counts_states() {
        let body = json!({"time": 1_700_000_000, "states": [[], [], []]});
        let snapshot = parse_snapshot("KJFK", &body, Utc::now()).unwrap();
        assert_eq!(snapshot.aircraft_count, 3);
        assert_eq!(snapshot.time, Some(1_700_000_000));
    }

    #[test]
    fn test_parse_null_states_is_degraded() {
        let body = json!({"time": 1_700_000_000, "states": null});
        assert!(parse_snapshot("KJFK", &body, Utc::now()).is_none());
    }

    #[test]
    fn test_parse_empty_states_is_zero() {
        let body = json!({"states": []});
        let snapshot = parse_snapshot("KJFK", &body, Utc::now()).unwrap();
        assert_eq!(snapshot.aircraft_count, 0);
    }

    #[test]
    fn test_bbox_fallback_derives_from_coordinates() {
        let (lat_min, lat_max, _, _) = airport_bbox("KBUF");
        assert!((lat_max - lat_min - 1.0).abs() < 1e-9);
    }
}
