//! Aviation Weather Center client: METAR observations and TAF forecasts.
//!
//! Endpoints:
//! - METAR: `{base}/api/data/metar?ids={icao}&format=json`
//! - TAF:   `{base}/api/data/taf?ids={icao}&format=json`

use crate::error::Result;
use crate::ingestion::http::HttpFetcher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current conditions at an airport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetarObservation {
    pub icao: String,
    pub observation_time: Option<DateTime<Utc>>,
    pub raw_text: String,
    pub wind_direction: Option<i64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub visibility_miles: Option<f64>,
    pub ceiling_feet: Option<i64>,
    pub ceiling_type: Option<String>,
    /// Weather phenomena string, e.g. `+TSRA`.
    pub weather: Option<String>,
    /// VFR | MVFR | IFR | LIFR
    pub flight_category: Option<String>,
    pub temp_c: Option<f64>,
    pub dewpoint_c: Option<f64>,
    pub retrieved_at: DateTime<Utc>,
}

/// Forecast window for an airport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TafForecast {
    pub icao: String,
    pub issue_time: Option<DateTime<Utc>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub raw_text: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Client for the Aviation Weather Center data API.
#[derive(Debug, Clone)]
pub struct AviationWeatherClient {
    fetcher: HttpFetcher,
    base_url: String,
}

impl AviationWeatherClient {
    pub fn new(fetcher: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    /// Fetch the latest METAR. `None` when the station has no recent
    /// observation.
    pub async fn fetch_metar(&self, icao: &str) -> Result<Option<MetarObservation>> {
        let url = format!("{}/api/data/metar", self.base_url);
        let body = self
            .fetcher
            .get_json(
                "METAR",
                &url,
                &[
                    ("ids", icao.to_uppercase()),
                    ("format", "json".to_string()),
                ],
            )
            .await?;

        Ok(body
            .as_array()
            .and_then(|arr| arr.first())
            .map(|obs| parse_metar(obs, Utc::now())))
    }

    /// Fetch the latest TAF. `None` when no forecast is published.
    pub async fn fetch_taf(&self, icao: &str) -> Result<Option<TafForecast>> {
        let url = format!("{}/api/data/taf", self.base_url);
        let body = self
            .fetcher
            .get_json(
                "TAF",
                &url,
                &[
                    ("ids", icao.to_uppercase()),
                    ("format", "json".to_string()),
                ],
            )
            .await?;

        Ok(body
            .as_array()
            .and_then(|arr| arr.first())
            .map(|taf| parse_taf(taf, Utc::now())))
    }
}

fn get_f64(obj: &Value, key: &str) -> Option<f64> {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        // The feed reports unlimited visibility as "10+".
        Some(Value::String(s)) => s.trim_end_matches('+').parse().ok(),
        _ => None,
    }
}

fn get_time(obj: &Value, key: &str) -> Option<DateTime<Utc>> {
    match obj.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Parse one METAR entry from the feed.
pub fn parse_metar(obs: &Value, retrieved_at: DateTime<Utc>) -> MetarObservation {
    // Lowest broken or overcast layer is the ceiling.
    let mut ceiling_feet = None;
    let mut ceiling_type = None;
    if let Some(clouds) = obs.get("clouds").and_then(Value::as_array) {
        for cloud in clouds {
            let cover = cloud.get("cover").and_then(Value::as_str).unwrap_or("");
            if cover == "BKN" || cover == "OVC" {
                let base = cloud.get("base").and_then(Value::as_i64);
                if base.is_some() && (ceiling_feet.is_none() || base < ceiling_feet) {
                    ceiling_feet = base;
                    ceiling_type = Some(cover.to_string());
                }
            }
        }
    }

    MetarObservation {
        icao: obs
            .get("icaoId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        observation_time: get_time(obs, "obsTime"),
        raw_text: obs
            .get("rawOb")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        wind_direction: obs.get("wdir").and_then(Value::as_i64),
        wind_speed: get_f64(obs, "wspd"),
        wind_gust: get_f64(obs, "wgst"),
        visibility_miles: get_f64(obs, "visib"),
        ceiling_feet,
        ceiling_type,
        weather: obs
            .get("wxString")
            .and_then(Value::as_str)
            .map(str::to_string),
        flight_category: obs
            .get("fltcat")
            .and_then(Value::as_str)
            .map(str::to_string),
        temp_c: get_f64(obs, "temp"),
        dewpoint_c: get_f64(obs, "dewp"),
        retrieved_at,
    }
}

/// Parse one TAF entry from the feed.
pub fn parse_taf(taf: &Value, retrieved_at: DateTime<Utc>) -> TafForecast {
    TafForecast {
        icao: taf
            .get("icaoId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        issue_time: get_time(taf, "issueTime"),
        valid_from: get_time(taf, "validTimeFrom"),
        valid_to: get_time(taf, "validTimeTo"),
        raw_text: taf
            .get("rawTAF")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        retrieved_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_metar_ifr() {
        let obs = json!({
            "icaoId": "KJFK",
            "rawOb": "KJFK 011251Z 25025G35KT 1/2SM +TSRA OVC005 18/17 A2960",
            "wdir": 250,
            "wspd": 25,
            "wgst": 35,
            "visib": 0.5,
            "clouds": [{"cover": "OVC", "base": 500}],
            "wxString": "+TSRA",
            "fltcat": "IFR",
            "temp": 18.0,
            "dewp": 17.0
        });
        let metar = parse_metar(&obs, Utc::now());

        assert_eq!(metar.icao, "KJFK");
        assert_eq!(metar.flight_category.as_deref(), Some("IFR"));
        assert_eq!(metar.wind_gust, Some(35.0));
        assert_eq!(metar.visibility_miles, Some(0.5));
        assert_eq!(metar.ceiling_feet, Some(500));
    }

    #[test]
    fn test_parse_metar_unlimited_visibility() {
        let obs = json!({"icaoId": "KLAX", "visib": "10+", "fltcat": "VFR"});
        let metar = parse_metar(&obs, Utc::now());
        assert_eq!(metar.visibility_miles, Some(10.0));
        assert!(metar.ceiling_feet.is_none());
    }

    #[test]
    fn test_parse_metar_lowest_ceiling_wins() {
        let obs = json!({
            "icaoId": "KORD",
            "clouds": [
                {"cover": "SCT", "base": 800},
                {"cover": "OVC", "base": 2500},
                {"cover": "BKN", "base": 1200}
            ]
        });
        let metar = parse_metar(&obs, Utc::now());
        assert_eq!(metar.ceiling_feet, Some(1200));
        assert_eq!(metar.ceiling_type.as_deref(), Some("BKN"));
    }

    #[test]
    fn test_parse_taf() {
        let taf = json!({
            "icaoId": "KJFK",
            "rawTAF": "KJFK 011130Z 0112/0218 25012KT P6SM SCT040",
            "issueTime": "2026-01-01T11:30:00Z",
            "validTimeFrom": "2026-01-01T12:00:00Z",
            "validTimeTo": "2026-01-02T18:00:00Z"
        });
        let parsed = parse_taf(&taf, Utc::now());
        assert_eq!(parsed.icao, "KJFK");
        assert!(parsed.valid_from.is_some());
        assert!(parsed.valid_to.is_some());
    }
}
