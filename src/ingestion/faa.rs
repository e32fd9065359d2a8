//! FAA NAS status client.
//!
//! Reports ground stops, ground delay programs and closures for US
//! airports. Absence of an entry means no disruptions reported, which is
//! itself a signal downstream components reason about.

use crate::error::Result;
use crate::ingestion::http::HttpFetcher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Airport status extracted from the NAS status feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaaStatus {
    pub icao: String,
    pub delay: bool,
    pub delay_type: Option<String>,
    pub reason: Option<String>,
    pub avg_delay_minutes: Option<i64>,
    pub closure: bool,
    pub retrieved_at: DateTime<Utc>,
}

impl FaaStatus {
    /// True when the airport has any active disruption.
    pub fn has_disruption(&self) -> bool {
        self.delay || self.closure
    }
}

/// Client for the FAA NAS status API.
#[derive(Debug, Clone)]
pub struct FaaClient {
    fetcher: HttpFetcher,
    base_url: String,
}

impl FaaClient {
    pub fn new(fetcher: HttpFetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    /// Fetch status for one airport. `None` means no disruptions reported.
    pub async fn fetch_airport_status(&self, icao: &str) -> Result<Option<FaaStatus>> {
        let url = format!("{}/api/airport-status/{}", self.base_url, icao);
        let body = self
            .fetcher
            .get_json("FAA_NAS", &url, &[("format", "json".to_string())])
            .await?;

        Ok(parse_airport_status(icao, &body, Utc::now()))
    }
}

/// Parse one airport's entry out of the feed body. Entries without a
/// delay or closure collapse to `None`.
pub fn parse_airport_status(icao: &str, body: &Value, retrieved_at: DateTime<Utc>) -> Option<FaaStatus> {
    let entry = if body.get("delay").is_some() || body.get("closure").is_some() {
        body
    } else {
        body.get("status")?
    };

    let delay = entry.get("delay").and_then(Value::as_bool).unwrap_or(false);
    let closure = entry.get("closure").and_then(Value::as_bool).unwrap_or(false);
    if !delay && !closure {
        return None;
    }

    Some(FaaStatus {
        icao: icao.to_string(),
        delay,
        delay_type: entry
            .get("delay_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        reason: entry
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string),
        avg_delay_minutes: entry.get("avg_delay_minutes").and_then(Value::as_i64),
        closure,
        retrieved_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ground_stop() {
        let body = json!({
            "delay": true,
            "delay_type": "Ground Stop",
            "reason": "WX",
            "avg_delay_minutes": 90,
            "closure": false
        });
        let status = parse_airport_status("KJFK", &body, Utc::now()).unwrap();
        assert!(status.delay);
        assert!(status.has_disruption());
        assert_eq!(status.delay_type.as_deref(), Some("Ground Stop"));
        assert_eq!(status.avg_delay_minutes, Some(90));
    }

    #[test]
    fn test_parse_normal_is_none() {
        let body = json!({"delay": false, "closure": false});
        assert!(parse_airport_status("KLAX", &body, Utc::now()).is_none());
    }

    #[test]
    fn test_parse_closure() {
        let body = json!({"delay": false, "closure": true, "reason": "HURRICANE"});
        let status = parse_airport_status("KMIA", &body, Utc::now()).unwrap();
        assert!(status.closure);
        assert!(status.has_disruption());
    }
}
