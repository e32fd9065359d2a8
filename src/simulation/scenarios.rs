//! Scenario fixtures and the scenario registry.
//!
//! A [`ScenarioRegistry`] implements [`SignalRegistry`] from canned
//! per-airport fixtures, so an end-to-end run exercises the full engine
//! without a network. Simulation registries bypass the evidence cache.

use crate::error::{Error, Result};
use crate::ingestion::adsb::AdsbSnapshot;
use crate::ingestion::faa::FaaStatus;
use crate::ingestion::nws::NwsAlert;
use crate::ingestion::registry::{
    AirportIngestion, IngestionResult, SignalRegistry, SOURCE_ADSB, SOURCE_FAA, SOURCE_METAR,
    SOURCE_NWS, SOURCE_TAF,
};
use crate::ingestion::weather::{MetarObservation, TafForecast};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;

/// Canned source payloads for one airport.
#[derive(Debug, Clone, Default)]
pub struct ScenarioFixture {
    pub faa: Option<FaaStatus>,
    pub faa_fails: bool,
    pub metar: Option<MetarObservation>,
    pub metar_fails: bool,
    pub taf: Option<TafForecast>,
    pub taf_fails: bool,
    pub nws: Vec<NwsAlert>,
    pub nws_fails: bool,
    pub adsb: Option<AdsbSnapshot>,
    pub adsb_fails: bool,
}

/// A named scenario: fixture plus seeding flags.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub icao: String,
    pub fixture: ScenarioFixture,
    /// Seed the operational subgraph for cascade impact.
    pub seed_operational: bool,
    /// Seed booking evidence so shipment-level actions are allowed.
    pub seed_booking_evidence: bool,
}

/// Registry serving canned fixtures.
pub struct ScenarioRegistry {
    fixtures: HashMap<String, ScenarioFixture>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self {
            fixtures: HashMap::new(),
        }
    }

    pub fn with_fixture(mut self, icao: &str, fixture: ScenarioFixture) -> Self {
        self.fixtures.insert(icao.to_uppercase(), fixture);
        self
    }

    pub fn for_scenario(scenario: &Scenario) -> Self {
        Self::new().with_fixture(&scenario.icao, scenario.fixture.clone())
    }
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalRegistry for ScenarioRegistry {
    async fn ingest_airport(&self, icao: &str) -> Result<AirportIngestion> {
        let fixture = self
            .fixtures
            .get(&icao.to_uppercase())
            .ok_or_else(|| Error::Config(format!("no scenario fixture for {}", icao)))?;

        let faa = if fixture.faa_fails {
            IngestionResult::failed(SOURCE_FAA, "simulated timeout after 3 attempts".to_string())
        } else {
            IngestionResult::ok(SOURCE_FAA, fixture.faa.clone())
        };
        let metar = if fixture.metar_fails {
            IngestionResult::failed(SOURCE_METAR, "simulated timeout after 3 attempts".to_string())
        } else {
            IngestionResult::ok(SOURCE_METAR, fixture.metar.clone())
        };
        let taf = if fixture.taf_fails {
            IngestionResult::failed(SOURCE_TAF, "simulated timeout after 3 attempts".to_string())
        } else {
            IngestionResult::ok(SOURCE_TAF, fixture.taf.clone())
        };
        let nws = if fixture.nws_fails {
            IngestionResult::failed(SOURCE_NWS, "simulated timeout after 3 attempts".to_string())
        } else {
            IngestionResult::ok(SOURCE_NWS, Some(fixture.nws.clone()))
        };
        let adsb = if fixture.adsb_fails {
            IngestionResult::failed(SOURCE_ADSB, "simulated timeout after 3 attempts".to_string())
        } else {
            IngestionResult::ok(SOURCE_ADSB, fixture.adsb.clone())
        };

        Ok(AirportIngestion {
            icao: icao.to_uppercase(),
            faa,
            metar,
            taf,
            nws,
            adsb,
            ingested_at: Utc::now(),
        })
    }

    fn is_simulation(&self) -> bool {
        true
    }
}

// ==================== Fixture builders ====================

fn metar(icao: &str, category: &str, vis: f64, wind: f64, gust: Option<f64>, ceiling: Option<i64>, wx: Option<&str>) -> MetarObservation {
    MetarObservation {
        icao: icao.to_string(),
        observation_time: Some(Utc::now()),
        raw_text: format!("{} (simulated)", icao),
        wind_direction: Some(250),
        wind_speed: Some(wind),
        wind_gust: gust,
        visibility_miles: Some(vis),
        ceiling_feet: ceiling,
        ceiling_type: ceiling.map(|_| "OVC".to_string()),
        weather: wx.map(str::to_string),
        flight_category: Some(category.to_string()),
        temp_c: Some(18.0),
        dewpoint_c: Some(16.0),
        retrieved_at: Utc::now(),
    }
}

fn taf(icao: &str) -> TafForecast {
    TafForecast {
        icao: icao.to_string(),
        issue_time: Some(Utc::now()),
        valid_from: Some(Utc::now()),
        valid_to: Some(Utc::now() + Duration::hours(24)),
        raw_text: format!("TAF {} (simulated)", icao),
        retrieved_at: Utc::now(),
    }
}

fn adsb(icao: &str, count: i64) -> AdsbSnapshot {
    AdsbSnapshot {
        icao: icao.to_string(),
        time: Some(Utc::now().timestamp()),
        aircraft_count: count,
        retrieved_at: Utc::now(),
    }
}

fn nws_alert(event: &str, severity: &str) -> NwsAlert {
    NwsAlert {
        event: event.to_string(),
        severity: severity.to_string(),
        certainty: "Observed".to_string(),
        urgency: "Immediate".to_string(),
        headline: format!("{} in effect (simulated)", event),
        effective: Some(Utc::now()),
        expires: Some(Utc::now() + Duration::hours(3)),
        retrieved_at: Utc::now(),
    }
}

/// KJFK ground stop with full evidence: expect HOLD at HIGH risk.
pub fn kjfk_ground_stop() -> Scenario {
    Scenario {
        name: "kjfk-ground-stop".to_string(),
        icao: "KJFK".to_string(),
        fixture: ScenarioFixture {
            faa: Some(FaaStatus {
                icao: "KJFK".to_string(),
                delay: true,
                delay_type: Some("Ground Stop".to_string()),
                reason: Some("WX".to_string()),
                avg_delay_minutes: Some(90),
                closure: false,
                retrieved_at: Utc::now(),
            }),
            metar: Some(metar("KJFK", "IFR", 0.5, 25.0, Some(35.0), Some(500), Some("+TSRA"))),
            taf: Some(taf("KJFK")),
            nws: vec![nws_alert("Severe Thunderstorm Warning", "Severe")],
            adsb: Some(adsb("KJFK", 8)),
            ..ScenarioFixture::default()
        },
        seed_operational: true,
        seed_booking_evidence: false,
    }
}

/// KLAX normal operations: expect ACCEPT at LOW risk.
pub fn klax_normal() -> Scenario {
    Scenario {
        name: "klax-normal".to_string(),
        icao: "KLAX".to_string(),
        fixture: ScenarioFixture {
            faa: None,
            metar: Some(metar("KLAX", "VFR", 10.0, 8.0, None, None, None)),
            taf: Some(taf("KLAX")),
            nws: Vec::new(),
            adsb: Some(adsb("KLAX", 120)),
            ..ScenarioFixture::default()
        },
        seed_operational: false,
        seed_booking_evidence: false,
    }
}

/// Contradictory signals at KORD: FAA normal against LIFR weather and a
/// severe winter storm. Expect a FAA_WEATHER_MISMATCH and one forced
/// re-investigation.
pub fn contradictory_signals() -> Scenario {
    Scenario {
        name: "contradictory-signals".to_string(),
        icao: "KORD".to_string(),
        fixture: ScenarioFixture {
            faa: None,
            metar: Some(metar("KORD", "LIFR", 0.25, 12.0, None, Some(200), Some("SN"))),
            taf: Some(taf("KORD")),
            nws: vec![nws_alert("Winter Storm Warning", "Severe")],
            adsb: Some(adsb("KORD", 15)),
            ..ScenarioFixture::default()
        },
        seed_operational: false,
        seed_booking_evidence: false,
    }
}

/// METAR times out repeatedly: expect the case BLOCKED with a blocking
/// missing-evidence request and no executed posture.
pub fn missing_metar() -> Scenario {
    Scenario {
        name: "missing-metar".to_string(),
        icao: "KBOS".to_string(),
        fixture: ScenarioFixture {
            faa: None,
            metar: None,
            metar_fails: true,
            taf: Some(taf("KBOS")),
            nws: Vec::new(),
            adsb: Some(adsb("KBOS", 60)),
            ..ScenarioFixture::default()
        },
        seed_operational: false,
        seed_booking_evidence: false,
    }
}

/// Approval-gated shipment action: ground stop with booking evidence so
/// HOLD_CARGO is proposed and parks at PENDING_APPROVAL.
pub fn approval_gated_hold() -> Scenario {
    let mut scenario = kjfk_ground_stop();
    scenario.name = "approval-gated-hold".to_string();
    scenario.seed_booking_evidence = true;
    scenario
}

/// All built-in scenarios.
pub fn builtin_scenarios() -> Vec<Scenario> {
    vec![
        kjfk_ground_stop(),
        klax_normal(),
        contradictory_signals(),
        missing_metar(),
        approval_gated_hold(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::registry::SourceStatus;

    #[tokio::test]
    async fn test_registry_serves_fixture() {
        let scenario = kjfk_ground_stop();
        let registry = ScenarioRegistry::for_scenario(&scenario);

        let ingestion = registry.ingest_airport("KJFK").await.unwrap();
        assert!(ingestion.faa.success);
        assert_eq!(
            ingestion.faa.data.as_ref().unwrap().delay_type.as_deref(),
            Some("Ground Stop")
        );
        assert_eq!(ingestion.success_count(), 5);
    }

    #[tokio::test]
    async fn test_missing_metar_marks_api_error() {
        let scenario = missing_metar();
        let registry = ScenarioRegistry::for_scenario(&scenario);
        let ingestion = registry.ingest_airport("KBOS").await.unwrap();

        let records = ingestion.source_records();
        let metar = records.iter().find(|r| r.source == "METAR").unwrap();
        assert_eq!(metar.status, SourceStatus::ApiError);
        assert!(metar.missing.is_some());
    }

    #[tokio::test]
    async fn test_unknown_airport_is_config_error() {
        let registry = ScenarioRegistry::new();
        assert!(registry.ingest_airport("KSEA").await.is_err());
    }

    #[test]
    fn test_registry_bypasses_cache() {
        assert!(ScenarioRegistry::new().is_simulation());
    }
}
