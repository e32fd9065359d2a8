//! Ingestion fan-out across the five signal sources.
//!
//! All sources are fetched concurrently with a per-source ceiling; a
//! slow or failed source never blocks the others. Partial failure is
//! first-class: every failed source carries the missing-evidence
//! request the investigator will persist, with criticality from the
//! source table (FAA/METAR blocking, TAF/NWS degraded, ADS-B
//! informational).

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::graph::types::Criticality;
use crate::ingestion::adsb::{AdsbClient, AdsbSnapshot};
use crate::ingestion::faa::{FaaClient, FaaStatus};
use crate::ingestion::http::HttpFetcher;
use crate::ingestion::nws::{NwsAlert, NwsClient};
use crate::ingestion::weather::{AviationWeatherClient, MetarObservation, TafForecast};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

pub const SOURCE_FAA: &str = "FAA_NAS";
pub const SOURCE_METAR: &str = "METAR";
pub const SOURCE_TAF: &str = "TAF";
pub const SOURCE_NWS: &str = "NWS_ALERTS";
pub const SOURCE_ADSB: &str = "ADSB";

/// The five sources in fan-out order.
pub const ALL_SOURCES: [&str; 5] = [SOURCE_FAA, SOURCE_METAR, SOURCE_TAF, SOURCE_NWS, SOURCE_ADSB];

/// Criticality of a source being unavailable for the decision.
pub fn criticality_for_source(source: &str) -> Criticality {
    match source {
        SOURCE_FAA | SOURCE_METAR => Criticality::Blocking,
        SOURCE_TAF | SOURCE_NWS => Criticality::Degraded,
        _ => Criticality::Informational,
    }
}

/// Evidence excerpt status discriminator. Five records per fetch let
/// the critic distinguish "confirmed normal" from "failed to check".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    HasData,
    NormalOperations,
    NoData,
    ApiError,
    NotFetched,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasData => "has_data",
            Self::NormalOperations => "normal_operations",
            Self::NoData => "no_data",
            Self::ApiError => "api_error",
            Self::NotFetched => "not_fetched",
        }
    }

    /// True when the record counts as valid evidence for the critic.
    pub fn is_valid_evidence(&self) -> bool {
        matches!(self, Self::HasData | Self::NormalOperations | Self::NoData)
    }
}

/// Missing-evidence payload emitted by the fan-out for a failed source.
#[derive(Debug, Clone, Serialize)]
pub struct MissingSignal {
    pub request_type: String,
    pub reason: String,
    pub criticality: Criticality,
}

/// Result of ingestion for a single source.
#[derive(Debug, Clone)]
pub struct IngestionResult<T> {
    pub source: String,
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub retrieved_at: DateTime<Utc>,
    pub missing: Option<MissingSignal>,
}

impl<T> IngestionResult<T> {
    /// Successful fetch; `data: None` means the source answered with no
    /// content (e.g. no disruptions reported).
    pub fn ok(source: &str, data: Option<T>) -> Self {
        Self {
            source: source.to_string(),
            success: true,
            data,
            error: None,
            retrieved_at: Utc::now(),
            missing: None,
        }
    }

    /// Failed fetch carrying the missing-evidence request to persist.
    pub fn failed(source: &str, reason: String) -> Self {
        Self {
            source: source.to_string(),
            success: false,
            data: None,
            error: Some(reason.clone()),
            retrieved_at: Utc::now(),
            missing: Some(MissingSignal {
                request_type: "airport_signal".to_string(),
                reason,
                criticality: criticality_for_source(source),
            }),
        }
    }
}

/// One evidence-row-shaped view of a source attempt.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub source: String,
    pub status: SourceStatus,
    pub payload: Value,
    pub retrieved_at: DateTime<Utc>,
    pub error: Option<String>,
    pub missing: Option<MissingSignal>,
}

/// Combined ingestion result for all sources for an airport.
#[derive(Debug, Clone)]
pub struct AirportIngestion {
    pub icao: String,
    pub faa: IngestionResult<FaaStatus>,
    pub metar: IngestionResult<MetarObservation>,
    pub taf: IngestionResult<TafForecast>,
    pub nws: IngestionResult<Vec<NwsAlert>>,
    pub adsb: IngestionResult<AdsbSnapshot>,
    pub ingested_at: DateTime<Utc>,
}

impl AirportIngestion {
    /// Count of sources that answered.
    pub fn success_count(&self) -> usize {
        [
            self.faa.success,
            self.metar.success,
            self.taf.success,
            self.nws.success,
            self.adsb.success,
        ]
        .iter()
        .filter(|s| **s)
        .count()
    }

    /// One record per source, always five. Every attempt - success,
    /// empty, explicit normal, or error - becomes an evidence row.
    pub fn source_records(&self) -> Vec<SourceRecord> {
        vec![
            record(&self.faa, |r| match &r.data {
                Some(_) => SourceStatus::HasData,
                None => SourceStatus::NormalOperations,
            }),
            record(&self.metar, |r| match &r.data {
                Some(_) => SourceStatus::HasData,
                None => SourceStatus::NoData,
            }),
            record(&self.taf, |r| match &r.data {
                Some(_) => SourceStatus::HasData,
                None => SourceStatus::NoData,
            }),
            record(&self.nws, |r| match &r.data {
                Some(alerts) if !alerts.is_empty() => SourceStatus::HasData,
                _ => SourceStatus::NormalOperations,
            }),
            record(&self.adsb, |r| match &r.data {
                Some(_) => SourceStatus::HasData,
                None => SourceStatus::NoData,
            }),
        ]
    }
}

fn record<T: Serialize>(
    result: &IngestionResult<T>,
    classify: impl Fn(&IngestionResult<T>) -> SourceStatus,
) -> SourceRecord {
    let status = if result.success {
        classify(result)
    } else {
        SourceStatus::ApiError
    };
    SourceRecord {
        source: result.source.clone(),
        status,
        payload: result
            .data
            .as_ref()
            .and_then(|d| serde_json::to_value(d).ok())
            .unwrap_or(Value::Null),
        retrieved_at: result.retrieved_at,
        error: result.error.clone(),
        missing: result.missing.clone(),
    }
}

fn icao_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(K[A-Z0-9]{3}|P[A-Z0-9]{3}|TJ[A-Z0-9]{2}|TI[A-Z0-9]{2})$")
            .unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Validate a US airport ICAO code (K*, P*, TJ*, TI*).
pub fn validate_icao(icao: &str) -> Result<String> {
    let upper = icao.to_uppercase();
    if icao_pattern().is_match(&upper) {
        Ok(upper)
    } else {
        Err(Error::Config(format!(
            "only US airports supported (K*, P*, TJ*, TI*), got: {}",
            icao
        )))
    }
}

/// Capability interface over the signal sources.
///
/// The registry is selected at case-run time and passed into the
/// investigator - simulation swaps in a scenario registry through the
/// same seam instead of patching anything at runtime.
#[async_trait]
pub trait SignalRegistry: Send + Sync {
    /// Fetch all five sources for an airport.
    async fn ingest_airport(&self, icao: &str) -> Result<AirportIngestion>;

    /// Simulation registries bypass the evidence cache.
    fn is_simulation(&self) -> bool {
        false
    }
}

/// Registry backed by the live HTTP sources.
pub struct LiveRegistry {
    faa: FaaClient,
    weather: AviationWeatherClient,
    nws: NwsClient,
    adsb: AdsbClient,
    source_ceiling: Duration,
}

impl LiveRegistry {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.http_timeout_secs)?;
        Ok(Self {
            faa: FaaClient::new(fetcher.clone(), config.faa_base_url.clone()),
            weather: AviationWeatherClient::new(
                fetcher.clone(),
                config.aviationweather_base_url.clone(),
            ),
            nws: NwsClient::new(fetcher.clone(), config.nws_base_url.clone()),
            adsb: AdsbClient::new(fetcher, config.adsb_base_url.clone()),
            source_ceiling: Duration::from_secs(config.source_ceiling_secs),
        })
    }

    async fn guarded<T, F>(&self, source: &str, fut: F) -> IngestionResult<T>
    where
        F: std::future::Future<Output = Result<Option<T>>>,
    {
        match tokio::time::timeout(self.source_ceiling, fut).await {
            Ok(Ok(data)) => IngestionResult::ok(source, data),
            Ok(Err(e)) => IngestionResult::failed(source, e.to_string()),
            Err(_) => IngestionResult::failed(
                source,
                format!("fetch exceeded {}s ceiling", self.source_ceiling.as_secs()),
            ),
        }
    }
}

#[async_trait]
impl SignalRegistry for LiveRegistry {
    async fn ingest_airport(&self, icao: &str) -> Result<AirportIngestion> {
        let icao = validate_icao(icao)?;
        info!(airport = %icao, "ingestion fan-out started");

        let (faa, metar, taf, nws, adsb) = futures::join!(
            self.guarded(SOURCE_FAA, self.faa.fetch_airport_status(&icao)),
            self.guarded(SOURCE_METAR, async {
                self.weather.fetch_metar(&icao).await
            }),
            self.guarded(SOURCE_TAF, async { self.weather.fetch_taf(&icao).await }),
            self.guarded(SOURCE_NWS, async {
                self.nws.fetch_alerts_for_airport(&icao).await.map(Some)
            }),
            self.guarded(SOURCE_ADSB, self.adsb.fetch_snapshot(&icao)),
        );

        let ingestion = AirportIngestion {
            icao: icao.clone(),
            faa,
            metar,
            taf,
            nws,
            adsb,
            ingested_at: Utc::now(),
        };
        info!(
            airport = %icao,
            successes = ingestion.success_count(),
            "ingestion fan-out finished"
        );
        Ok(ingestion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icao_validation() {
        assert_eq!(validate_icao("kjfk").unwrap(), "KJFK");
        assert_eq!(validate_icao("PANC").unwrap(), "PANC");
        assert_eq!(validate_icao("TJSJ").unwrap(), "TJSJ");
        assert!(validate_icao("EGLL").is_err());
        assert!(validate_icao("JFK").is_err());
    }

    #[test]
    fn test_criticality_table() {
        assert_eq!(criticality_for_source(SOURCE_FAA), Criticality::Blocking);
        assert_eq!(criticality_for_source(SOURCE_METAR), Criticality::Blocking);
        assert_eq!(criticality_for_source(SOURCE_TAF), Criticality::Degraded);
        assert_eq!(criticality_for_source(SOURCE_NWS), Criticality::Degraded);
        assert_eq!(
            criticality_for_source(SOURCE_ADSB),
            Criticality::Informational
        );
    }

    #[test]
    fn test_source_records_distinguish_normal_from_error() {
        let ingestion = AirportIngestion {
            icao: "KLAX".to_string(),
            faa: IngestionResult::ok(SOURCE_FAA, None),
            metar: IngestionResult::failed(SOURCE_METAR, "timeout".to_string()),
            taf: IngestionResult::ok(SOURCE_TAF, None),
            nws: IngestionResult::ok(SOURCE_NWS, Some(Vec::new())),
            adsb: IngestionResult::ok(SOURCE_ADSB, None),
            ingested_at: Utc::now(),
        };

        let records = ingestion.source_records();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].status, SourceStatus::NormalOperations);
        assert_eq!(records[1].status, SourceStatus::ApiError);
        assert_eq!(records[2].status, SourceStatus::NoData);
        assert_eq!(records[3].status, SourceStatus::NormalOperations);
        assert_eq!(records[4].status, SourceStatus::NoData);

        assert!(records[1].missing.is_some());
        assert_eq!(
            records[1].missing.as_ref().map(|m| m.criticality),
            Some(Criticality::Blocking)
        );
    }

    #[test]
    fn test_valid_evidence_classification() {
        assert!(SourceStatus::HasData.is_valid_evidence());
        assert!(SourceStatus::NormalOperations.is_valid_evidence());
        assert!(SourceStatus::NoData.is_valid_evidence());
        assert!(!SourceStatus::ApiError.is_valid_evidence());
        assert!(!SourceStatus::NotFetched.is_valid_evidence());
    }
}
