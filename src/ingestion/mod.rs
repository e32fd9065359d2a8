//! Multi-source ingestion: HTTP retries, typed source clients and the
//! concurrent fan-out registry.

pub mod adsb;
pub mod faa;
pub mod http;
pub mod nws;
pub mod weather;
pub mod registry;

pub use adsb::{AdsbClient, AdsbSnapshot};
pub use faa::{FaaClient, FaaStatus};
pub use http::{HttpFetcher, MAX_ATTEMPTS};
pub use nws::{NwsAlert, NwsClient};
pub use registry::{
    criticality_for_source, validate_icao, AirportIngestion, IngestionResult, LiveRegistry,
    MissingSignal, SignalRegistry, SourceRecord, SourceStatus, ALL_SOURCES, SOURCE_ADSB,
    SOURCE_FAA, SOURCE_METAR, SOURCE_NWS, SOURCE_TAF,
};
pub use weather::{AviationWeatherClient, MetarObservation, TafForecast};
