//! Signal derivation and contradiction detection.

pub mod contradiction;
pub mod derive;

pub use contradiction::{
    detect_and_persist, DetectedContradiction, FAA_MOVEMENT_MISMATCH, FAA_WEATHER_MISMATCH,
    NWS_FAA_MISMATCH, WEATHER_MOVEMENT_MISMATCH,
};
pub use derive::{
    movement_metrics, weather_severity, SignalDeriver, DEFAULT_MOVEMENT_BASELINE,
    EDGE_FAA_DISRUPTION, EDGE_MOVEMENT_COLLAPSE, EDGE_NWS_ALERT, EDGE_WEATHER_RISK,
    SIGNAL_EDGE_TYPES,
};
