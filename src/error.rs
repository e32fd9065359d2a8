//! Error types for posture-core.

use thiserror::Error;

/// Result type alias using posture-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during posture engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP fetch timed out after all retries
    #[error("Fetch timeout: {source_system} after {attempts} attempts")]
    FetchTimeout { source_system: String, attempts: u32 },

    /// HTTP fetch returned a non-2xx status after all retries
    #[error("Fetch status error: {source_system} returned HTTP {status}")]
    FetchStatus {
        source_system: String,
        status: u16,
        message: String,
    },

    /// Promotion to FACT attempted without a bound evidence row
    #[error("Cannot promote {kind} {id} to FACT: no evidence bound")]
    EvidenceWithoutBinding { kind: &'static str, id: String },

    /// A state machine was asked to perform a disallowed transition
    #[error("Invalid transition: {from} -> {attempted}. Valid transitions: {allowed:?}")]
    InvalidTransition {
        from: String,
        attempted: String,
        allowed: Vec<String>,
    },

    /// Narrative engine timed out or returned malformed JSON
    #[error("Narrative engine unavailable: {0}")]
    LlmUnavailable(String),

    /// Iteration or tool-call budget exhausted
    #[error("Budget exceeded: {resource}")]
    BudgetExceeded { resource: String },

    /// Persistent store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A referenced row does not exist
    #[error("Not found: {kind} {id}")]
    NotFound { kind: &'static str, id: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a fetch timeout error.
    pub fn fetch_timeout(source_system: impl Into<String>, attempts: u32) -> Self {
        Self::FetchTimeout {
            source_system: source_system.into(),
            attempts,
        }
    }

    /// Create a fetch status error.
    pub fn fetch_status(
        source_system: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::FetchStatus {
            source_system: source_system.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an evidence-binding violation for an edge or claim.
    pub fn evidence_without_binding(kind: &'static str, id: impl Into<String>) -> Self {
        Self::EvidenceWithoutBinding {
            kind,
            id: id.into(),
        }
    }

    /// Create an invalid transition error listing the allowed next states.
    pub fn invalid_transition(
        from: impl Into<String>,
        attempted: impl Into<String>,
        allowed: Vec<String>,
    ) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            attempted: attempted.into(),
            allowed,
        }
    }

    /// Create a budget exceeded error.
    pub fn budget_exceeded(resource: impl Into<String>) -> Self {
        Self::BudgetExceeded {
            resource: resource.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True when the error is a transient fetch failure.
    pub fn is_transient_fetch(&self) -> bool {
        matches!(self, Self::FetchTimeout { .. } | Self::FetchStatus { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
