//! Core records of the bi-temporal evidence graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Graph vertex kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Airport,
    Flight,
    Shipment,
    Booking,
    Carrier,
    Document,
    Evidence,
    Lane,
    Gateway,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Airport => "AIRPORT",
            Self::Flight => "FLIGHT",
            Self::Shipment => "SHIPMENT",
            Self::Booking => "BOOKING",
            Self::Carrier => "CARRIER",
            Self::Document => "DOCUMENT",
            Self::Evidence => "EVIDENCE",
            Self::Lane => "LANE",
            Self::Gateway => "GATEWAY",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AIRPORT" => Ok(Self::Airport),
            "FLIGHT" => Ok(Self::Flight),
            "SHIPMENT" => Ok(Self::Shipment),
            "BOOKING" => Ok(Self::Booking),
            "CARRIER" => Ok(Self::Carrier),
            "DOCUMENT" => Ok(Self::Document),
            "EVIDENCE" => Ok(Self::Evidence),
            "LANE" => Ok(Self::Lane),
            "GATEWAY" => Ok(Self::Gateway),
            other => Err(format!("unknown node type: {}", other)),
        }
    }
}

/// Immutable graph vertex. `(node_type, identifier)` is globally unique
/// and nodes are never mutated after creation - attributes live on
/// [`NodeVersion`] rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub node_type: NodeType,
    pub identifier: String,
    pub created_at: DateTime<Utc>,
}

/// Mutable attribute layer for a node. At any event time at most one
/// version of a node is current (`valid_from <= t < valid_to`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeVersion {
    pub id: Uuid,
    pub node_id: Uuid,
    pub attrs: Value,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub supersedes_id: Option<Uuid>,
}

/// Edge lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeStatus {
    Draft,
    Fact,
    Retracted,
}

impl std::fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Fact => "FACT",
            Self::Retracted => "RETRACTED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EdgeStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "FACT" => Ok(Self::Fact),
            "RETRACTED" => Ok(Self::Retracted),
            other => Err(format!("unknown edge status: {}", other)),
        }
    }
}

/// Bi-temporal, evidence-bound graph edge.
///
/// Visibility at `(event_time, ingest_time)` is decided only by the
/// canonical predicate in [`crate::graph::visibility`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: Uuid,
    pub src: Uuid,
    pub dst: Uuid,
    pub edge_type: String,
    pub attrs: Value,
    pub status: EdgeStatus,
    pub supersedes_edge_id: Option<Uuid>,
    pub event_time_start: Option<DateTime<Utc>>,
    pub event_time_end: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub source_system: String,
    pub confidence: f64,
}

/// Claim lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Draft,
    Hypothesis,
    Fact,
    Retracted,
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Hypothesis => "HYPOTHESIS",
            Self::Fact => "FACT",
            Self::Retracted => "RETRACTED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "HYPOTHESIS" => Ok(Self::Hypothesis),
            "FACT" => Ok(Self::Fact),
            "RETRACTED" => Ok(Self::Retracted),
            other => Err(format!("unknown claim status: {}", other)),
        }
    }
}

/// A proposition subject to evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub text: String,
    pub subject_node_id: Option<Uuid>,
    pub confidence: f64,
    pub status: ClaimStatus,
    pub supersedes_claim_id: Option<Uuid>,
    pub event_time_start: Option<DateTime<Utc>>,
    pub event_time_end: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
}

/// Recorded conflict between two claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub id: Uuid,
    pub claim_a: Uuid,
    pub claim_b: Uuid,
    pub contradiction_type: String,
    pub detected_at: DateTime<Utc>,
    pub resolution_status: String,
    pub notes: String,
}

/// Content-addressed byte record.
///
/// `(source_system, source_ref, payload_sha256)` is the deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub source_system: String,
    pub source_ref: String,
    pub retrieved_at: DateTime<Utc>,
    pub content_type: String,
    pub payload_sha256: String,
    pub raw_path: Option<String>,
    pub excerpt: String,
    pub meta: Value,
}

/// How badly a missing source hurts the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criticality {
    Blocking,
    Degraded,
    Informational,
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Blocking => "BLOCKING",
            Self::Degraded => "DEGRADED",
            Self::Informational => "INFORMATIONAL",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Criticality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BLOCKING" => Ok(Self::Blocking),
            "DEGRADED" => Ok(Self::Degraded),
            "INFORMATIONAL" => Ok(Self::Informational),
            other => Err(format!("unknown criticality: {}", other)),
        }
    }
}

/// First-class record of "we know we don't know".
///
/// A case with an unresolved BLOCKING row cannot leave investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingEvidenceRequest {
    pub id: Uuid,
    pub case_id: Option<Uuid>,
    pub source_system: String,
    pub request_type: String,
    pub request_params: Value,
    pub reason: String,
    pub criticality: Criticality,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by_evidence_id: Option<Uuid>,
}

/// Kind of case under investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseType {
    AirportDisruption,
    LaneDisruption,
}

impl std::fmt::Display for CaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AirportDisruption => "AIRPORT_DISRUPTION",
            Self::LaneDisruption => "LANE_DISRUPTION",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CaseType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AIRPORT_DISRUPTION" => Ok(Self::AirportDisruption),
            "LANE_DISRUPTION" => Ok(Self::LaneDisruption),
            other => Err(format!("unknown case type: {}", other)),
        }
    }
}

/// Case lifecycle status. Terminal states are RESOLVED and BLOCKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Open,
    Resolved,
    Blocked,
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Resolved => "RESOLVED",
            Self::Blocked => "BLOCKED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "RESOLVED" => Ok(Self::Resolved),
            "BLOCKED" => Ok(Self::Blocked),
            other => Err(format!("unknown case status: {}", other)),
        }
    }
}

/// The unit of work - created externally, advanced only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: Uuid,
    pub case_type: CaseType,
    pub scope: Value,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
}

impl CaseRecord {
    /// Airport ICAO code from the case scope, if present.
    pub fn airport(&self) -> Option<&str> {
        self.scope.get("airport").and_then(Value::as_str)
    }
}

/// Trace event kinds written to the append-only per-case ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEventType {
    StateEnter,
    StateExit,
    ToolCall,
    ToolResult,
    Handoff,
    GuardrailFail,
    Blocked,
}

impl std::fmt::Display for TraceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StateEnter => "STATE_ENTER",
            Self::StateExit => "STATE_EXIT",
            Self::ToolCall => "TOOL_CALL",
            Self::ToolResult => "TOOL_RESULT",
            Self::Handoff => "HANDOFF",
            Self::GuardrailFail => "GUARDRAIL_FAIL",
            Self::Blocked => "BLOCKED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TraceEventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "STATE_ENTER" => Ok(Self::StateEnter),
            "STATE_EXIT" => Ok(Self::StateExit),
            "TOOL_CALL" => Ok(Self::ToolCall),
            "TOOL_RESULT" => Ok(Self::ToolResult),
            "HANDOFF" => Ok(Self::Handoff),
            "GUARDRAIL_FAIL" => Ok(Self::GuardrailFail),
            "BLOCKED" => Ok(Self::Blocked),
            other => Err(format!("unknown trace event type: {}", other)),
        }
    }
}

/// One row of the append-only audit ledger. `seq` is gap-free and
/// monotonic per case; the trace carries structured verdicts and short
/// descriptions only - no chain-of-thought.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub id: Uuid,
    pub case_id: Uuid,
    pub seq: i64,
    pub event_type: TraceEventType,
    pub ref_type: Option<String>,
    pub ref_id: Option<String>,
    pub meta: Value,
    pub created_at: DateTime<Utc>,
}

/// Deduplicated traversal result - never flat rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_enum_round_trips() {
        for s in ["DRAFT", "FACT", "RETRACTED"] {
            assert_eq!(EdgeStatus::from_str(s).unwrap().to_string(), s);
        }
        for s in ["BLOCKING", "DEGRADED", "INFORMATIONAL"] {
            assert_eq!(Criticality::from_str(s).unwrap().to_string(), s);
        }
        for s in ["OPEN", "RESOLVED", "BLOCKED"] {
            assert_eq!(CaseStatus::from_str(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_case_scope_airport() {
        let case = CaseRecord {
            id: Uuid::new_v4(),
            case_type: CaseType::AirportDisruption,
            scope: serde_json::json!({"airport": "KJFK"}),
            status: CaseStatus::Open,
            created_at: Utc::now(),
        };
        assert_eq!(case.airport(), Some("KJFK"));
    }

    #[test]
    fn test_criticality_ordering() {
        assert!(Criticality::Blocking < Criticality::Degraded);
        assert!(Criticality::Degraded < Criticality::Informational);
    }
}
