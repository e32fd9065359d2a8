//! Decision packet model - the immutable audit artifact produced on
//! case completion and the only externally meaningful output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The posture decision and its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostureDecision {
    pub posture: String,
    pub airport: Option<String>,
    pub effective_at: DateTime<Utc>,
    pub reason: String,
}

/// A claim surfaced in the packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub id: Uuid,
    pub text: String,
    pub confidence: f64,
    pub status: String,
}

/// An evidence row surfaced in the packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub id: Uuid,
    pub source_system: String,
    pub retrieved_at: DateTime<Utc>,
    pub excerpt: String,
}

/// A contradiction surfaced in the packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionSummary {
    pub id: Uuid,
    pub contradiction_type: String,
    pub detected_at: DateTime<Utc>,
    pub resolution_status: String,
    pub notes: String,
}

/// An action row surfaced in the packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSummary {
    pub id: Uuid,
    pub action_type: String,
    pub args: Value,
    pub state: String,
    pub risk_level: String,
    pub requires_approval: bool,
}

/// Present when the case ended blocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedSection {
    pub missing_evidence_requests: Vec<Value>,
    pub policy_verdict: Option<String>,
    pub pending_approval_count: i64,
}

/// Latency and count metrics. Both timestamps are persisted facts, so
/// reading the packet twice yields the same PDL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketMetrics {
    pub first_signal_at: DateTime<Utc>,
    pub posture_emitted_at: DateTime<Utc>,
    pub pdl_seconds: f64,
    pub evidence_count: usize,
    pub uncertainty_resolved_count: usize,
    pub contradiction_count: usize,
    pub action_count: usize,
}

/// One replayable workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub seq: i64,
    pub event_type: String,
    pub state: Option<String>,
    pub transition_to: Option<String>,
    pub condition: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The decision packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPacket {
    pub case_id: Uuid,
    pub case_type: String,
    pub scope: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub posture_decision: PostureDecision,
    pub top_claims: Vec<ClaimSummary>,
    /// Evidence grouped by source system.
    pub evidence_list: BTreeMap<String, Vec<EvidenceSummary>>,
    pub contradictions: Vec<ContradictionSummary>,
    pub policies_applied: Vec<Value>,
    pub actions_proposed: Vec<ActionSummary>,
    pub actions_executed: Vec<ActionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_section: Option<BlockedSection>,
    pub metrics: PacketMetrics,
    pub workflow_trace: Vec<WorkflowStep>,
    pub confidence_breakdown: Value,
    /// Best-effort: on failure this carries `{"error": ...}` and the
    /// packet is otherwise complete.
    pub cascade_impact: Value,
}
