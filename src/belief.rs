//! Per-case belief state.
//!
//! In-memory scratchpad for an orchestrator run. Never persisted whole:
//! on every state transition its summary is emitted to the trace, which
//! carries structured counts only - no chain-of-thought.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Gateway posture directive - the primary output of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Posture {
    /// Take all bookings
    Accept,
    /// Limit premium SLAs
    Restrict,
    /// Tender no new cargo
    Hold,
    /// Duty manager decides
    Escalate,
}

impl std::fmt::Display for Posture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accept => "ACCEPT",
            Self::Restrict => "RESTRICT",
            Self::Hold => "HOLD",
            Self::Escalate => "ESCALATE",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Posture {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ACCEPT" => Ok(Self::Accept),
            "RESTRICT" => Ok(Self::Restrict),
            "HOLD" => Ok(Self::Hold),
            "ESCALATE" => Ok(Self::Escalate),
            other => Err(format!("unknown posture: {}", other)),
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopCondition {
    /// Goal achieved
    Met,
    /// Blocked by missing evidence, policy veto or pending approval
    Blocked,
    /// Iteration or tool-call budget hit
    BudgetExceeded,
}

impl std::fmt::Display for StopCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Met => "MET",
            Self::Blocked => "BLOCKED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
        };
        write!(f, "{}", s)
    }
}

/// A hypothesis held during investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: Uuid,
    pub text: String,
    pub confidence: f64,
    pub supporting_claim_ids: Vec<Uuid>,
}

/// An uncertainty that needs resolution. Keyed by source presence - "no
/// disruption reported" is valid evidence, a source we failed to check
/// is an uncertainty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uncertainty {
    pub id: String,
    pub question: String,
    pub uncertainty_type: String,
    pub missing_evidence_request_id: Option<Uuid>,
    pub resolved: bool,
    pub resolved_by_evidence_id: Option<Uuid>,
}

/// Reference to a detected contradiction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContradictionRef {
    pub claim_a: Uuid,
    pub claim_b: Uuid,
    pub contradiction_type: String,
    pub why_it_matters: String,
    pub resolved: bool,
}

/// The agent's current belief state, updated as the orchestrator
/// progresses through states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeliefState {
    pub case_id: Uuid,
    pub airport_icao: Option<String>,

    pub hypotheses: Vec<Hypothesis>,
    pub uncertainties: Vec<Uncertainty>,
    pub contradictions: Vec<ContradictionRef>,
    pub current_posture: Posture,
    pub stop_condition: Option<StopCondition>,

    /// All gathered evidence, including API-error records.
    pub evidence_ids: Vec<Uuid>,
    /// Evidence that actually carries source data. API errors are
    /// evidence of a failure to fetch, not of conditions; the critic
    /// judges quality on this list.
    pub valid_evidence_ids: Vec<Uuid>,
    pub error_evidence_ids: Vec<Uuid>,
    pub claim_ids: Vec<Uuid>,
    pub edge_ids: Vec<Uuid>,

    pub iterations: u32,
    pub max_iterations: u32,
    pub tool_calls: u32,
    pub max_tool_calls: u32,
}

impl BeliefState {
    pub fn new(case_id: Uuid, max_iterations: u32, max_tool_calls: u32) -> Self {
        Self {
            case_id,
            airport_icao: None,
            hypotheses: Vec::new(),
            uncertainties: Vec::new(),
            contradictions: Vec::new(),
            current_posture: Posture::Hold,
            stop_condition: None,
            evidence_ids: Vec::new(),
            valid_evidence_ids: Vec::new(),
            error_evidence_ids: Vec::new(),
            claim_ids: Vec::new(),
            edge_ids: Vec::new(),
            iterations: 0,
            max_iterations,
            tool_calls: 0,
            max_tool_calls,
        }
    }

    pub fn add_hypothesis(&mut self, hypothesis: Hypothesis) {
        self.hypotheses.push(hypothesis);
    }

    pub fn add_uncertainty(&mut self, uncertainty: Uncertainty) {
        self.uncertainties.push(uncertainty);
    }

    pub fn add_contradiction(&mut self, contradiction: ContradictionRef) {
        self.contradictions.push(contradiction);
    }

    /// Mark an uncertainty as resolved by an evidence row.
    pub fn resolve_uncertainty(&mut self, uncertainty_id: &str, evidence_id: Uuid) {
        if let Some(u) = self.uncertainties.iter_mut().find(|u| u.id == uncertainty_id) {
            u.resolved = true;
            u.resolved_by_evidence_id = Some(evidence_id);
        }
    }

    pub fn open_uncertainties(&self) -> Vec<&Uncertainty> {
        self.uncertainties.iter().filter(|u| !u.resolved).collect()
    }

    pub fn uncertainty_count(&self) -> usize {
        self.uncertainties.iter().filter(|u| !u.resolved).count()
    }

    pub fn resolved_uncertainty_count(&self) -> usize {
        self.uncertainties.iter().filter(|u| u.resolved).count()
    }

    pub fn contradiction_count(&self) -> usize {
        self.contradictions.iter().filter(|c| !c.resolved).count()
    }

    pub fn evidence_count(&self) -> usize {
        self.evidence_ids.len()
    }

    pub fn valid_evidence_count(&self) -> usize {
        self.valid_evidence_ids.len()
    }

    pub fn error_evidence_count(&self) -> usize {
        self.error_evidence_ids.len()
    }

    /// True while both budgets have headroom.
    pub fn budget_remaining(&self) -> bool {
        self.iterations < self.max_iterations && self.tool_calls < self.max_tool_calls
    }

    pub fn increment_iteration(&mut self) {
        self.iterations += 1;
        if !self.budget_remaining() && self.stop_condition.is_none() {
            self.stop_condition = Some(StopCondition::BudgetExceeded);
        }
    }

    pub fn increment_tool_calls(&mut self, count: u32) {
        self.tool_calls += count;
        if !self.budget_remaining() && self.stop_condition.is_none() {
            self.stop_condition = Some(StopCondition::BudgetExceeded);
        }
    }

    /// Summary persisted into `trace_event.meta` on state transitions.
    pub fn to_summary(&self) -> Value {
        json!({
            "airport_icao": self.airport_icao,
            "hypothesis_count": self.hypotheses.len(),
            "uncertainty_count": self.uncertainty_count(),
            "resolved_uncertainty_count": self.resolved_uncertainty_count(),
            "contradiction_count": self.contradiction_count(),
            "evidence_count": self.evidence_count(),
            "valid_evidence_count": self.valid_evidence_count(),
            "current_posture": self.current_posture.to_string(),
            "stop_condition": self.stop_condition.map(|s| s.to_string()),
            "iterations": self.iterations,
            "tool_calls": self.tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn belief() -> BeliefState {
        BeliefState::new(Uuid::new_v4(), 10, 50)
    }

    #[test]
    fn test_budget_exhaustion_sets_stop_condition() {
        let mut state = BeliefState::new(Uuid::new_v4(), 2, 50);
        state.increment_iteration();
        assert!(state.stop_condition.is_none());
        state.increment_iteration();
        assert_eq!(state.stop_condition, Some(StopCondition::BudgetExceeded));
    }

    #[test]
    fn test_tool_call_budget() {
        let mut state = BeliefState::new(Uuid::new_v4(), 10, 3);
        state.increment_tool_calls(3);
        assert_eq!(state.stop_condition, Some(StopCondition::BudgetExceeded));
    }

    #[test]
    fn test_uncertainty_resolution() {
        let mut state = belief();
        state.add_uncertainty(Uncertainty {
            id: "metar_missing".to_string(),
            question: "What are current conditions?".to_string(),
            uncertainty_type: "weather_conditions_unknown".to_string(),
            missing_evidence_request_id: None,
            resolved: false,
            resolved_by_evidence_id: None,
        });
        assert_eq!(state.uncertainty_count(), 1);

        let evidence_id = Uuid::new_v4();
        state.resolve_uncertainty("metar_missing", evidence_id);
        assert_eq!(state.uncertainty_count(), 0);
        assert_eq!(state.resolved_uncertainty_count(), 1);
    }

    #[test]
    fn test_summary_has_no_free_text() {
        let state = belief();
        let summary = state.to_summary();
        assert!(summary.get("hypotheses").is_none());
        assert_eq!(summary["evidence_count"], 0);
        assert_eq!(summary["current_posture"], "HOLD");
    }
}
