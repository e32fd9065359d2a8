//! Role agents invoked by the orchestrator.
//!
//! Each role is a concrete struct behind the [`RoleAgent`] trait; the
//! orchestrator selects the variant for a state through a match table,
//! never by string lookup. Agents communicate through the belief state
//! and their [`AgentOutcome`] - verdicts are structured, never prose.

pub mod comms;
pub mod critic;
pub mod executor;
pub mod investigator;
pub mod planner;
pub mod policy_judge;
pub mod risk_quant;

pub use comms::CommsAgent;
pub use critic::{CriticAgent, MAX_REJECTIONS, MIN_SOURCES_FOR_ENGINE_VERDICT};
pub use executor::ExecutorAgent;
pub use investigator::InvestigatorAgent;
pub use planner::{plan_actions, ProposedAction, BEAM_WIDTH, MAX_DEPTH};
pub use policy_judge::{PolicyJudgeAgent, SHIPMENT_ACTIONS};
pub use risk_quant::RiskQuantAgent;

use crate::belief::BeliefState;
use crate::error::Result;
use crate::governance::runner::ActionRunner;
use crate::graph::store::GraphStore;
use crate::graph::types::CaseRecord;
use crate::ingestion::registry::SignalRegistry;
use crate::llm::NarrativeEngine;
use async_trait::async_trait;
use serde_json::Value;

/// Capabilities handed to a role agent for one invocation.
pub struct AgentContext<'a> {
    pub case: &'a CaseRecord,
    pub belief: &'a mut BeliefState,
    pub store: &'a GraphStore,
    pub blobs: &'a crate::blob::BlobStore,
    pub engine: &'a dyn NarrativeEngine,
    pub registry: &'a dyn SignalRegistry,
    pub runner: &'a dyn ActionRunner,
    /// Risk assessment produced earlier in the run, when one exists.
    pub risk_assessment: Option<Value>,
    /// Actions proposed by the planner, when planning has happened.
    pub proposed_actions: Vec<ProposedAction>,
    /// Action template of a matched playbook.
    pub playbook_template: Option<Value>,
}

/// Structured result of one agent invocation.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// Investigator finished a round.
    Investigated { evidence_count: usize },
    /// Risk assessment JSON with deterministic confidence.
    RiskAssessed(Value),
    /// ACCEPTABLE or INSUFFICIENT_EVIDENCE.
    CriticVerdict(String),
    /// COMPLIANT, NEEDS_EVIDENCE or BLOCKED.
    PolicyVerdict(String),
    /// Planned action sequence.
    ActionsPlanned(Vec<ProposedAction>),
    /// Drafted communications.
    CommsDrafted(Vec<Value>),
    /// Executor pass finished; count of actions awaiting approval.
    Executed { pending_approvals: i64 },
}

/// A role agent: one capability, `run(context) -> outcome`.
#[async_trait]
pub trait RoleAgent: Send + Sync {
    async fn run(&self, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome>;
}
