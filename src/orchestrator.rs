//! Deterministic multi-agent orchestration.
//!
//! Not a ReAct loop: a fixed state machine whose transitions are
//! evaluated top-to-bottom against explicit conditions, first match
//! wins. The critic can force a return to INVESTIGATE and the policy
//! judge can veto; both interrupt paths are rows in the same table.
//! Investigation loops are capped at two rounds, after which critic and
//! policy verdicts are force-accepted to prevent oscillation.

use crate::agents::{
    plan_actions, AgentContext, AgentOutcome, CommsAgent, CriticAgent, ExecutorAgent,
    InvestigatorAgent, PolicyJudgeAgent, ProposedAction, RiskQuantAgent, RoleAgent,
};
use crate::belief::{BeliefState, Posture, StopCondition};
use crate::blob::BlobStore;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::governance::runner::ActionRunner;
use crate::graph::store::GraphStore;
use crate::graph::types::{CaseRecord, CaseStatus, TraceEventType};
use crate::ingestion::registry::SignalRegistry;
use crate::llm::NarrativeEngine;
use crate::playbooks::{self, MatchedPlaybook};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Init,
    Investigate,
    QuantifyRisk,
    Critique,
    EvaluatePolicy,
    PlanActions,
    DraftComms,
    Execute,
    Complete,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::Investigate => "INVESTIGATE",
            Self::QuantifyRisk => "QUANTIFY_RISK",
            Self::Critique => "CRITIQUE",
            Self::EvaluatePolicy => "EVALUATE_POLICY",
            Self::PlanActions => "PLAN_ACTIONS",
            Self::DraftComms => "DRAFT_COMMS",
            Self::Execute => "EXECUTE",
            Self::Complete => "COMPLETE",
        };
        write!(f, "{}", s)
    }
}

/// Transition conditions, evaluated without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Always,
    HasBlockingMissingEvidence,
    OpenUncertaintiesWithBudget,
    EvidenceAndNoBlocking,
    RiskAssessmentComplete,
    CriticInsufficient,
    CriticAcceptableOrMaxRounds,
    PolicyCompliant,
    PolicyNeedsEvidence,
    PolicyBlocked,
    ActionsWithNotification,
    ActionsWithoutNotification,
    NoActions,
    CommsDrafted,
    AllActionsTerminal,
    HasPendingApprovals,
}

impl Condition {
    fn text(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::HasBlockingMissingEvidence => "has_blocking_missing_evidence",
            Self::OpenUncertaintiesWithBudget => {
                "uncertainty_count > 0 and budget_remaining and rounds < max"
            }
            Self::EvidenceAndNoBlocking => "evidence_count > 0 and no_blocking_missing_evidence",
            Self::RiskAssessmentComplete => "risk_assessment_complete",
            Self::CriticInsufficient => "critic_verdict == INSUFFICIENT_EVIDENCE and rounds < max",
            Self::CriticAcceptableOrMaxRounds => "critic_verdict == ACCEPTABLE or rounds >= max",
            Self::PolicyCompliant => "policy_verdict == COMPLIANT",
            Self::PolicyNeedsEvidence => "policy_verdict == NEEDS_EVIDENCE and rounds < max",
            Self::PolicyBlocked => "policy_verdict == BLOCKED",
            Self::ActionsWithNotification => {
                "proposed_actions_count > 0 and any_requires_notification"
            }
            Self::ActionsWithoutNotification => {
                "proposed_actions_count > 0 and not any_requires_notification"
            }
            Self::NoActions => "proposed_actions_count == 0",
            Self::CommsDrafted => "communications_drafted",
            Self::AllActionsTerminal => "all_actions_terminal",
            Self::HasPendingApprovals => "has_pending_approvals",
        }
    }
}

/// Handlers executed on a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    StartInvestigation,
    ContinueInvestigation,
    CompleteMissingEvidenceBlocked,
    QuantifyRisk,
    RunCritic,
    ForceReinvestigation,
    EvaluatePolicy,
    CompleteBlocked,
    PlanActions,
    DraftComms,
    ExecuteActions,
    CompleteCase,
    CompleteNoActions,
    CompleteWaitingApproval,
}

struct Transition {
    from: OrchestratorState,
    condition: Condition,
    to: OrchestratorState,
    handler: Handler,
}

/// The transition table. Order matters: rows are evaluated
/// top-to-bottom and the first matching condition wins.
static TRANSITIONS: [Transition; 16] = [
    Transition {
        from: OrchestratorState::Init,
        condition: Condition::Always,
        to: OrchestratorState::Investigate,
        handler: Handler::StartInvestigation,
    },
    Transition {
        from: OrchestratorState::Investigate,
        condition: Condition::HasBlockingMissingEvidence,
        to: OrchestratorState::Complete,
        handler: Handler::CompleteMissingEvidenceBlocked,
    },
    Transition {
        from: OrchestratorState::Investigate,
        condition: Condition::OpenUncertaintiesWithBudget,
        to: OrchestratorState::Investigate,
        handler: Handler::ContinueInvestigation,
    },
    Transition {
        from: OrchestratorState::Investigate,
        condition: Condition::EvidenceAndNoBlocking,
        to: OrchestratorState::QuantifyRisk,
        handler: Handler::QuantifyRisk,
    },
    Transition {
        from: OrchestratorState::QuantifyRisk,
        condition: Condition::RiskAssessmentComplete,
        to: OrchestratorState::Critique,
        handler: Handler::RunCritic,
    },
    Transition {
        from: OrchestratorState::Critique,
        condition: Condition::CriticInsufficient,
        to: OrchestratorState::Investigate,
        handler: Handler::ForceReinvestigation,
    },
    Transition {
        from: OrchestratorState::Critique,
        condition: Condition::CriticAcceptableOrMaxRounds,
        to: OrchestratorState::EvaluatePolicy,
        handler: Handler::EvaluatePolicy,
    },
    Transition {
        from: OrchestratorState::EvaluatePolicy,
        condition: Condition::PolicyCompliant,
        to: OrchestratorState::PlanActions,
        handler: Handler::PlanActions,
    },
    Transition {
        from: OrchestratorState::EvaluatePolicy,
        condition: Condition::PolicyNeedsEvidence,
        to: OrchestratorState::Investigate,
        handler: Handler::ForceReinvestigation,
    },
    Transition {
        from: OrchestratorState::EvaluatePolicy,
        condition: Condition::PolicyBlocked,
        to: OrchestratorState::Complete,
        handler: Handler::CompleteBlocked,
    },
    Transition {
        from: OrchestratorState::PlanActions,
        condition: Condition::ActionsWithNotification,
        to: OrchestratorState::DraftComms,
        handler: Handler::DraftComms,
    },
    Transition {
        from: OrchestratorState::PlanActions,
        condition: Condition::ActionsWithoutNotification,
        to: OrchestratorState::Execute,
        handler: Handler::ExecuteActions,
    },
    Transition {
        from: OrchestratorState::PlanActions,
        condition: Condition::NoActions,
        to: OrchestratorState::Complete,
        handler: Handler::CompleteNoActions,
    },
    Transition {
        from: OrchestratorState::DraftComms,
        condition: Condition::CommsDrafted,
        to: OrchestratorState::Execute,
        handler: Handler::ExecuteActions,
    },
    Transition {
        from: OrchestratorState::Execute,
        condition: Condition::AllActionsTerminal,
        to: OrchestratorState::Complete,
        handler: Handler::CompleteCase,
    },
    Transition {
        from: OrchestratorState::Execute,
        condition: Condition::HasPendingApprovals,
        to: OrchestratorState::Complete,
        handler: Handler::CompleteWaitingApproval,
    },
];

/// True when `from -> to` is a row of the transition table. Used by
/// trace replay.
pub fn is_valid_transition(from: &str, to: &str) -> bool {
    TRANSITIONS
        .iter()
        .any(|t| t.from.to_string() == from && t.to.to_string() == to)
}

/// Streaming progress events: one per state transition, in transition
/// order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        case_id: Uuid,
    },
    StateTransition {
        from_state: String,
        to_state: String,
        condition: String,
        description: String,
        evidence_count: usize,
        uncertainty_count: usize,
        iteration: u32,
    },
    Progress {
        state: String,
        evidence_count: usize,
        claim_count: usize,
        uncertainty_count: usize,
        contradiction_count: usize,
        current_posture: String,
        risk_level: Option<String>,
        confidence: Option<f64>,
    },
    GuardrailFail {
        state: String,
        reason: String,
    },
    Completed {
        final_state: String,
        status: String,
        posture: Option<String>,
    },
    Error {
        state: String,
        message: String,
    },
}

/// Summary returned by a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub case_id: Uuid,
    pub final_state: String,
    pub status: CaseStatus,
    pub posture: Option<Posture>,
    pub pdl_seconds: Option<f64>,
    pub actions_proposed: usize,
    pub actions_executed: usize,
    pub pending_approvals: i64,
    pub iterations: u32,
    pub stop_condition: Option<StopCondition>,
}

/// Options for a single case run.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Auto-match a playbook for guided planning.
    pub use_playbook: bool,
    /// Cooperative cancel flag observed between transitions.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Per-case orchestrator. Owns all writes to the case's trace and
/// actions for the lifetime of a run.
pub struct Orchestrator<'a> {
    case: CaseRecord,
    state: OrchestratorState,
    belief: BeliefState,
    store: &'a GraphStore,
    blobs: &'a BlobStore,
    engine: &'a dyn NarrativeEngine,
    registry: &'a dyn SignalRegistry,
    runner: &'a dyn ActionRunner,
    config: &'a EngineConfig,

    critic_verdict: Option<String>,
    policy_verdict: Option<String>,
    risk_assessment: Option<Value>,
    proposed_actions: Vec<ProposedAction>,
    communications: Vec<Value>,
    investigation_count: u32,
    playbook: Option<MatchedPlaybook>,
    playbook_used: bool,

    options: RunOptions,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        case: CaseRecord,
        store: &'a GraphStore,
        blobs: &'a BlobStore,
        engine: &'a dyn NarrativeEngine,
        registry: &'a dyn SignalRegistry,
        runner: &'a dyn ActionRunner,
        config: &'a EngineConfig,
        options: RunOptions,
    ) -> Self {
        let belief = BeliefState::new(case.id, config.max_iterations, config.max_tool_calls);
        Self {
            case,
            state: OrchestratorState::Init,
            belief,
            store,
            blobs,
            engine,
            registry,
            runner,
            config,
            critic_verdict: None,
            policy_verdict: None,
            risk_assessment: None,
            proposed_actions: Vec::new(),
            communications: Vec::new(),
            investigation_count: 0,
            playbook: None,
            playbook_used: false,
            options,
            events: None,
        }
    }

    /// Attach a progress-event channel for streaming observers.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the state machine until COMPLETE and return the run summary.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!(case = %self.case.id, "orchestrator started");
        self.emit(ProgressEvent::Started {
            case_id: self.case.id,
        });

        while self.state != OrchestratorState::Complete {
            if self.cancelled() {
                self.handle_cancel()?;
                break;
            }
            // Exhausted budgets already disable the loop conditions, so
            // the machine runs forward to COMPLETE; the hard backstop
            // catches a run that still fails to terminate.
            if self.belief.iterations >= self.config.max_iterations.saturating_mul(3) {
                self.handle_budget_exhaustion()?;
                break;
            }

            let transition = match self.find_transition()? {
                Some(transition) => transition,
                None => {
                    // A stuck machine still completes with a packet:
                    // the case blocks rather than staying open forever.
                    let reason = format!("no valid transition from {}", self.state);
                    self.store.append_trace(
                        self.case.id,
                        TraceEventType::GuardrailFail,
                        Some("state"),
                        None,
                        json!({"reason": reason.clone(), "from_state": self.state.to_string()}),
                    )?;
                    self.belief.stop_condition = Some(StopCondition::Blocked);
                    self.store.set_case_status(self.case.id, CaseStatus::Blocked)?;
                    self.emit(ProgressEvent::GuardrailFail {
                        state: self.state.to_string(),
                        reason,
                    });
                    break;
                }
            };

            self.trace_state_exit(transition)?;
            self.dispatch(transition.handler).await?;
            self.trace_state_enter(transition)?;

            self.emit(ProgressEvent::StateTransition {
                from_state: self.state.to_string(),
                to_state: transition.to.to_string(),
                condition: transition.condition.text().to_string(),
                description: self.describe(transition.to),
                evidence_count: self.belief.evidence_count(),
                uncertainty_count: self.belief.uncertainty_count(),
                iteration: self.belief.iterations,
            });

            self.state = transition.to;
            self.belief.increment_iteration();

            self.emit(ProgressEvent::Progress {
                state: self.state.to_string(),
                evidence_count: self.belief.evidence_count(),
                claim_count: self.belief.claim_ids.len(),
                uncertainty_count: self.belief.uncertainty_count(),
                contradiction_count: self.belief.contradiction_count(),
                current_posture: self.belief.current_posture.to_string(),
                risk_level: self
                    .risk_assessment
                    .as_ref()
                    .and_then(|r| r["risk_level"].as_str())
                    .map(str::to_string),
                confidence: self
                    .risk_assessment
                    .as_ref()
                    .and_then(|r| r["confidence"].as_f64()),
            });
        }

        let summary = self.summarize()?;
        info!(
            case = %self.case.id,
            final_state = %summary.final_state,
            status = %summary.status,
            iterations = summary.iterations,
            "orchestrator completed"
        );
        self.emit(ProgressEvent::Completed {
            final_state: summary.final_state.clone(),
            status: summary.status.to_string(),
            posture: summary.posture.map(|p| p.to_string()),
        });
        Ok(summary)
    }

    fn cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn handle_cancel(&mut self) -> Result<()> {
        warn!(case = %self.case.id, state = %self.state, "run cancelled");
        self.belief.stop_condition = Some(StopCondition::Blocked);
        self.store.set_case_status(self.case.id, CaseStatus::Blocked)?;
        self.store.append_trace(
            self.case.id,
            TraceEventType::Blocked,
            Some("cancel"),
            None,
            json!({
                "reason": "run cancelled by caller",
                "state": self.state.to_string(),
            }),
        )?;
        self.state = OrchestratorState::Complete;
        Ok(())
    }

    fn handle_budget_exhaustion(&mut self) -> Result<()> {
        warn!(case = %self.case.id, "budget exhausted, forcing completion");
        self.belief.stop_condition = Some(StopCondition::BudgetExceeded);
        self.store.append_trace(
            self.case.id,
            TraceEventType::GuardrailFail,
            Some("budget"),
            None,
            json!({
                "reason": "iteration or tool-call budget exhausted",
                "iterations": self.belief.iterations,
                "tool_calls": self.belief.tool_calls,
            }),
        )?;
        if self.store.completed_posture_outcome(self.case.id)?.is_some() {
            self.store.set_case_status(self.case.id, CaseStatus::Resolved)?;
        } else {
            self.store.set_case_status(self.case.id, CaseStatus::Blocked)?;
        }
        self.state = OrchestratorState::Complete;
        Ok(())
    }

    fn find_transition(&self) -> Result<Option<&'static Transition>> {
        for transition in TRANSITIONS.iter() {
            if transition.from == self.state && self.eval(transition.condition)? {
                return Ok(Some(transition));
            }
        }
        Ok(None)
    }

    fn eval(&self, condition: Condition) -> Result<bool> {
        let can_reinvestigate = self.investigation_count < self.config.max_investigations;
        let any_notification = self
            .proposed_actions
            .iter()
            .any(|a| a.requires_notification);

        let result = match condition {
            Condition::Always => true,
            Condition::HasBlockingMissingEvidence => {
                self.store.has_blocking_missing_evidence(self.case.id)?
            }
            Condition::OpenUncertaintiesWithBudget => {
                self.belief.uncertainty_count() > 0
                    && self.belief.budget_remaining()
                    && can_reinvestigate
            }
            Condition::EvidenceAndNoBlocking => {
                self.belief.evidence_count() > 0
                    && !self.store.has_blocking_missing_evidence(self.case.id)?
            }
            Condition::RiskAssessmentComplete => self.risk_assessment.is_some(),
            Condition::CriticInsufficient => {
                self.critic_verdict.as_deref() == Some("INSUFFICIENT_EVIDENCE")
                    && can_reinvestigate
            }
            Condition::CriticAcceptableOrMaxRounds => {
                self.critic_verdict.as_deref() == Some("ACCEPTABLE") || !can_reinvestigate
            }
            Condition::PolicyCompliant => self.policy_verdict.as_deref() == Some("COMPLIANT"),
            Condition::PolicyNeedsEvidence => {
                self.policy_verdict.as_deref() == Some("NEEDS_EVIDENCE") && can_reinvestigate
            }
            Condition::PolicyBlocked => self.policy_verdict.as_deref() == Some("BLOCKED"),
            Condition::ActionsWithNotification => {
                !self.proposed_actions.is_empty() && any_notification
            }
            Condition::ActionsWithoutNotification => {
                !self.proposed_actions.is_empty() && !any_notification
            }
            Condition::NoActions => self.proposed_actions.is_empty(),
            Condition::CommsDrafted => !self.communications.is_empty(),
            Condition::AllActionsTerminal => self.store.nonterminal_action_count(self.case.id)? == 0,
            Condition::HasPendingApprovals => self.store.pending_approval_count(self.case.id)? > 0,
        };
        Ok(result)
    }

    async fn dispatch(&mut self, handler: Handler) -> Result<()> {
        match handler {
            Handler::StartInvestigation => self.start_investigation().await,
            Handler::ContinueInvestigation => self.continue_investigation().await,
            Handler::CompleteMissingEvidenceBlocked => self.complete_missing_evidence_blocked(),
            Handler::QuantifyRisk => self.quantify_risk().await,
            Handler::RunCritic => self.run_critic().await,
            Handler::ForceReinvestigation => self.force_reinvestigation().await,
            Handler::EvaluatePolicy => self.evaluate_policy().await,
            Handler::CompleteBlocked => self.complete_blocked(),
            Handler::PlanActions => self.plan_actions(),
            Handler::DraftComms => self.draft_communications().await,
            Handler::ExecuteActions => self.execute_actions().await,
            Handler::CompleteCase => self.complete_case(),
            Handler::CompleteNoActions => self.complete_no_actions(),
            Handler::CompleteWaitingApproval => self.complete_waiting_approval(),
        }
    }

    fn agent_context(&mut self) -> AgentContext<'_> {
        AgentContext {
            case: &self.case,
            belief: &mut self.belief,
            store: self.store,
            blobs: self.blobs,
            engine: self.engine,
            registry: self.registry,
            runner: self.runner,
            risk_assessment: self.risk_assessment.clone(),
            proposed_actions: self.proposed_actions.clone(),
            playbook_template: self.playbook.as_ref().map(|p| p.action_template.clone()),
        }
    }

    // ============================================================
    // Transition handlers
    // ============================================================

    async fn start_investigation(&mut self) -> Result<()> {
        self.investigation_count += 1;

        if self.options.use_playbook && self.playbook.is_none() {
            self.auto_match_playbook()?;
        }

        let mut ctx = self.agent_context();
        InvestigatorAgent.run(&mut ctx).await?;
        Ok(())
    }

    fn auto_match_playbook(&mut self) -> Result<()> {
        let fingerprint = playbooks::signal_fingerprint_for_case(self.store, self.case.id)?;
        match playbooks::find_matching(self.store, &self.case, &fingerprint) {
            Ok(Some(matched)) => {
                self.store.append_trace(
                    self.case.id,
                    TraceEventType::ToolResult,
                    Some("playbook"),
                    Some(&matched.playbook_id.to_string()),
                    json!({
                        "playbook_name": matched.name,
                        "match_score": matched.match_score,
                    }),
                )?;
                self.playbook = Some(matched);
            }
            Ok(None) => {}
            Err(e) => {
                // Playbook matching is guidance, never a blocker.
                warn!(case = %self.case.id, error = %e, "playbook matching failed");
            }
        }
        Ok(())
    }

    async fn continue_investigation(&mut self) -> Result<()> {
        self.investigation_count += 1;
        let mut ctx = self.agent_context();
        InvestigatorAgent.run(&mut ctx).await?;
        Ok(())
    }

    async fn quantify_risk(&mut self) -> Result<()> {
        let mut ctx = self.agent_context();
        if let AgentOutcome::RiskAssessed(assessment) = RiskQuantAgent.run(&mut ctx).await? {
            if let Some(posture) = assessment["recommended_posture"]
                .as_str()
                .and_then(|p| Posture::from_str(p).ok())
            {
                self.belief.current_posture = posture;
            }
            self.risk_assessment = Some(assessment);
        }
        Ok(())
    }

    async fn run_critic(&mut self) -> Result<()> {
        let mut ctx = self.agent_context();
        if let AgentOutcome::CriticVerdict(verdict) = CriticAgent.run(&mut ctx).await? {
            self.critic_verdict = Some(verdict);
        }
        Ok(())
    }

    async fn force_reinvestigation(&mut self) -> Result<()> {
        self.investigation_count += 1;

        let reason = if self.critic_verdict.as_deref() == Some("INSUFFICIENT_EVIDENCE") {
            "Evidence quality insufficient"
        } else {
            "Policy requires more evidence"
        };
        self.store.append_trace(
            self.case.id,
            TraceEventType::Handoff,
            Some("reinvestigation"),
            None,
            json!({
                "reason": reason,
                "critic_verdict": self.critic_verdict,
                "policy_verdict": self.policy_verdict,
                "investigation_count": self.investigation_count,
            }),
        )?;

        let mut ctx = self.agent_context();
        InvestigatorAgent.run(&mut ctx).await?;

        // Force fresh verdicts on the next pass.
        self.critic_verdict = None;
        self.policy_verdict = None;
        self.risk_assessment = None;
        Ok(())
    }

    async fn evaluate_policy(&mut self) -> Result<()> {
        let mut ctx = self.agent_context();
        if let AgentOutcome::PolicyVerdict(verdict) = PolicyJudgeAgent.run(&mut ctx).await? {
            self.policy_verdict = Some(verdict);
        }
        Ok(())
    }

    fn plan_actions(&mut self) -> Result<()> {
        let base = plan_actions(self.store, &self.belief, self.risk_assessment.as_ref())?;

        self.proposed_actions = match &self.playbook {
            Some(playbook) => {
                let guided =
                    crate::agents::planner::apply_playbook_guidance(base, &playbook.action_template);
                self.playbook_used = true;
                self.store.append_trace(
                    self.case.id,
                    TraceEventType::ToolResult,
                    Some("playbook"),
                    Some(&playbook.playbook_id.to_string()),
                    json!({"guided_actions": guided.len()}),
                )?;
                guided
            }
            None => base,
        };

        // Posture decided here, whether or not a SET_POSTURE action
        // ultimately executes. The packet builder prefers the outcome
        // timestamp and falls back to this stamp so PDL cannot grow
        // while the packet sits unread.
        self.store.append_trace(
            self.case.id,
            TraceEventType::ToolResult,
            Some("posture_marked"),
            None,
            json!({
                "posture": self.belief.current_posture.to_string(),
                "marked_at": Utc::now().to_rfc3339(),
            }),
        )?;
        Ok(())
    }

    async fn draft_communications(&mut self) -> Result<()> {
        let mut ctx = self.agent_context();
        if let AgentOutcome::CommsDrafted(drafts) = CommsAgent.run(&mut ctx).await? {
            self.communications = drafts;
        }
        Ok(())
    }

    async fn execute_actions(&mut self) -> Result<()> {
        let mut ctx = self.agent_context();
        ExecutorAgent.run(&mut ctx).await?;
        Ok(())
    }

    fn complete_case(&mut self) -> Result<()> {
        self.belief.stop_condition = Some(StopCondition::Met);
        self.store.set_case_status(self.case.id, CaseStatus::Resolved)?;
        self.record_playbook_usage()?;
        Ok(())
    }

    fn complete_no_actions(&mut self) -> Result<()> {
        self.belief.stop_condition = Some(StopCondition::Met);
        self.store.set_case_status(self.case.id, CaseStatus::Resolved)?;
        self.store.append_trace(
            self.case.id,
            TraceEventType::ToolResult,
            Some("no_actions"),
            None,
            json!({
                "reason": "planner determined no actions required",
                "current_posture": self.belief.current_posture.to_string(),
            }),
        )?;
        self.record_playbook_usage()?;
        Ok(())
    }

    fn complete_blocked(&mut self) -> Result<()> {
        self.belief.stop_condition = Some(StopCondition::Blocked);
        self.store.set_case_status(self.case.id, CaseStatus::Blocked)?;
        self.store.append_trace(
            self.case.id,
            TraceEventType::Blocked,
            Some("policy"),
            None,
            json!({
                "reason": "policy blocked execution",
                "policy_verdict": self.policy_verdict,
            }),
        )?;
        Ok(())
    }

    fn complete_missing_evidence_blocked(&mut self) -> Result<()> {
        self.belief.stop_condition = Some(StopCondition::Blocked);
        self.store.set_case_status(self.case.id, CaseStatus::Blocked)?;

        let missing = self.store.unresolved_missing_evidence(self.case.id)?;
        let blocking: Vec<Value> = missing
            .iter()
            .filter(|m| m.criticality == crate::graph::types::Criticality::Blocking)
            .map(|m| {
                json!({
                    "source_system": m.source_system,
                    "criticality": m.criticality.to_string(),
                    "reason": m.reason,
                })
            })
            .collect();

        self.store.append_trace(
            self.case.id,
            TraceEventType::Blocked,
            Some("missing_evidence"),
            None,
            json!({
                "reason": "required evidence sources unavailable",
                "blocking_count": blocking.len(),
                "missing_evidence_requests": blocking,
            }),
        )?;
        Ok(())
    }

    fn complete_waiting_approval(&mut self) -> Result<()> {
        self.belief.stop_condition = Some(StopCondition::Blocked);
        self.store.set_case_status(self.case.id, CaseStatus::Blocked)?;

        let pending = self.store.pending_approval_count(self.case.id)?;
        self.store.append_trace(
            self.case.id,
            TraceEventType::Blocked,
            Some("approval"),
            None,
            json!({
                "reason": "actions require manual approval",
                "pending_approval_count": pending,
            }),
        )?;
        Ok(())
    }

    fn record_playbook_usage(&mut self) -> Result<()> {
        if let (true, Some(playbook)) = (self.playbook_used, &self.playbook) {
            let success = self.belief.stop_condition == Some(StopCondition::Met);
            if let Err(e) =
                playbooks::record_usage(self.store, playbook.playbook_id, self.case.id, success)
            {
                warn!(case = %self.case.id, error = %e, "playbook usage recording failed");
            }
        }
        Ok(())
    }

    // ============================================================
    // Tracing
    // ============================================================

    fn trace_state_exit(&self, transition: &Transition) -> Result<()> {
        let mut meta = self.belief.to_summary();
        meta["state"] = json!(self.state.to_string());
        meta["transition_to"] = json!(transition.to.to_string());
        meta["condition"] = json!(transition.condition.text());
        meta["description"] = json!(format!("Exiting {}", self.state));
        self.store.append_trace(
            self.case.id,
            TraceEventType::StateExit,
            Some("state"),
            None,
            meta,
        )?;
        Ok(())
    }

    fn trace_state_enter(&self, transition: &Transition) -> Result<()> {
        let mut meta = self.belief.to_summary();
        meta["state"] = json!(transition.to.to_string());
        meta["transition_from"] = json!(self.state.to_string());
        meta["condition_met"] = json!(transition.condition.text());
        meta["description"] = json!(self.describe(transition.to));

        if let Some(assessment) = &self.risk_assessment {
            meta["risk_level"] = assessment["risk_level"].clone();
            meta["recommended_posture"] = assessment["recommended_posture"].clone();
        }
        if let Some(verdict) = &self.critic_verdict {
            meta["critic_verdict"] = json!(verdict);
        }
        if let Some(verdict) = &self.policy_verdict {
            meta["policy_verdict"] = json!(verdict);
        }
        if !self.proposed_actions.is_empty() {
            meta["actions_planned"] = json!(self.proposed_actions.len());
            meta["action_types"] = json!(self
                .proposed_actions
                .iter()
                .map(|a| a.action_type.clone())
                .collect::<Vec<_>>());
        }

        self.store.append_trace(
            self.case.id,
            TraceEventType::StateEnter,
            Some("state"),
            None,
            meta,
        )?;
        Ok(())
    }

    fn describe(&self, state: OrchestratorState) -> String {
        match state {
            OrchestratorState::Init => "Initializing case investigation".to_string(),
            OrchestratorState::Investigate => {
                if self.belief.evidence_count() == 0 {
                    "Gathering evidence from 5 sources: FAA_NAS, METAR, TAF, NWS_ALERTS, ADSB"
                        .to_string()
                } else {
                    format!(
                        "Gathered {} evidence records, {} uncertainties remaining",
                        self.belief.evidence_count(),
                        self.belief.uncertainty_count()
                    )
                }
            }
            OrchestratorState::QuantifyRisk => match &self.risk_assessment {
                Some(assessment) => format!(
                    "Risk assessed: {} -> recommending {}",
                    assessment["risk_level"].as_str().unwrap_or("UNKNOWN"),
                    assessment["recommended_posture"].as_str().unwrap_or("UNKNOWN"),
                ),
                None => "Analyzing evidence to quantify operational risk".to_string(),
            },
            OrchestratorState::Critique => match self.critic_verdict.as_deref() {
                Some("ACCEPTABLE") => {
                    "Critic validated evidence quality - proceeding to policy evaluation".to_string()
                }
                Some("INSUFFICIENT_EVIDENCE") => {
                    "Critic found evidence gaps - returning to investigation".to_string()
                }
                _ => "Critic validating evidence quality and completeness".to_string(),
            },
            OrchestratorState::EvaluatePolicy => match self.policy_verdict.as_deref() {
                Some("COMPLIANT") => "Policy check passed - proceeding to action planning".to_string(),
                Some("BLOCKED") => {
                    "Policy blocked action - case will complete without execution".to_string()
                }
                Some("NEEDS_EVIDENCE") => {
                    "Policy requires additional evidence - returning to investigation".to_string()
                }
                _ => "Evaluating recommended actions against governance policies".to_string(),
            },
            OrchestratorState::PlanActions => {
                if self.proposed_actions.is_empty() {
                    "Planning recommended actions based on risk assessment".to_string()
                } else {
                    format!(
                        "Planned {} actions: {}",
                        self.proposed_actions.len(),
                        self.proposed_actions
                            .iter()
                            .map(|a| a.action_type.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                }
            }
            OrchestratorState::DraftComms => "Drafting communications for stakeholders".to_string(),
            OrchestratorState::Execute => {
                format!("Executing posture directive: {}", self.belief.current_posture)
            }
            OrchestratorState::Complete => match self.belief.stop_condition {
                Some(StopCondition::Blocked) => {
                    "Case completed - BLOCKED by policy, approval or missing evidence".to_string()
                }
                Some(StopCondition::Met) => {
                    format!("Case resolved with posture: {}", self.belief.current_posture)
                }
                _ => "Case processing complete".to_string(),
            },
        }
    }

    fn summarize(&self) -> Result<RunSummary> {
        let case = self
            .store
            .get_case(self.case.id)?
            .ok_or_else(|| Error::not_found("case", self.case.id))?;
        let actions = self.store.actions_for_case(self.case.id)?;
        let executed = actions.iter().filter(|a| a.state == "COMPLETED").count();
        let pending = self.store.pending_approval_count(self.case.id)?;

        let pdl_seconds = self.pdl_seconds()?;

        Ok(RunSummary {
            case_id: self.case.id,
            final_state: self.state.to_string(),
            status: case.status,
            posture: (case.status == CaseStatus::Resolved).then_some(self.belief.current_posture),
            pdl_seconds,
            actions_proposed: actions.len(),
            actions_executed: executed,
            pending_approvals: pending,
            iterations: self.belief.iterations,
            stop_condition: self.belief.stop_condition,
        })
    }

    fn pdl_seconds(&self) -> Result<Option<f64>> {
        let evidence = self.store.evidence_for_case(self.case.id)?;
        let first_signal = match evidence.iter().map(|e| e.retrieved_at).min() {
            Some(first) => first,
            None => return Ok(None),
        };
        let emitted = match self.store.completed_posture_outcome(self.case.id)? {
            Some(outcome) => outcome.created_at,
            None => return Ok(None),
        };
        Ok(Some((emitted - first_signal).num_milliseconds() as f64 / 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transition_table_shape() {
        // INIT has exactly one unconditional row.
        let init_rows: Vec<_> = TRANSITIONS
            .iter()
            .filter(|t| t.from == OrchestratorState::Init)
            .collect();
        assert_eq!(init_rows.len(), 1);
        assert_eq!(init_rows[0].condition, Condition::Always);

        // The blocking-evidence check outranks the investigate loop.
        let investigate_rows: Vec<_> = TRANSITIONS
            .iter()
            .filter(|t| t.from == OrchestratorState::Investigate)
            .collect();
        assert_eq!(
            investigate_rows[0].condition,
            Condition::HasBlockingMissingEvidence
        );
        assert_eq!(investigate_rows[0].to, OrchestratorState::Complete);
    }

    #[test]
    fn test_no_transitions_out_of_complete() {
        assert!(!TRANSITIONS
            .iter()
            .any(|t| t.from == OrchestratorState::Complete));
    }

    #[test]
    fn test_is_valid_transition() {
        assert!(is_valid_transition("INIT", "INVESTIGATE"));
        assert!(is_valid_transition("CRITIQUE", "INVESTIGATE"));
        assert!(is_valid_transition("EXECUTE", "COMPLETE"));
        assert!(!is_valid_transition("INIT", "EXECUTE"));
        assert!(!is_valid_transition("COMPLETE", "INIT"));
    }

    #[test]
    fn test_state_display_names() {
        assert_eq!(OrchestratorState::QuantifyRisk.to_string(), "QUANTIFY_RISK");
        assert_eq!(OrchestratorState::EvaluatePolicy.to_string(), "EVALUATE_POLICY");
        assert_eq!(OrchestratorState::DraftComms.to_string(), "DRAFT_COMMS");
    }
}
