//! Executor agent.
//!
//! Persists the planned actions and drives them through the governance
//! state machine. Actions requiring approval stop at PENDING_APPROVAL
//! for an external `approve_action` call; the rest run through the
//! pluggable action runner with an outcome row each.

use crate::agents::{AgentContext, AgentOutcome, RoleAgent};
use crate::error::Result;
use crate::governance::state_machine::{ActionState, ActionStateMachine};
use crate::graph::store::NewAction;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Runs approved actions and parks the rest for approval.
pub struct ExecutorAgent;

#[async_trait]
impl RoleAgent for ExecutorAgent {
    async fn run(&self, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome> {
        let sm = ActionStateMachine::new(ctx.store);

        for proposed in &ctx.proposed_actions {
            let mut args = proposed.args.clone();
            if let serde_json::Value::Object(map) = &mut args {
                map.insert("playbook_guided".to_string(), json!(proposed.playbook_guided));
            }

            let action = ctx.store.insert_action(NewAction {
                case_id: ctx.case.id,
                action_type: proposed.action_type.clone(),
                args,
                risk_level: proposed.risk_level.clone(),
                requires_approval: proposed.requires_approval,
            })?;
            ctx.belief.increment_tool_calls(1);

            if proposed.requires_approval {
                sm.transition(
                    action.id,
                    ActionState::PendingApproval,
                    "Approval required by governance policy",
                    "SYSTEM",
                )?;
                continue;
            }

            sm.transition(action.id, ActionState::Approved, "Auto-approved", "SYSTEM")?;
            sm.transition(action.id, ActionState::Executing, "Executing", "SYSTEM")?;

            match ctx.runner.execute(&action) {
                Ok(payload) => {
                    ctx.store.insert_outcome(action.id, true, payload)?;
                    sm.transition(action.id, ActionState::Completed, "Executed", "SYSTEM")?;
                }
                Err(e) => {
                    ctx.store
                        .insert_outcome(action.id, false, json!({"error": e.to_string()}))?;
                    sm.transition(action.id, ActionState::Failed, "Execution failed", "SYSTEM")?;
                }
            }
        }

        let pending = ctx.store.pending_approval_count(ctx.case.id)?;
        info!(
            case = %ctx.case.id,
            actions = ctx.proposed_actions.len(),
            pending_approvals = pending,
            "executor pass finished"
        );
        Ok(AgentOutcome::Executed {
            pending_approvals: pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentContext, ProposedAction};
    use crate::belief::BeliefState;
    use crate::blob::BlobStore;
    use crate::governance::runner::StubRunner;
    use crate::graph::store::GraphStore;
    use crate::graph::types::CaseType;
    use crate::llm::ScriptedEngine;
    use tempfile::TempDir;

    struct NullRegistry;

    #[async_trait]
    impl crate::ingestion::registry::SignalRegistry for NullRegistry {
        async fn ingest_airport(
            &self,
            _icao: &str,
        ) -> Result<crate::ingestion::registry::AirportIngestion> {
            Err(crate::error::Error::Internal("not used".to_string()))
        }
    }

    fn proposed(action_type: &str, requires_approval: bool) -> ProposedAction {
        ProposedAction {
            action_type: action_type.to_string(),
            args: json!({"posture": "HOLD", "airport": "KJFK"}),
            risk_level: "HIGH".to_string(),
            requires_approval,
            requires_notification: false,
            playbook_guided: false,
            score: 5.0,
        }
    }

    #[tokio::test]
    async fn test_executes_auto_approved_actions() {
        let store = GraphStore::in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path()).unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        let mut belief = BeliefState::new(case.id, 10, 50);

        let engine = ScriptedEngine::new();
        let runner = StubRunner;
        let registry = NullRegistry;
        let mut ctx = AgentContext {
            case: &case,
            belief: &mut belief,
            store: &store,
            blobs: &blobs,
            engine: &engine,
            registry: &registry,
            runner: &runner,
            risk_assessment: None,
            proposed_actions: vec![proposed("SET_POSTURE", false), proposed("HOLD_CARGO", true)],
            playbook_template: None,
        };

        let outcome = ExecutorAgent.run(&mut ctx).await.unwrap();
        match outcome {
            AgentOutcome::Executed { pending_approvals } => assert_eq!(pending_approvals, 1),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let actions = store.actions_for_case(case.id).unwrap();
        assert_eq!(actions.len(), 2);
        let set_posture = actions.iter().find(|a| a.action_type == "SET_POSTURE").unwrap();
        assert_eq!(set_posture.state, "COMPLETED");
        let hold = actions.iter().find(|a| a.action_type == "HOLD_CARGO").unwrap();
        assert_eq!(hold.state, "PENDING_APPROVAL");

        let outcome = store.completed_posture_outcome(case.id).unwrap().unwrap();
        assert_eq!(outcome.payload["posture"], "HOLD");
    }
}
