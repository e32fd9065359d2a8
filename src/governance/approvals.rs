//! Approval management for governed actions.

use crate::error::{Error, Result};
use crate::governance::runner::ActionRunner;
use crate::governance::state_machine::{ActionState, ActionStateMachine};
use crate::graph::store::GraphStore;
use crate::graph::types::CaseStatus;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

/// Result of an approval call.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    /// Case status after the approval (RESOLVED once all actions are
    /// terminal).
    pub case_status: CaseStatus,
    /// True when the approved action was executed in this call.
    pub executed: bool,
}

/// Manages approval and rejection of governed actions.
pub struct ApprovalManager<'a> {
    store: &'a GraphStore,
    runner: &'a dyn ActionRunner,
}

impl<'a> ApprovalManager<'a> {
    pub fn new(store: &'a GraphStore, runner: &'a dyn ActionRunner) -> Self {
        Self { store, runner }
    }

    /// Move an action into PENDING_APPROVAL.
    pub fn request_approval(&self, action_id: Uuid, requested_by: &str, reason: &str) -> Result<()> {
        ActionStateMachine::new(self.store).transition(
            action_id,
            ActionState::PendingApproval,
            reason,
            requested_by,
        )
    }

    /// Approve a pending action and, when `auto_execute`, run it. When
    /// every action of the case is terminal afterwards the case flips to
    /// RESOLVED.
    pub fn approve(
        &self,
        action_id: Uuid,
        approved_by: &str,
        auto_execute: bool,
    ) -> Result<ApprovalOutcome> {
        let sm = ActionStateMachine::new(self.store);
        let current = sm.state_of(action_id)?;
        if current != ActionState::PendingApproval {
            return Err(Error::invalid_transition(
                current.to_string(),
                ActionState::Approved.to_string(),
                current
                    .valid_transitions()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ));
        }

        sm.transition(action_id, ActionState::Approved, "Approved", approved_by)?;

        let action = self
            .store
            .get_action(action_id)?
            .ok_or_else(|| Error::not_found("action", action_id))?;

        let mut executed = false;
        if auto_execute {
            sm.transition(action_id, ActionState::Executing, "Post-approval execution", approved_by)?;
            match self.runner.execute(&action) {
                Ok(payload) => {
                    self.store.insert_outcome(action_id, true, payload)?;
                    sm.transition(action_id, ActionState::Completed, "Executed", approved_by)?;
                    executed = true;
                }
                Err(e) => {
                    self.store.insert_outcome(
                        action_id,
                        false,
                        serde_json::json!({"error": e.to_string()}),
                    )?;
                    sm.transition(action_id, ActionState::Failed, "Execution failed", approved_by)?;
                }
            }
        }

        let case_status = self.resolve_case_if_terminal(action.case_id)?;
        info!(
            action = %action_id,
            case = %action.case_id,
            executed,
            status = %case_status,
            "action approved"
        );
        Ok(ApprovalOutcome {
            case_status,
            executed,
        })
    }

    /// Reject a pending action back to PROPOSED, marking the rejection
    /// in its args.
    pub fn reject(&self, action_id: Uuid, rejected_by: &str, reason: &str) -> Result<()> {
        let sm = ActionStateMachine::new(self.store);
        let current = sm.state_of(action_id)?;
        if current != ActionState::PendingApproval {
            return Err(Error::invalid_transition(
                current.to_string(),
                ActionState::Proposed.to_string(),
                current
                    .valid_transitions()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ));
        }

        sm.transition(action_id, ActionState::Proposed, reason, rejected_by)?;

        let action = self
            .store
            .get_action(action_id)?
            .ok_or_else(|| Error::not_found("action", action_id))?;
        let mut args = action.args.clone();
        if let Value::Object(map) = &mut args {
            map.insert("rejected".to_string(), Value::Bool(true));
            map.insert(
                "rejected_reason".to_string(),
                Value::String(reason.to_string()),
            );
            map.insert(
                "rejected_by".to_string(),
                Value::String(rejected_by.to_string()),
            );
        }
        self.store.set_action_args(action_id, &args)
    }

    fn resolve_case_if_terminal(&self, case_id: Uuid) -> Result<CaseStatus> {
        if self.store.nonterminal_action_count(case_id)? == 0 {
            self.store.set_case_status(case_id, CaseStatus::Resolved)?;
            Ok(CaseStatus::Resolved)
        } else {
            let case = self
                .store
                .get_case(case_id)?
                .ok_or_else(|| Error::not_found("case", case_id))?;
            Ok(case.status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::runner::StubRunner;
    use crate::graph::store::NewAction;
    use crate::graph::types::CaseType;
    use serde_json::json;

    fn setup() -> (GraphStore, Uuid, Uuid) {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        store.set_case_status(case.id, CaseStatus::Blocked).unwrap();
        let action = store
            .insert_action(NewAction {
                case_id: case.id,
                action_type: "HOLD_CARGO".to_string(),
                args: json!({"shipment": "SHP-1"}),
                risk_level: "HIGH".to_string(),
                requires_approval: true,
            })
            .unwrap();
        (store, case.id, action.id)
    }

    #[test]
    fn test_approve_executes_and_resolves_case() {
        let (store, case_id, action_id) = setup();
        let runner = StubRunner;
        let manager = ApprovalManager::new(&store, &runner);

        manager
            .request_approval(action_id, "SYSTEM", "requires approval")
            .unwrap();
        let outcome = manager.approve(action_id, "duty.manager", true).unwrap();

        assert!(outcome.executed);
        assert_eq!(outcome.case_status, CaseStatus::Resolved);

        let action = store.get_action(action_id).unwrap().unwrap();
        assert_eq!(action.state, "COMPLETED");
        assert_eq!(action.approved_by.as_deref(), Some("duty.manager"));
        assert_eq!(store.get_case(case_id).unwrap().unwrap().status, CaseStatus::Resolved);
    }

    #[test]
    fn test_approve_requires_pending_state() {
        let (store, _case, action_id) = setup();
        let runner = StubRunner;
        let manager = ApprovalManager::new(&store, &runner);

        let err = manager.approve(action_id, "duty.manager", true).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_reject_marks_args() {
        let (store, _case, action_id) = setup();
        let runner = StubRunner;
        let manager = ApprovalManager::new(&store, &runner);

        manager
            .request_approval(action_id, "SYSTEM", "requires approval")
            .unwrap();
        manager
            .reject(action_id, "duty.manager", "too risky")
            .unwrap();

        let action = store.get_action(action_id).unwrap().unwrap();
        assert_eq!(action.state, "PROPOSED");
        assert_eq!(action.args["rejected"], true);
        assert_eq!(action.args["rejected_reason"], "too risky");
    }
}
