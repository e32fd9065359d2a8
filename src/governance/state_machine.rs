//! Action state machine.
//!
//! ```text
//! PROPOSED -> PENDING_APPROVAL -> APPROVED -> EXECUTING -> COMPLETED
//!    |                                            |
//!    +-----------------> APPROVED                 +-> FAILED -> ROLLED_BACK
//! PENDING_APPROVAL -> PROPOSED  (reject)
//! ```
//!
//! Every transition writes a STATE_ENTER trace with `ref_type='action'`,
//! the from/to states, reason and actor. Invalid transitions fail with
//! a structured error listing the allowed next states and write no
//! trace.

use crate::error::{Error, Result};
use crate::graph::store::GraphStore;
use crate::graph::types::TraceEventType;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

/// Governance states for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Proposed,
    PendingApproval,
    Approved,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

impl ActionState {
    /// Allowed next states. One-way except the single reject path
    /// `PENDING_APPROVAL -> PROPOSED`.
    pub fn valid_transitions(&self) -> &'static [ActionState] {
        match self {
            Self::Proposed => &[Self::PendingApproval, Self::Approved],
            Self::PendingApproval => &[Self::Approved, Self::Proposed],
            Self::Approved => &[Self::Executing],
            Self::Executing => &[Self::Completed, Self::Failed],
            Self::Failed => &[Self::RolledBack],
            Self::Completed | Self::RolledBack => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposed => "PROPOSED",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ActionState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PROPOSED" => Ok(Self::Proposed),
            "PENDING_APPROVAL" => Ok(Self::PendingApproval),
            "APPROVED" => Ok(Self::Approved),
            "EXECUTING" => Ok(Self::Executing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "ROLLED_BACK" => Ok(Self::RolledBack),
            other => Err(format!("unknown action state: {}", other)),
        }
    }
}

/// State machine for action governance, enforcing valid transitions and
/// tracing every move.
pub struct ActionStateMachine<'a> {
    store: &'a GraphStore,
}

impl<'a> ActionStateMachine<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// Current state of an action.
    pub fn state_of(&self, action_id: Uuid) -> Result<ActionState> {
        let action = self
            .store
            .get_action(action_id)?
            .ok_or_else(|| Error::not_found("action", action_id))?;
        ActionState::from_str(&action.state).map_err(Error::Storage)
    }

    /// Transition an action to a new state.
    pub fn transition(
        &self,
        action_id: Uuid,
        to_state: ActionState,
        reason: &str,
        actor: &str,
    ) -> Result<()> {
        let action = self
            .store
            .get_action(action_id)?
            .ok_or_else(|| Error::not_found("action", action_id))?;
        let current = ActionState::from_str(&action.state).map_err(Error::Storage)?;

        if !current.valid_transitions().contains(&to_state) {
            return Err(Error::invalid_transition(
                current.to_string(),
                to_state.to_string(),
                current
                    .valid_transitions()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ));
        }

        if to_state == ActionState::Approved {
            self.store.set_action_approved(action_id, actor)?;
        } else {
            self.store.set_action_state(action_id, &to_state.to_string())?;
        }

        self.store.append_trace(
            action.case_id,
            TraceEventType::StateEnter,
            Some("action"),
            Some(&action_id.to_string()),
            json!({
                "from_state": current.to_string(),
                "to_state": to_state.to_string(),
                "reason": reason,
                "actor": actor,
                "action_type": action.action_type,
            }),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::NewAction;
    use crate::graph::types::CaseType;
    use serde_json::json;

    fn setup() -> (GraphStore, Uuid, Uuid) {
        let store = GraphStore::in_memory().unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        let action = store
            .insert_action(NewAction {
                case_id: case.id,
                action_type: "SET_POSTURE".to_string(),
                args: json!({"posture": "HOLD"}),
                risk_level: "HIGH".to_string(),
                requires_approval: false,
            })
            .unwrap();
        (store, case.id, action.id)
    }

    #[test]
    fn test_happy_path() {
        let (store, _case, action) = setup();
        let sm = ActionStateMachine::new(&store);

        sm.transition(action, ActionState::Approved, "auto", "SYSTEM").unwrap();
        sm.transition(action, ActionState::Executing, "run", "SYSTEM").unwrap();
        sm.transition(action, ActionState::Completed, "done", "SYSTEM").unwrap();

        assert_eq!(sm.state_of(action).unwrap(), ActionState::Completed);
    }

    #[test]
    fn test_completed_is_terminal() {
        let (store, _case, action) = setup();
        let sm = ActionStateMachine::new(&store);
        sm.transition(action, ActionState::Approved, "auto", "SYSTEM").unwrap();
        sm.transition(action, ActionState::Executing, "run", "SYSTEM").unwrap();
        sm.transition(action, ActionState::Completed, "done", "SYSTEM").unwrap();

        let err = sm
            .transition(action, ActionState::Executing, "again", "SYSTEM")
            .unwrap_err();
        match err {
            Error::InvalidTransition { from, allowed, .. } => {
                assert_eq!(from, "COMPLETED");
                assert!(allowed.is_empty());
            }
            other => panic!("expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_path() {
        let (store, _case, action) = setup();
        let sm = ActionStateMachine::new(&store);
        sm.transition(action, ActionState::PendingApproval, "needs approval", "SYSTEM")
            .unwrap();
        sm.transition(action, ActionState::Proposed, "rejected", "ops.manager")
            .unwrap();
        assert_eq!(sm.state_of(action).unwrap(), ActionState::Proposed);
    }

    #[test]
    fn test_invalid_transition_writes_no_trace() {
        let (store, case, action) = setup();
        let sm = ActionStateMachine::new(&store);
        let before = store.trace_for_case(case).unwrap().len();

        let _ = sm.transition(action, ActionState::Completed, "skip", "SYSTEM");

        let after = store.trace_for_case(case).unwrap().len();
        assert_eq!(before, after);
    }

    #[test]
    fn test_transition_traced_with_actor() {
        let (store, case, action) = setup();
        let sm = ActionStateMachine::new(&store);
        sm.transition(action, ActionState::PendingApproval, "policy", "SYSTEM")
            .unwrap();

        let trace = store.trace_for_case(case).unwrap();
        let event = trace.last().unwrap();
        assert_eq!(event.ref_type.as_deref(), Some("action"));
        assert_eq!(event.meta["to_state"], "PENDING_APPROVAL");
        assert_eq!(event.meta["actor"], "SYSTEM");
    }
}
