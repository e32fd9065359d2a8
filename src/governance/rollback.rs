//! Rollback of failed actions.

use crate::error::{Error, Result};
use crate::governance::runner::ActionRunner;
use crate::governance::state_machine::{ActionState, ActionStateMachine};
use crate::graph::store::GraphStore;
use tracing::info;
use uuid::Uuid;

/// Action types that support a compensating side effect.
pub const ROLLBACKABLE_ACTIONS: [&str; 5] = [
    "SET_POSTURE",
    "PUBLISH_GATEWAY_ADVISORY",
    "HOLD_CARGO",
    "UPDATE_BOOKING_RULES",
    "TRIGGER_REEVALUATION",
];

/// Manages rollback of failed actions.
pub struct RollbackManager<'a> {
    store: &'a GraphStore,
    runner: &'a dyn ActionRunner,
}

impl<'a> RollbackManager<'a> {
    pub fn new(store: &'a GraphStore, runner: &'a dyn ActionRunner) -> Self {
        Self { store, runner }
    }

    /// Check whether an action can be rolled back. Returns the blocking
    /// reason when it cannot.
    pub fn can_rollback(&self, action_id: Uuid) -> Result<std::result::Result<(), String>> {
        let action = self
            .store
            .get_action(action_id)?
            .ok_or_else(|| Error::not_found("action", action_id))?;

        if action.state != ActionState::Failed.to_string() {
            return Ok(Err(format!(
                "only FAILED actions can be rolled back (current: {})",
                action.state
            )));
        }
        if !ROLLBACKABLE_ACTIONS.contains(&action.action_type.as_str()) {
            return Ok(Err(format!(
                "action type {} cannot be rolled back",
                action.action_type
            )));
        }
        Ok(Ok(()))
    }

    /// Execute the compensating side effect and record the outcome.
    pub fn rollback(&self, action_id: Uuid, rolled_back_by: &str, reason: &str) -> Result<()> {
        if let Err(blocked) = self.can_rollback(action_id)? {
            return Err(Error::Internal(blocked));
        }

        let action = self
            .store
            .get_action(action_id)?
            .ok_or_else(|| Error::not_found("action", action_id))?;

        let payload = self.runner.compensate(&action)?;
        self.store.insert_outcome(action_id, true, payload)?;

        ActionStateMachine::new(self.store).transition(
            action_id,
            ActionState::RolledBack,
            reason,
            rolled_back_by,
        )?;

        info!(action = %action_id, actor = rolled_back_by, "action rolled back");
        Ok(())
    }
}
