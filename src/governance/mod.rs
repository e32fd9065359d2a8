//! Governed action lifecycle: state machine, approvals and rollback.

pub mod approvals;
pub mod rollback;
pub mod runner;
pub mod state_machine;

pub use approvals::{ApprovalManager, ApprovalOutcome};
pub use rollback::{RollbackManager, ROLLBACKABLE_ACTIONS};
pub use runner::{ActionRunner, StubRunner};
pub use state_machine::{ActionState, ActionStateMachine};
