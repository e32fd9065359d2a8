//! Decision packet model and builder.

pub mod builder;
pub mod models;
pub mod replay;

pub use builder::PacketBuilder;
pub use models::{
    ActionSummary, BlockedSection, ClaimSummary, ContradictionSummary, DecisionPacket,
    EvidenceSummary, PacketMetrics, PostureDecision, WorkflowStep,
};
pub use replay::{replay_trace, ReplayResult};
