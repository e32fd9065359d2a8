//! # posture-core
//!
//! Gateway posture decision engine for air freight operations. Given an
//! airport under observation, the engine ingests disruption signals from
//! five external sources, reconciles them against a bi-temporal evidence
//! graph, and emits one of four governed posture directives - ACCEPT,
//! RESTRICT, HOLD, ESCALATE - with a complete decision packet.
//!
//! ## Core Components
//!
//! - **Graph**: bi-temporal evidence graph with canonical visibility
//!   predicates, traversal and hybrid retrieval
//! - **Ingestion**: concurrent five-source fan-out with retries and
//!   first-class missing evidence
//! - **Signals**: derived signal edges and contradiction detection
//! - **Orchestrator**: deterministic state machine driving seven role
//!   agents with explicit interrupt paths
//! - **Governance**: action state machine, approvals and rollback
//! - **Packets**: the immutable decision packet with PDL metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use posture_core::{CaseRunOptions, CaseType, Engine, EngineConfig};
//!
//! let engine = Engine::init(EngineConfig::from_env())?;
//! let case_id = engine.create_case(
//!     CaseType::AirportDisruption,
//!     serde_json::json!({"airport": "KJFK"}),
//! )?;
//! let summary = engine.run_case(case_id, CaseRunOptions::default()).await?;
//! let packet = engine.get_packet(case_id)?;
//! ```

pub mod agents;
pub mod belief;
pub mod blob;
pub mod config;
pub mod engine;
pub mod error;
pub mod governance;
pub mod graph;
pub mod ingestion;
pub mod llm;
pub mod orchestrator;
pub mod packets;
pub mod playbooks;
pub mod signals;
pub mod simulation;

// Re-exports for convenience
pub use belief::{BeliefState, ContradictionRef, Hypothesis, Posture, StopCondition, Uncertainty};
pub use blob::BlobStore;
pub use config::EngineConfig;
pub use engine::{ApprovalResult, CaseRunOptions, Engine};
pub use error::{Error, Result};
pub use governance::{
    ActionRunner, ActionState, ActionStateMachine, ApprovalManager, ApprovalOutcome,
    RollbackManager, StubRunner, ROLLBACKABLE_ACTIONS,
};
pub use graph::{
    hybrid_search, CascadeImpact, CaseRecord, CaseStatus, CaseType, Claim, ClaimStatus,
    Contradiction, Criticality, Edge, EdgeStatus, Embedder, Evidence, GraphStore, HashingEmbedder,
    HybridSearchResult, MissingEvidenceRequest, NewAction, NewEdge, NewEvidence, Node, NodeType,
    NodeVersion, Subgraph, TraceEvent, TraceEventType, TraversalQuery, EMBEDDING_DIM, MAX_HOPS,
};
pub use ingestion::{
    AdsbSnapshot, AirportIngestion, FaaStatus, HttpFetcher, IngestionResult, LiveRegistry,
    MetarObservation, MissingSignal, NwsAlert, SignalRegistry, SourceRecord, SourceStatus,
    TafForecast, ALL_SOURCES,
};
pub use llm::{AnthropicEngine, ChatMessage, ChatRole, NarrativeEngine, ScriptedEngine};
pub use orchestrator::{
    is_valid_transition, Orchestrator, OrchestratorState, ProgressEvent, RunOptions, RunSummary,
};
pub use packets::{
    replay_trace, DecisionPacket, PacketBuilder, PacketMetrics, PostureDecision, ReplayResult,
};
pub use playbooks::{find_matching, record_from_case, MatchedPlaybook, MATCH_THRESHOLD};
pub use signals::{
    detect_and_persist, movement_metrics, weather_severity, DetectedContradiction, SignalDeriver,
};
pub use simulation::{builtin_scenarios, Scenario, ScenarioRegistry, ScenarioRunner};
