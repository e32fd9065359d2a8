//! The process-wide engine handle and its control surface.
//!
//! All capabilities - store, blob store, embedder, narrative engine,
//! signal registry, action runner - are created at [`Engine::init`] and
//! passed into components explicitly; nothing reads ambient globals.
//! The simulation registry is selected per run through
//! [`CaseRunOptions::registry_override`].

use crate::blob::BlobStore;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::governance::approvals::ApprovalManager;
use crate::governance::rollback::RollbackManager;
use crate::governance::runner::{ActionRunner, StubRunner};
use crate::graph::embedding::{Embedder, HashingEmbedder};
use crate::graph::retrieval::{hybrid_search, HybridSearchResult};
use crate::graph::store::GraphStore;
use crate::graph::types::{CaseStatus, CaseType};
use crate::ingestion::registry::{LiveRegistry, SignalRegistry};
use crate::llm::{AnthropicEngine, NarrativeEngine};
use crate::orchestrator::{Orchestrator, ProgressEvent, RunOptions, RunSummary};
use crate::packets::builder::PacketBuilder;
use crate::packets::replay::{replay_trace, ReplayResult};
use crate::packets::DecisionPacket;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Options for one case run through the engine.
#[derive(Default)]
pub struct CaseRunOptions<'a> {
    /// Auto-match a playbook for guided planning.
    pub use_playbook: bool,
    /// Registry to use instead of the engine default (simulation).
    pub registry_override: Option<&'a dyn SignalRegistry>,
    /// Cooperative cancel flag observed between state transitions.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Result of an external approval call.
#[derive(Debug, Clone)]
pub struct ApprovalResult {
    pub final_state: CaseStatus,
    pub executed: bool,
}

/// Process-wide engine handle.
pub struct Engine {
    config: EngineConfig,
    store: GraphStore,
    blobs: BlobStore,
    embedder: Box<dyn Embedder>,
    narrative: Box<dyn NarrativeEngine>,
    registry: Box<dyn SignalRegistry>,
    runner: Box<dyn ActionRunner>,
}

impl Engine {
    /// Initialize the engine with the default capability set: live
    /// signal sources, the Anthropic narrative engine, the local
    /// hashing embedder and the stub action runner.
    pub fn init(config: EngineConfig) -> Result<Self> {
        let narrative = Box::new(AnthropicEngine::new(&config)?);
        let registry = Box::new(LiveRegistry::new(&config)?);
        Self::init_with(config, narrative, registry)
    }

    /// Initialize with explicit narrative engine and registry
    /// capabilities (tests, simulation, alternative providers).
    pub fn init_with(
        config: EngineConfig,
        narrative: Box<dyn NarrativeEngine>,
        registry: Box<dyn SignalRegistry>,
    ) -> Result<Self> {
        let store = match &config.db_path {
            Some(path) => GraphStore::open(path)?,
            None => GraphStore::in_memory()?,
        };
        let blobs = BlobStore::new(&config.blob_dir)?;
        info!(db = ?config.db_path, "engine initialized");
        Ok(Self {
            config,
            store,
            blobs,
            embedder: Box::new(HashingEmbedder::new()),
            narrative,
            registry,
            runner: Box::new(StubRunner),
        })
    }

    /// Release the handle. Connections close on drop; this is the
    /// explicit lifecycle end.
    pub fn close(self) {}

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a case in OPEN status.
    pub fn create_case(&self, case_type: CaseType, scope: Value) -> Result<Uuid> {
        let case = self.store.create_case(case_type, scope)?;
        Ok(case.id)
    }

    /// Run a case to completion and return the summary. The case is
    /// indexed for hybrid retrieval afterwards.
    pub async fn run_case(
        &self,
        case_id: Uuid,
        options: CaseRunOptions<'_>,
    ) -> Result<RunSummary> {
        let summary = self.orchestrate(case_id, options, None).await?;
        self.index_case(case_id)?;
        Ok(summary)
    }

    /// Run a case with streaming progress. Returns the event receiver
    /// and the run future; drive both concurrently (the channel is
    /// unbounded, so the run never blocks on a slow observer).
    pub fn run_case_streaming<'a>(
        &'a self,
        case_id: Uuid,
        options: CaseRunOptions<'a>,
    ) -> (
        mpsc::UnboundedReceiver<ProgressEvent>,
        impl Future<Output = Result<RunSummary>> + 'a,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fut = async move {
            let summary = self.orchestrate(case_id, options, Some(tx)).await?;
            self.index_case(case_id)?;
            Ok(summary)
        };
        (rx, fut)
    }

    async fn orchestrate(
        &self,
        case_id: Uuid,
        options: CaseRunOptions<'_>,
        events: Option<mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Result<RunSummary> {
        let case = self
            .store
            .get_case(case_id)?
            .ok_or_else(|| Error::not_found("case", case_id))?;

        let registry = options.registry_override.unwrap_or(self.registry.as_ref());
        let mut orchestrator = Orchestrator::new(
            case,
            &self.store,
            &self.blobs,
            self.narrative.as_ref(),
            registry,
            self.runner.as_ref(),
            &self.config,
            RunOptions {
                use_playbook: options.use_playbook,
                cancel: options.cancel.clone(),
            },
        );
        if let Some(tx) = events {
            orchestrator = orchestrator.with_events(tx);
        }
        orchestrator.run().await
    }

    /// Approve a pending action; on success the action executes and the
    /// case resolves once all actions are terminal.
    pub fn approve_action(
        &self,
        case_id: Uuid,
        action_id: Uuid,
        actor: &str,
    ) -> Result<ApprovalResult> {
        let action = self
            .store
            .get_action(action_id)?
            .ok_or_else(|| Error::not_found("action", action_id))?;
        if action.case_id != case_id {
            return Err(Error::not_found("action", action_id));
        }

        let manager = ApprovalManager::new(&self.store, self.runner.as_ref());
        let outcome = manager.approve(action_id, actor, true)?;
        Ok(ApprovalResult {
            final_state: outcome.case_status,
            executed: outcome.executed,
        })
    }

    /// Reject a pending action back to PROPOSED.
    pub fn reject_action(&self, action_id: Uuid, actor: &str, reason: &str) -> Result<()> {
        ApprovalManager::new(&self.store, self.runner.as_ref()).reject(action_id, actor, reason)
    }

    /// Roll back a FAILED action with a compensating side effect.
    pub fn rollback_action(&self, action_id: Uuid, actor: &str, reason: &str) -> Result<()> {
        RollbackManager::new(&self.store, self.runner.as_ref()).rollback(action_id, actor, reason)
    }

    /// Decision packet for a completed case. `None` while the case is
    /// still OPEN or unknown.
    pub fn get_packet(&self, case_id: Uuid) -> Result<Option<DecisionPacket>> {
        let case = match self.store.get_case(case_id)? {
            Some(case) => case,
            None => return Ok(None),
        };
        if case.status == CaseStatus::Open {
            return Ok(None);
        }
        PacketBuilder::new(&self.store).build(case_id).map(Some)
    }

    /// Hybrid retrieval over indexed cases.
    pub fn hybrid_search(
        &self,
        query: &str,
        context_case: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<HybridSearchResult>> {
        hybrid_search(
            &self.store,
            self.embedder.as_ref(),
            query,
            context_case,
            limit,
        )
    }

    /// Replay a case's workflow trace against a fresh transition table.
    pub fn replay_case(&self, case_id: Uuid) -> Result<ReplayResult> {
        replay_trace(&self.store, case_id)
    }

    /// Index a case for hybrid retrieval from its persisted facts.
    fn index_case(&self, case_id: Uuid) -> Result<()> {
        let case = match self.store.get_case(case_id)? {
            Some(case) => case,
            None => return Ok(()),
        };
        let airport = case.airport().unwrap_or("unknown").to_string();

        let posture = self
            .store
            .completed_posture_outcome(case_id)?
            .and_then(|o| o.payload["posture"].as_str().map(str::to_string))
            .unwrap_or_else(|| "UNDECIDED".to_string());
        let risk = self
            .store
            .latest_trace_event(case_id, "risk_assessment")?
            .and_then(|e| e.meta["risk_level"].as_str().map(str::to_string))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let action_types: Vec<String> = self
            .store
            .actions_for_case(case_id)?
            .into_iter()
            .map(|a| a.action_type)
            .collect();

        let text = format!(
            "{} {} posture {} risk {} actions {}",
            airport,
            case.case_type,
            posture,
            risk,
            action_types.join(" ")
        );
        let embedding = self.embedder.embed(&text);
        self.store.upsert_case_embedding(case_id, &text, &embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::state_machine::ActionState;
    use crate::llm::ScriptedEngine;
    use crate::simulation::scenarios::{
        approval_gated_hold, contradictory_signals, kjfk_ground_stop, klax_normal, missing_metar,
        ScenarioRegistry,
    };
    use crate::simulation::ScenarioRunner;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_engine(blob_dir: &TempDir) -> Engine {
        let config = EngineConfig::default().with_blob_dir(blob_dir.path());
        Engine::init_with(
            config,
            Box::new(ScriptedEngine::new()),
            Box::new(ScenarioRegistry::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_scenario_kjfk_ground_stop_full_evidence() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        let outcome = runner.run(&kjfk_ground_stop()).await.unwrap();
        assert_eq!(outcome.summary.status, CaseStatus::Resolved);
        assert_eq!(
            outcome.summary.posture,
            Some(crate::belief::Posture::Hold)
        );

        let packet = engine.get_packet(outcome.case_id).unwrap().unwrap();
        assert_eq!(packet.posture_decision.posture, "HOLD");
        assert_eq!(packet.contradictions.len(), 0);
        assert!(packet.metrics.pdl_seconds < 60.0);

        let action_types: Vec<&str> = packet
            .actions_proposed
            .iter()
            .map(|a| a.action_type.as_str())
            .collect();
        assert!(action_types.contains(&"SET_POSTURE"));
        assert!(action_types.contains(&"PUBLISH_GATEWAY_ADVISORY"));

        let set_posture = packet
            .actions_proposed
            .iter()
            .find(|a| a.action_type == "SET_POSTURE")
            .unwrap();
        assert_eq!(set_posture.args["posture"], "HOLD");

        // Cascade impact was seeded for this scenario.
        assert!(packet.cascade_impact["total_bookings"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_scenario_klax_normal_operations() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        let outcome = runner.run(&klax_normal()).await.unwrap();
        assert_eq!(outcome.summary.status, CaseStatus::Resolved);
        assert_eq!(
            outcome.summary.posture,
            Some(crate::belief::Posture::Accept)
        );

        let packet = engine.get_packet(outcome.case_id).unwrap().unwrap();
        assert_eq!(packet.posture_decision.posture, "ACCEPT");
        assert_eq!(packet.contradictions.len(), 0);
        assert_eq!(packet.actions_proposed.len(), 1);
        assert_eq!(packet.actions_proposed[0].action_type, "SET_POSTURE");
    }

    #[tokio::test]
    async fn test_scenario_contradictory_signals() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        let outcome = runner.run(&contradictory_signals()).await.unwrap();
        let packet = engine.get_packet(outcome.case_id).unwrap().unwrap();

        assert!(packet
            .contradictions
            .iter()
            .any(|c| c.contradiction_type == "FAA_WEATHER_MISMATCH"));
        assert!(matches!(
            packet.posture_decision.posture.as_str(),
            "RESTRICT" | "HOLD"
        ));

        // The critic forced exactly one re-investigation round.
        let reinvestigations = engine
            .store()
            .trace_for_case(outcome.case_id)
            .unwrap()
            .iter()
            .filter(|e| e.ref_type.as_deref() == Some("reinvestigation"))
            .count();
        assert_eq!(reinvestigations, 1);
    }

    #[tokio::test]
    async fn test_scenario_missing_required_source() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        let outcome = runner.run(&missing_metar()).await.unwrap();
        assert_eq!(outcome.summary.status, CaseStatus::Blocked);

        let packet = engine.get_packet(outcome.case_id).unwrap().unwrap();
        let blocked = packet.blocked_section.unwrap();
        assert!(blocked.missing_evidence_requests.iter().any(|m| {
            m["source_system"] == "METAR" && m["criticality"] == "BLOCKING"
        }));
        assert!(packet.actions_executed.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_approval_gated_shipment_action() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        let outcome = runner.run(&approval_gated_hold()).await.unwrap();
        assert_eq!(outcome.summary.status, CaseStatus::Blocked);
        assert!(outcome.summary.pending_approvals >= 1);

        let actions = engine.store().actions_for_case(outcome.case_id).unwrap();
        let hold = actions
            .iter()
            .find(|a| a.action_type == "HOLD_CARGO")
            .unwrap();
        assert_eq!(hold.state, ActionState::PendingApproval.to_string());
        assert!(hold.requires_approval);

        let result = engine
            .approve_action(outcome.case_id, hold.id, "duty.manager")
            .unwrap();
        assert!(result.executed);
        assert_eq!(result.final_state, CaseStatus::Resolved);

        let hold = engine.store().get_action(hold.id).unwrap().unwrap();
        assert_eq!(hold.state, ActionState::Completed.to_string());
    }

    #[tokio::test]
    async fn test_hybrid_search_deterministic_over_five_cases() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        // Index five completed cases.
        for scenario in [
            kjfk_ground_stop(),
            klax_normal(),
            contradictory_signals(),
            missing_metar(),
            approval_gated_hold(),
        ] {
            runner.run(&scenario).await.unwrap();
        }

        let first = engine.hybrid_search("ground stop HOLD", None, 5).unwrap();
        let second = engine.hybrid_search("ground stop HOLD", None, 5).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.id, b.id);
            assert!((a.final_score - b.final_score).abs() < 1e-4);
        }
    }

    #[tokio::test]
    async fn test_replay_reproduces_final_posture() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        let outcome = runner.run(&kjfk_ground_stop()).await.unwrap();
        let packet = engine.get_packet(outcome.case_id).unwrap().unwrap();

        let replay = engine.replay_case(outcome.case_id).unwrap();
        assert!(replay.valid);
        assert_eq!(replay.final_state, "COMPLETE");
        assert_eq!(
            replay.posture.as_deref(),
            Some(packet.posture_decision.posture.as_str())
        );

        let mut packet_actions: Vec<String> = packet
            .actions_proposed
            .iter()
            .map(|a| a.action_type.clone())
            .collect();
        packet_actions.sort();
        assert_eq!(replay.action_types, packet_actions);
    }

    #[tokio::test]
    async fn test_trace_seq_contiguous_after_run() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        let outcome = runner.run(&klax_normal()).await.unwrap();
        let trace = engine.store().trace_for_case(outcome.case_id).unwrap();
        let seqs: Vec<i64> = trace.iter().map(|e| e.seq).collect();
        let expected: Vec<i64> = (1..=seqs.len() as i64).collect();
        assert_eq!(seqs, expected);
    }

    #[tokio::test]
    async fn test_streaming_emits_one_event_per_transition() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        crate::simulation::seed_policies(engine.store()).unwrap();

        let case_id = engine
            .create_case(CaseType::AirportDisruption, json!({"airport": "KLAX"}))
            .unwrap();
        let scenario = klax_normal();
        let registry = ScenarioRegistry::for_scenario(&scenario);

        let (mut rx, fut) = engine.run_case_streaming(
            case_id,
            CaseRunOptions {
                use_playbook: false,
                registry_override: Some(&registry),
                cancel: None,
            },
        );
        let summary = fut.await.unwrap();
        assert_eq!(summary.status, CaseStatus::Resolved);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));

        let transitions = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::StateTransition { .. }))
            .count();
        let trace_enters = engine
            .store()
            .trace_for_case(case_id)
            .unwrap()
            .iter()
            .filter(|e| {
                e.event_type == crate::graph::types::TraceEventType::StateEnter
                    && e.ref_type.as_deref() == Some("state")
            })
            .count();
        assert_eq!(transitions, trace_enters);
    }

    /// Wrapper that serves scenario fixtures but reports itself as a
    /// live registry, so the evidence cache applies.
    struct LiveLikeRegistry(ScenarioRegistry);

    #[async_trait::async_trait]
    impl crate::ingestion::registry::SignalRegistry for LiveLikeRegistry {
        async fn ingest_airport(
            &self,
            icao: &str,
        ) -> crate::error::Result<crate::ingestion::registry::AirportIngestion> {
            self.0.ingest_airport(icao).await
        }
    }

    #[tokio::test]
    async fn test_evidence_cache_reused_within_window() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        crate::simulation::seed_policies(engine.store()).unwrap();

        let scenario = klax_normal();
        let registry = LiveLikeRegistry(ScenarioRegistry::for_scenario(&scenario));

        let first_case = engine
            .create_case(CaseType::AirportDisruption, json!({"airport": "KLAX"}))
            .unwrap();
        engine
            .run_case(
                first_case,
                CaseRunOptions {
                    use_playbook: false,
                    registry_override: Some(&registry),
                    cancel: None,
                },
            )
            .await
            .unwrap();

        let second_case = engine
            .create_case(CaseType::AirportDisruption, json!({"airport": "KLAX"}))
            .unwrap();
        engine
            .run_case(
                second_case,
                CaseRunOptions {
                    use_playbook: false,
                    registry_override: Some(&registry),
                    cancel: None,
                },
            )
            .await
            .unwrap();

        // The second run linked the first run's rows instead of
        // creating new ones.
        let mut first_ids: Vec<Uuid> = engine
            .store()
            .evidence_for_case(first_case)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        let mut second_ids: Vec<Uuid> = engine
            .store()
            .evidence_for_case(second_case)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        first_ids.sort();
        second_ids.sort();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn test_cancellation_between_transitions() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);

        let case_id = engine
            .create_case(CaseType::AirportDisruption, json!({"airport": "KLAX"}))
            .unwrap();
        let scenario = klax_normal();
        let registry = ScenarioRegistry::for_scenario(&scenario);

        let cancel = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let summary = engine
            .run_case(
                case_id,
                CaseRunOptions {
                    use_playbook: false,
                    registry_override: Some(&registry),
                    cancel: Some(cancel),
                },
            )
            .await
            .unwrap();

        assert_eq!(summary.status, CaseStatus::Blocked);
        assert_eq!(summary.actions_proposed, 0);
        let trace = engine.store().trace_for_case(case_id).unwrap();
        assert!(trace
            .iter()
            .any(|e| e.ref_type.as_deref() == Some("cancel")));
    }

    #[tokio::test]
    async fn test_get_packet_none_for_open_case() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let case_id = engine
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        assert!(engine.get_packet(case_id).unwrap().is_none());
        assert!(engine.get_packet(Uuid::new_v4()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_completed_posture_matches_packet() {
        let dir = TempDir::new().unwrap();
        let engine = test_engine(&dir);
        let runner = ScenarioRunner::new(&engine);

        let outcome = runner.run(&kjfk_ground_stop()).await.unwrap();
        let packet = engine.get_packet(outcome.case_id).unwrap().unwrap();

        let completed_postures: Vec<_> = engine
            .store()
            .actions_for_case(outcome.case_id)
            .unwrap()
            .into_iter()
            .filter(|a| a.action_type == "SET_POSTURE" && a.state == "COMPLETED")
            .collect();
        assert_eq!(completed_postures.len(), 1);
        assert_eq!(
            completed_postures[0].args["posture"],
            serde_json::json!(packet.posture_decision.posture)
        );
    }
}
