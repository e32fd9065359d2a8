//! Critic agent - evidence quality gate.
//!
//! Hard guardrails the engine cannot override: at least two valid
//! evidence sources, and at most two prior rejections before the
//! verdict is force-accepted to prevent oscillation. With three or more
//! valid sources the engine verdict is honored; with exactly two the
//! marginal evidence is accepted to unblock progress. Engine failure is
//! fail-closed: INSUFFICIENT_EVIDENCE.

use crate::agents::{AgentContext, AgentOutcome, RoleAgent};
use crate::error::Result;
use crate::graph::types::TraceEventType;
use crate::llm::{ChatMessage, NarrativeEngine};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::warn;

pub const VERDICT_ACCEPTABLE: &str = "ACCEPTABLE";
pub const VERDICT_INSUFFICIENT: &str = "INSUFFICIENT_EVIDENCE";

/// Rejections after which the critic force-accepts.
pub const MAX_REJECTIONS: i64 = 2;
/// Valid sources required before the engine verdict is honored.
pub const MIN_SOURCES_FOR_ENGINE_VERDICT: usize = 3;

/// Evidence older than this is flagged stale to the engine.
const STALENESS_MINUTES: i64 = 30;

const CRITIC_SYSTEM_PROMPT: &str = "You are an adversarial evidence critic for air freight \
gateway operations. Challenge the reasoning: could stale data hide a developing situation? Does \
\"FAA normal\" really mean conditions are safe? Required sources are FAA_NAS and METAR; TAF and \
NWS_ALERTS should be present; ADSB is nice to have.\n\
Return INSUFFICIENT_EVIDENCE when a required source is missing, evidence is stale during active \
weather, or sources clearly contradict. Return ACCEPTABLE when core sources are present and \
consistent.\n\
Respond with JSON only: {\"reasoning\": ..., \"critical_gaps\": [...], \"minor_gaps\": [...], \
\"confidence_in_evidence\": 0..1, \"verdict\": \"ACCEPTABLE|INSUFFICIENT_EVIDENCE\", \
\"verdict_rationale\": ...}";

/// Evidence quality critic.
pub struct CriticAgent;

#[async_trait]
impl RoleAgent for CriticAgent {
    async fn run(&self, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome> {
        let rejection_count = ctx.store.count_trace_events(
            ctx.case.id,
            TraceEventType::GuardrailFail,
            "critic",
        )?;

        // Loop prevention outranks everything else.
        if rejection_count >= MAX_REJECTIONS {
            let verdict = VERDICT_ACCEPTABLE;
            self.log_verdict(
                ctx,
                verdict,
                &format!("Accepting after {} rejections (loop prevention)", rejection_count),
                None,
                rejection_count,
            )?;
            return Ok(AgentOutcome::CriticVerdict(verdict.to_string()));
        }

        let valid_count = ctx.belief.valid_evidence_count();
        let hard_fail = valid_count < 2;

        let llm_assessment = self.engine_critique(ctx).await;
        ctx.belief.increment_tool_calls(1);

        // Guardrail: too few valid sources while budget remains.
        if hard_fail && ctx.belief.budget_remaining() {
            let reason = format!(
                "Hard guardrail: only {} valid evidence sources (total: {}, errors: {})",
                valid_count,
                ctx.belief.evidence_count(),
                ctx.belief.error_evidence_count()
            );
            self.log_verdict(ctx, VERDICT_INSUFFICIENT, &reason, llm_assessment.as_ref(), rejection_count)?;
            return Ok(AgentOutcome::CriticVerdict(VERDICT_INSUFFICIENT.to_string()));
        }

        // Enough valid sources: honor the engine verdict, except when
        // the budget is already spent.
        if valid_count >= MIN_SOURCES_FOR_ENGINE_VERDICT {
            let assessment = llm_assessment.clone().unwrap_or_else(|| fail_closed("no response"));
            let mut verdict = if assessment["verdict"] == VERDICT_ACCEPTABLE {
                VERDICT_ACCEPTABLE
            } else {
                VERDICT_INSUFFICIENT
            };
            if verdict == VERDICT_INSUFFICIENT && !ctx.belief.budget_remaining() {
                verdict = VERDICT_ACCEPTABLE;
            }
            let rationale = assessment["verdict_rationale"]
                .as_str()
                .unwrap_or("engine assessment")
                .to_string();
            self.log_verdict(ctx, verdict, &rationale, Some(&assessment), rejection_count)?;
            return Ok(AgentOutcome::CriticVerdict(verdict.to_string()));
        }

        // Exactly two valid sources: marginal but workable.
        self.log_verdict(
            ctx,
            VERDICT_ACCEPTABLE,
            "Marginal evidence (2 sources) but proceeding",
            llm_assessment.as_ref(),
            rejection_count,
        )?;
        Ok(AgentOutcome::CriticVerdict(VERDICT_ACCEPTABLE.to_string()))
    }
}

impl CriticAgent {
    async fn engine_critique(&self, ctx: &AgentContext<'_>) -> Option<Value> {
        let context = self.build_context(ctx);
        match ctx
            .engine
            .complete_json(
                CRITIC_SYSTEM_PROMPT,
                &[ChatMessage::user(format!(
                    "Evaluate the evidence quality for this airport disruption case.\n\nEVIDENCE SUMMARY:\n{}",
                    context
                ))],
                0.0,
            )
            .await
        {
            Ok(assessment) => Some(assessment),
            Err(e) => {
                warn!(case = %ctx.case.id, error = %e, "critic engine unavailable, failing closed");
                Some(fail_closed(&e.to_string()))
            }
        }
    }

    fn build_context(&self, ctx: &AgentContext<'_>) -> String {
        let evidence = ctx.store.evidence_for_case(ctx.case.id).unwrap_or_default();
        let stale_threshold = Utc::now() - Duration::minutes(STALENESS_MINUTES);

        let mut stale_sources: Vec<&str> = evidence
            .iter()
            .filter(|e| e.retrieved_at < stale_threshold)
            .map(|e| e.source_system.as_str())
            .collect();
        stale_sources.dedup();

        let sources: Vec<Value> = evidence
            .iter()
            .map(|e| {
                json!({
                    "source": e.source_system,
                    "retrieved_at": e.retrieved_at.to_rfc3339(),
                    "excerpt": e.excerpt.chars().take(200).collect::<String>(),
                })
            })
            .collect();

        json!({
            "evidence_count": ctx.belief.evidence_count(),
            "valid_evidence_count": ctx.belief.valid_evidence_count(),
            "error_evidence_count": ctx.belief.error_evidence_count(),
            "contradiction_count": ctx.belief.contradiction_count(),
            "uncertainty_count": ctx.belief.uncertainty_count(),
            "evidence_sources": sources,
            "stale_sources": stale_sources,
            "proposed_posture": ctx.risk_assessment.as_ref().map(|r| r["recommended_posture"].clone()),
            "risk_level": ctx.risk_assessment.as_ref().map(|r| r["risk_level"].clone()),
        })
        .to_string()
    }

    fn log_verdict(
        &self,
        ctx: &AgentContext<'_>,
        verdict: &str,
        reasoning: &str,
        llm_assessment: Option<&Value>,
        rejection_count: i64,
    ) -> Result<()> {
        let event_type = if verdict == VERDICT_ACCEPTABLE {
            TraceEventType::ToolResult
        } else {
            TraceEventType::GuardrailFail
        };

        let mut meta = json!({
            "verdict": verdict,
            "reasoning": reasoning,
            "rejection_count": rejection_count,
        });
        if let Some(assessment) = llm_assessment {
            meta["llm_critique"] = json!({
                "confidence_in_evidence": assessment["confidence_in_evidence"],
                "critical_gaps": assessment["critical_gaps"],
            });
        }

        ctx.store.append_trace(
            ctx.case.id,
            event_type,
            Some("critic"),
            Some(&ctx.case.id.to_string()),
            meta,
        )?;
        Ok(())
    }
}

fn fail_closed(reason: &str) -> Value {
    json!({
        "verdict": VERDICT_INSUFFICIENT,
        "verdict_rationale": format!(
            "Engine critique unavailable ({}). Cannot verify evidence quality - requiring reinvestigation.",
            reason
        ),
        "confidence_in_evidence": 0.0,
        "critical_gaps": ["Engine critique unavailable - evidence quality unverified"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentContext;
    use crate::belief::BeliefState;
    use crate::blob::BlobStore;
    use crate::governance::runner::StubRunner;
    use crate::graph::store::GraphStore;
    use crate::graph::types::CaseType;
    use crate::llm::ScriptedEngine;
    use tempfile::TempDir;
    use uuid::Uuid;

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

    async fn verdict_with(valid_evidence: usize, engine: &ScriptedEngine) -> String {
        let store = GraphStore::in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path()).unwrap();
        let case = store
            .create_case(CaseType::AirportDisruption, serde_json::json!({"airport": "KJFK"}))
            .unwrap();
        let mut belief = BeliefState::new(case.id, 10, 50);
        for _ in 0..valid_evidence {
            belief.valid_evidence_ids.push(Uuid::new_v4());
            belief.evidence_ids.push(Uuid::new_v4());
        }

        let runner = StubRunner;
        let registry = NullRegistry;
        let mut ctx = AgentContext {
            case: &case,
            belief: &mut belief,
            store: &store,
            blobs: &blobs,
            engine,
            registry: &registry,
            runner: &runner,
            risk_assessment: None,
            proposed_actions: Vec::new(),
            playbook_template: None,
        };

        match CriticAgent.run(&mut ctx).await.unwrap() {
            AgentOutcome::CriticVerdict(verdict) => verdict,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_one_valid_source_rejected() {
        let engine = ScriptedEngine::new();
        assert_eq!(verdict_with(1, &engine).await, VERDICT_INSUFFICIENT);
    }

    #[tokio::test]
    async fn test_two_valid_sources_accepted_marginal() {
        let engine = ScriptedEngine::new();
        assert_eq!(verdict_with(2, &engine).await, VERDICT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_three_sources_honor_engine() {
        let engine = ScriptedEngine::new()
            .with_response(serde_json::json!({"verdict": "INSUFFICIENT_EVIDENCE", "verdict_rationale": "gaps"}));
        assert_eq!(verdict_with(3, &engine).await, VERDICT_INSUFFICIENT);

        let engine = ScriptedEngine::new()
            .with_response(serde_json::json!({"verdict": "ACCEPTABLE", "verdict_rationale": "fine"}));
        assert_eq!(verdict_with(3, &engine).await, VERDICT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_engine_failure_fails_closed() {
        let engine = ScriptedEngine::failing();
        assert_eq!(verdict_with(3, &engine).await, VERDICT_INSUFFICIENT);
    }
}
