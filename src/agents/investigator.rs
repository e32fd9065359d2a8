//! Investigator agent.
//!
//! Runs the ingestion fan-out, persists evidence and derived edges,
//! records and resolves missing-evidence requests per source, and keys
//! uncertainties by source presence - "no disruption reported" is valid
//! evidence, a source we failed to check is an uncertainty.

use crate::agents::{AgentContext, AgentOutcome, RoleAgent};
use crate::belief::{Hypothesis, Uncertainty};
use crate::error::{Error, Result};
use crate::graph::store::NewEvidence;
use crate::graph::types::{Evidence, NodeType, TraceEventType};
use crate::ingestion::registry::{SourceRecord, SourceStatus, ALL_SOURCES};
use crate::signals::contradiction::detect_and_persist;
use crate::signals::derive::{SignalDeriver, DEFAULT_MOVEMENT_BASELINE, SIGNAL_EDGE_TYPES};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Evidence reuse window in seconds.
pub const CACHE_WINDOW_SECS: i64 = 300;

fn uncertainty_type_for(source: &str) -> &'static str {
    match source {
        "FAA_NAS" => "airport_status_unknown",
        "METAR" => "weather_conditions_unknown",
        "TAF" => "forecast_unknown",
        "NWS_ALERTS" => "alerts_unknown",
        _ => "movement_unknown",
    }
}

fn uncertainty_question(source: &str, icao: &str) -> String {
    match source {
        "FAA_NAS" => format!("What is the official FAA status of {}?", icao),
        "METAR" => format!("What are the current conditions at {}?", icao),
        "TAF" => format!("What is the forecast for {}?", icao),
        "NWS_ALERTS" => format!("Are there severe-weather alerts near {}?", icao),
        _ => format!("Is aircraft movement at {} normal?", icao),
    }
}

/// Gathers evidence and updates the belief state.
pub struct InvestigatorAgent;

#[async_trait]
impl RoleAgent for InvestigatorAgent {
    async fn run(&self, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome> {
        let icao = ctx
            .case
            .airport()
            .map(str::to_string)
            .ok_or_else(|| Error::Config("case scope has no airport".to_string()))?;
        ctx.belief.airport_icao = Some(icao.clone());

        let airport = ctx.store.create_node(
            NodeType::Airport,
            &icao,
            Some(json!({"icao": icao, "movement_baseline": DEFAULT_MOVEMENT_BASELINE})),
        )?;

        // Pull in requests recorded before this case existed.
        let adopted = ctx.store.adopt_orphan_missing_evidence(ctx.case.id, &icao)?;
        if adopted > 0 {
            ctx.store.append_trace(
                ctx.case.id,
                TraceEventType::ToolResult,
                Some("missing_evidence"),
                None,
                json!({"adopted_orphans": adopted}),
            )?;
        }

        let cached = if ctx.registry.is_simulation() {
            None
        } else {
            self.cached_evidence(ctx, &icao)?
        };

        if let Some(cached) = cached {
            self.reuse_cached(ctx, airport.id, &icao, cached)?;
        } else {
            self.fetch_and_persist(ctx, airport.id, &icao).await?;
        }

        self.detect_contradictions(ctx, airport.id, &icao)?;
        self.seed_hypotheses(ctx, airport.id, &icao)?;

        Ok(AgentOutcome::Investigated {
            evidence_count: ctx.belief.evidence_count(),
        })
    }
}

impl InvestigatorAgent {
    /// Evidence from a fetch within the cache window when all five
    /// sources are present.
    fn cached_evidence(
        &self,
        ctx: &AgentContext<'_>,
        icao: &str,
    ) -> Result<Option<Vec<Evidence>>> {
        let since = Utc::now() - Duration::seconds(CACHE_WINDOW_SECS);
        let recent = ctx.store.recent_evidence_for_airport(icao, since)?;
        let sources: std::collections::HashSet<&str> =
            recent.iter().map(|e| e.source_system.as_str()).collect();
        let complete = ALL_SOURCES.iter().all(|s| sources.contains(s));
        Ok(complete.then_some(recent))
    }

    /// Link cached evidence into this case without re-fetching.
    fn reuse_cached(
        &self,
        ctx: &mut AgentContext<'_>,
        airport_node: Uuid,
        icao: &str,
        cached: Vec<Evidence>,
    ) -> Result<()> {
        info!(airport = icao, rows = cached.len(), "reusing cached evidence");

        for evidence in cached {
            let is_error = evidence.excerpt.contains("\"status\":\"api_error\"")
                || evidence.excerpt.contains("\"status\": \"api_error\"");

            ctx.store.append_trace(
                ctx.case.id,
                TraceEventType::ToolResult,
                Some("evidence"),
                Some(&evidence.id.to_string()),
                json!({"source": evidence.source_system, "cached": true}),
            )?;

            ctx.belief.evidence_ids.push(evidence.id);
            if is_error {
                ctx.belief.error_evidence_ids.push(evidence.id);
                self.record_missing(ctx, icao, &evidence.source_system, "cached api error")?;
            } else {
                ctx.belief.valid_evidence_ids.push(evidence.id);
            }
        }
        ctx.belief.increment_tool_calls(1);

        // Derived edges from the cached ingestion are already FACTs.
        let edges = ctx
            .store
            .latest_edges_per_source(airport_node, &SIGNAL_EDGE_TYPES, Utc::now())?;
        for edge in edges {
            self.link_edge(ctx, edge.id)?;
        }
        Ok(())
    }

    /// Run the fan-out and persist one evidence row per source attempt.
    async fn fetch_and_persist(
        &self,
        ctx: &mut AgentContext<'_>,
        airport_node: Uuid,
        icao: &str,
    ) -> Result<()> {
        let ingestion = ctx.registry.ingest_airport(icao).await?;
        ctx.belief.increment_tool_calls(ALL_SOURCES.len() as u32);

        let mut evidence_by_source: HashMap<String, Uuid> = HashMap::new();
        for record in ingestion.source_records() {
            let evidence_id = self.persist_record(ctx, icao, &record)?;
            evidence_by_source.insert(record.source.clone(), evidence_id);

            if record.status == SourceStatus::ApiError {
                let missing = record.missing.as_ref();
                let request_id = ctx.store.insert_missing_evidence(
                    Some(ctx.case.id),
                    &record.source,
                    missing.map(|m| m.request_type.as_str()).unwrap_or("airport_signal"),
                    json!({"airport": icao}),
                    record.error.as_deref().unwrap_or("fetch failed"),
                    missing
                        .map(|m| m.criticality)
                        .unwrap_or_else(|| crate::ingestion::registry::criticality_for_source(&record.source)),
                )?;
                self.add_uncertainty(ctx, icao, &record.source, Some(request_id.id));
            } else {
                ctx.store
                    .resolve_missing_evidence(ctx.case.id, &record.source, evidence_id)?;
                let uncertainty_id = format!("{}_unavailable", record.source.to_lowercase());
                ctx.belief.resolve_uncertainty(&uncertainty_id, evidence_id);
            }
        }

        // Derived edges, bound to their evidence and promoted to FACT.
        let deriver = SignalDeriver::new(ctx.store);
        let edge_ids = deriver.derive_and_persist(airport_node, &ingestion, &evidence_by_source)?;
        for edge_id in edge_ids {
            self.link_edge(ctx, edge_id)?;
        }

        Ok(())
    }

    fn persist_record(
        &self,
        ctx: &mut AgentContext<'_>,
        icao: &str,
        record: &SourceRecord,
    ) -> Result<Uuid> {
        let payload_bytes = if record.payload.is_null() {
            record
                .error
                .clone()
                .unwrap_or_else(|| record.status.as_str().to_string())
                .into_bytes()
        } else {
            record.payload.to_string().into_bytes()
        };

        let (sha, path) = ctx.blobs.put(&payload_bytes)?;

        let excerpt = json!({
            "status": record.status.as_str(),
            "source": record.source,
            "error": record.error,
        })
        .to_string();

        let (evidence, created) = ctx.store.insert_evidence(NewEvidence {
            source_system: record.source.clone(),
            source_ref: icao.to_string(),
            retrieved_at: record.retrieved_at,
            content_type: "application/json".to_string(),
            payload_sha256: sha,
            raw_path: Some(path.display().to_string()),
            excerpt,
            meta: json!({"airport": icao}),
        })?;

        ctx.store.append_trace(
            ctx.case.id,
            TraceEventType::ToolResult,
            Some("evidence"),
            Some(&evidence.id.to_string()),
            json!({
                "source": record.source,
                "status": record.status.as_str(),
                "deduplicated": !created,
            }),
        )?;

        if !ctx.belief.evidence_ids.contains(&evidence.id) {
            ctx.belief.evidence_ids.push(evidence.id);
            if record.status.is_valid_evidence() {
                ctx.belief.valid_evidence_ids.push(evidence.id);
            } else {
                ctx.belief.error_evidence_ids.push(evidence.id);
            }
        }

        Ok(evidence.id)
    }

    fn add_uncertainty(
        &self,
        ctx: &mut AgentContext<'_>,
        icao: &str,
        source: &str,
        request_id: Option<Uuid>,
    ) {
        let id = format!("{}_unavailable", source.to_lowercase());
        if ctx.belief.uncertainties.iter().any(|u| u.id == id && !u.resolved) {
            return;
        }
        ctx.belief.add_uncertainty(Uncertainty {
            id,
            question: uncertainty_question(source, icao),
            uncertainty_type: uncertainty_type_for(source).to_string(),
            missing_evidence_request_id: request_id,
            resolved: false,
            resolved_by_evidence_id: None,
        });
    }

    fn record_missing(&self, ctx: &mut AgentContext<'_>, icao: &str, source: &str, reason: &str) -> Result<()> {
        let request = ctx.store.insert_missing_evidence(
            Some(ctx.case.id),
            source,
            "airport_signal",
            json!({"airport": icao}),
            reason,
            crate::ingestion::registry::criticality_for_source(source),
        )?;
        self.add_uncertainty(ctx, icao, source, Some(request.id));
        Ok(())
    }

    fn link_edge(&self, ctx: &mut AgentContext<'_>, edge_id: Uuid) -> Result<()> {
        if ctx.belief.edge_ids.contains(&edge_id) {
            return Ok(());
        }
        ctx.store.append_trace(
            ctx.case.id,
            TraceEventType::ToolResult,
            Some("edge"),
            Some(&edge_id.to_string()),
            json!({"derived": true}),
        )?;
        ctx.belief.edge_ids.push(edge_id);
        Ok(())
    }

    fn detect_contradictions(
        &self,
        ctx: &mut AgentContext<'_>,
        airport_node: Uuid,
        icao: &str,
    ) -> Result<()> {
        let known: Vec<String> = ctx
            .belief
            .contradictions
            .iter()
            .map(|c| c.contradiction_type.clone())
            .collect();

        for detected in detect_and_persist(ctx.store, airport_node, icao, Utc::now(), &known)? {
            for claim in [detected.claim_a, detected.claim_b] {
                ctx.store.append_trace(
                    ctx.case.id,
                    TraceEventType::ToolResult,
                    Some("claim"),
                    Some(&claim.to_string()),
                    json!({"contradiction_type": detected.contradiction_type.clone()}),
                )?;
                ctx.belief.claim_ids.push(claim);
            }
            ctx.store.append_trace(
                ctx.case.id,
                TraceEventType::ToolResult,
                Some("contradiction"),
                Some(&detected.contradiction_id.to_string()),
                json!({
                    "contradiction_type": detected.contradiction_type.clone(),
                    "severity": detected.severity.clone(),
                    "explanation": detected.explanation.clone(),
                }),
            )?;
            ctx.belief.add_contradiction(crate::belief::ContradictionRef {
                claim_a: detected.claim_a,
                claim_b: detected.claim_b,
                contradiction_type: detected.contradiction_type,
                why_it_matters: detected.explanation,
                resolved: false,
            });
        }
        Ok(())
    }

    fn seed_hypotheses(
        &self,
        ctx: &mut AgentContext<'_>,
        airport_node: Uuid,
        icao: &str,
    ) -> Result<()> {
        if !ctx.belief.hypotheses.is_empty() {
            return Ok(());
        }

        let edges = ctx
            .store
            .latest_edges_per_source(airport_node, &SIGNAL_EDGE_TYPES, Utc::now())?;

        let faa_disrupted = edges.iter().any(|e| {
            e.edge_type.contains("FAA_DISRUPTION")
                && e.attrs.get("has_disruption").and_then(serde_json::Value::as_bool) == Some(true)
        });
        let weather_high = edges.iter().any(|e| {
            e.edge_type.contains("WEATHER_RISK")
                && e.attrs.get("severity").and_then(serde_json::Value::as_str) == Some("HIGH")
        });

        let hypothesis = if faa_disrupted || weather_high {
            Hypothesis {
                id: Uuid::new_v4(),
                text: format!("{} is experiencing an operational disruption", icao),
                confidence: 0.8,
                supporting_claim_ids: ctx.belief.claim_ids.clone(),
            }
        } else {
            Hypothesis {
                id: Uuid::new_v4(),
                text: format!("{} is operating normally", icao),
                confidence: 0.7,
                supporting_claim_ids: Vec::new(),
            }
        };
        ctx.belief.add_hypothesis(hypothesis);
        Ok(())
    }
}
