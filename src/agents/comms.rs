//! Comms agent - template-based drafts, no engine call.

use crate::agents::{AgentContext, AgentOutcome, RoleAgent};
use crate::error::Result;
use crate::graph::types::TraceEventType;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Drafts stakeholder communications for planned actions.
pub struct CommsAgent;

#[async_trait]
impl RoleAgent for CommsAgent {
    async fn run(&self, ctx: &mut AgentContext<'_>) -> Result<AgentOutcome> {
        let airport = ctx.belief.airport_icao.clone().unwrap_or_default();
        let posture = ctx.belief.current_posture.to_string();
        let risk_level = ctx
            .risk_assessment
            .as_ref()
            .and_then(|r| r["risk_level"].as_str())
            .unwrap_or("UNKNOWN")
            .to_string();

        let mut drafts = Vec::new();
        for action in &ctx.proposed_actions {
            if !action.requires_notification {
                continue;
            }
            let draft = match action.action_type.as_str() {
                "PUBLISH_GATEWAY_ADVISORY" => json!({
                    "kind": "gateway_advisory",
                    "action_type": action.action_type,
                    "subject": format!("Gateway advisory: {} posture at {}", posture, airport),
                    "body": format!(
                        "Gateway posture at {} is now {}. Risk level: {}. New tenders are \
                         governed by the posted posture until further notice.",
                        airport, posture, risk_level
                    ),
                }),
                "ESCALATE_OPS" => json!({
                    "kind": "ops_escalation",
                    "action_type": action.action_type,
                    "subject": format!("Duty manager review required: {}", airport),
                    "body": format!(
                        "Signals at {} require duty-manager judgment (risk level {}). \
                         Review the decision packet and confirm the posture.",
                        airport, risk_level
                    ),
                }),
                "NOTIFY_CUSTOMER" => json!({
                    "kind": "customer_notification",
                    "action_type": action.action_type,
                    "subject": format!("Service update for shipments via {}", airport),
                    "body": format!(
                        "Shipments routed through {} may be delayed while the gateway is \
                         under a {} posture. Our operations team is monitoring the situation.",
                        airport, posture
                    ),
                }),
                other => json!({
                    "kind": "generic",
                    "action_type": other,
                    "subject": format!("Operational update for {}", airport),
                    "body": format!("Action {} planned for {}.", other, airport),
                }),
            };
            drafts.push(draft);
        }

        ctx.store.append_trace(
            ctx.case.id,
            TraceEventType::ToolResult,
            Some("comms"),
            None,
            json!({
                "drafts": drafts.len(),
                "kinds": drafts.iter().map(|d| d["kind"].clone()).collect::<Vec<_>>(),
            }),
        )?;

        Ok(AgentOutcome::CommsDrafted(drafts))
    }
}
