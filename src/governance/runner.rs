//! Pluggable action side effects.
//!
//! The core never issues real carrier actions - runners are the seam
//! where a deployment wires in webhooks or carrier APIs. The stub
//! runner records a type-specific payload and succeeds.

use crate::error::Result;
use crate::graph::store::ActionRow;
use chrono::Utc;
use serde_json::{json, Value};

/// Executes the side effect of one action and returns the outcome
/// payload.
pub trait ActionRunner: Send + Sync {
    fn execute(&self, action: &ActionRow) -> Result<Value>;

    /// Compensating side effect for a rollback. Default mirrors the
    /// forward payload with a `compensated` marker.
    fn compensate(&self, action: &ActionRow) -> Result<Value> {
        Ok(json!({
            "compensated": true,
            "action_type": action.action_type,
            "at": Utc::now().to_rfc3339(),
        }))
    }
}

/// Stub runner used by the core and the simulation harness.
#[derive(Debug, Clone, Default)]
pub struct StubRunner;

impl ActionRunner for StubRunner {
    fn execute(&self, action: &ActionRow) -> Result<Value> {
        let now = Utc::now().to_rfc3339();
        let payload = match action.action_type.as_str() {
            "SET_POSTURE" => json!({
                "posture": action.args.get("posture").cloned().unwrap_or(Value::Null),
                "airport": action.args.get("airport").cloned().unwrap_or(Value::Null),
                "effective_at": now,
            }),
            "PUBLISH_GATEWAY_ADVISORY" => json!({
                "advisory_published": true,
                "airport": action.args.get("airport").cloned().unwrap_or(Value::Null),
                "published_at": now,
            }),
            "ESCALATE_OPS" => json!({
                "escalated_to": "duty_manager",
                "escalated_at": now,
            }),
            "HOLD_CARGO" => json!({
                "cargo_held": true,
                "held_at": now,
            }),
            "REBOOK_FLIGHT" => json!({
                "rebooked": true,
                "rebooked_at": now,
            }),
            "NOTIFY_CUSTOMER" => json!({
                "notification_sent": true,
                "sent_at": now,
            }),
            other => json!({
                "executed": true,
                "action_type": other,
                "executed_at": now,
            }),
        };
        Ok(payload)
    }

    fn compensate(&self, action: &ActionRow) -> Result<Value> {
        let now = Utc::now().to_rfc3339();
        let payload = match action.action_type.as_str() {
            "SET_POSTURE" => json!({
                "compensated": true,
                "restored_posture": "ACCEPT",
                "at": now,
            }),
            "PUBLISH_GATEWAY_ADVISORY" => json!({
                "compensated": true,
                "advisory_retracted": true,
                "at": now,
            }),
            "HOLD_CARGO" => json!({
                "compensated": true,
                "cargo_released": true,
                "at": now,
            }),
            _ => json!({
                "compensated": true,
                "action_type": action.action_type,
                "at": now,
            }),
        };
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn action(action_type: &str, args: Value) -> ActionRow {
        ActionRow {
            id: Uuid::new_v4(),
            case_id: Uuid::new_v4(),
            action_type: action_type.to_string(),
            args,
            state: "EXECUTING".to_string(),
            risk_level: "LOW".to_string(),
            requires_approval: false,
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
        }
    }

    #[test]
    fn test_set_posture_payload() {
        let runner = StubRunner;
        let payload = runner
            .execute(&action("SET_POSTURE", json!({"posture": "HOLD", "airport": "KJFK"})))
            .unwrap();
        assert_eq!(payload["posture"], "HOLD");
        assert!(payload["effective_at"].is_string());
    }

    #[test]
    fn test_hold_cargo_compensation() {
        let runner = StubRunner;
        let payload = runner.compensate(&action("HOLD_CARGO", json!({}))).unwrap();
        assert_eq!(payload["cargo_released"], true);
    }
}
