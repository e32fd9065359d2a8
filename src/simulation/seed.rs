//! Operational seed data for simulation runs.
//!
//! Builds the flights -> shipments -> bookings -> carriers subgraph
//! under an airport so cascade impact has something to traverse, and
//! seeds booking evidence for approval-gated scenarios.

use crate::blob::BlobStore;
use crate::error::Result;
use crate::graph::store::{GraphStore, NewEdge, NewEvidence};
use crate::graph::types::{NodeType, TraceEventType};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

fn operational_edge(
    store: &GraphStore,
    src: Uuid,
    dst: Uuid,
    edge_type: &str,
    source_ref: &str,
) -> Result<()> {
    let edge = store.create_edge(NewEdge {
        src,
        dst,
        edge_type: edge_type.to_string(),
        attrs: json!({}),
        source_system: "OPERATIONAL".to_string(),
        confidence: 1.0,
        event_time_start: None,
        event_time_end: None,
        valid_from: None,
        valid_to: None,
        supersedes_edge_id: None,
    })?;
    let payload = json!({"edge_type": edge_type, "ref": source_ref}).to_string();
    let (evidence, _) = store.insert_evidence(NewEvidence {
        source_system: "OPERATIONAL".to_string(),
        source_ref: source_ref.to_string(),
        retrieved_at: Utc::now(),
        content_type: "application/json".to_string(),
        payload_sha256: BlobStore::hash(payload.as_bytes()),
        raw_path: None,
        excerpt: json!({"status": "has_data", "source": "OPERATIONAL"}).to_string(),
        meta: json!({}),
    })?;
    store.bind_edge_evidence(edge.id, evidence.id)?;
    store.promote_edge_to_fact(edge.id)
}

/// Seed a small operational subgraph under an airport.
pub fn seed_operational_graph(store: &GraphStore, icao: &str) -> Result<()> {
    let airport = store.create_node(
        NodeType::Airport,
        icao,
        Some(json!({"icao": icao, "movement_baseline": 60.0})),
    )?;
    let carrier = store.create_node(NodeType::Carrier, "FREIGHTWING", Some(json!({"name": "Freightwing Cargo"})))?;

    let flights = [
        (format!("FW10{}", 1), "KORD"),
        (format!("FW10{}", 2), "KATL"),
        (format!("FW10{}", 3), "KDFW"),
    ];

    for (i, (flight_number, destination)) in flights.iter().enumerate() {
        let flight = store.create_node(
            NodeType::Flight,
            flight_number,
            Some(json!({"origin": icao, "destination": destination})),
        )?;
        operational_edge(store, flight.id, airport.id, "FLIGHT_DEPARTS_FROM", flight_number)?;

        let shipment_id = format!("SHP-{}-{}", icao, i + 1);
        let shipment = store.create_node(
            NodeType::Shipment,
            &shipment_id,
            Some(json!({"weight_kg": 800.0 + 400.0 * i as f64, "commodity": "GENERAL"})),
        )?;
        operational_edge(store, shipment.id, flight.id, "SHIPMENT_ON_FLIGHT", &shipment_id)?;

        let tier = match i {
            0 => "EXPRESS",
            1 => "PREMIUM",
            _ => "STANDARD",
        };
        let booking_id = format!("BKG-{}-{}", icao, i + 1);
        let booking = store.create_node(
            NodeType::Booking,
            &booking_id,
            Some(json!({
                "revenue_usd": 25_000.0 + 15_000.0 * i as f64,
                "service_tier": tier,
                "sla_deadline": (Utc::now() + Duration::hours(8 + 16 * i as i64)).to_rfc3339(),
            })),
        )?;
        operational_edge(store, booking.id, shipment.id, "BOOKING_FOR_SHIPMENT", &booking_id)?;
        operational_edge(store, booking.id, carrier.id, "BOOKING_WITH_CARRIER", &booking_id)?;
    }

    Ok(())
}

/// Link booking evidence to a case so shipment-level actions pass the
/// policy guardrail.
pub fn seed_booking_evidence(store: &GraphStore, case_id: Uuid, icao: &str) -> Result<()> {
    let payload: Value = json!({
        "booking": format!("BKG-{}-1", icao),
        "airport": icao,
        "service_tier": "EXPRESS",
    });
    let body = payload.to_string();

    let (evidence, _) = store.insert_evidence(NewEvidence {
        source_system: "BOOKING".to_string(),
        source_ref: format!("BKG-{}-1", icao),
        retrieved_at: Utc::now(),
        content_type: "application/json".to_string(),
        payload_sha256: BlobStore::hash(body.as_bytes()),
        raw_path: None,
        excerpt: json!({"status": "has_data", "source": "BOOKING"}).to_string(),
        meta: payload,
    })?;

    store.append_trace(
        case_id,
        TraceEventType::ToolResult,
        Some("evidence"),
        Some(&evidence.id.to_string()),
        json!({"source": "BOOKING", "status": "has_data"}),
    )?;
    Ok(())
}

/// Seed a couple of active governance policies.
pub fn seed_policies(store: &GraphStore) -> Result<()> {
    if !store.active_policies()?.is_empty() {
        return Ok(());
    }
    store.insert_policy(
        "critical-risk-posture",
        "CRITICAL risk never supports an ACCEPT posture.",
    )?;
    store.insert_policy(
        "shipment-action-evidence",
        "Shipment-level actions require booking evidence linked to the case.",
    )?;
    store.insert_policy(
        "contradiction-gate",
        "Open contradictions cannot support an ACCEPT posture for premium SLAs.",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_builds_cascade() {
        let store = GraphStore::in_memory().unwrap();
        seed_operational_graph(&store, "KJFK").unwrap();

        let impact = store.cascade_from_airport("KJFK").unwrap();
        assert_eq!(impact.total_flights, 3);
        assert_eq!(impact.total_shipments, 3);
        assert_eq!(impact.total_bookings, 3);
        assert!(impact.total_revenue_at_risk > 0.0);
        assert!(impact.sla_at_risk_count >= 2);
    }

    #[test]
    fn test_seed_idempotent_nodes() {
        let store = GraphStore::in_memory().unwrap();
        seed_operational_graph(&store, "KJFK").unwrap();
        seed_operational_graph(&store, "KJFK").unwrap();

        let impact = store.cascade_from_airport("KJFK").unwrap();
        assert_eq!(impact.total_flights, 3);
    }

    #[test]
    fn test_seed_policies_once() {
        let store = GraphStore::in_memory().unwrap();
        seed_policies(&store).unwrap();
        seed_policies(&store).unwrap();
        assert_eq!(store.active_policies().unwrap().len(), 3);
    }
}
