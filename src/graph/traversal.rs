//! Multi-hop traversal over the evidence graph.
//!
//! Reachability is a recursive query bounded by `max_hops <= 5` and
//! deduplicated by edge id; results come back as a [`Subgraph`], never
//! flat rows. All temporal filtering goes through the canonical
//! visibility predicate.

use crate::error::{Error, Result};
use crate::graph::store::GraphStore;
use crate::graph::types::{Edge, Node, NodeType, Subgraph};
use crate::graph::visibility::edge_visible_at;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Hard cap on traversal depth.
pub const MAX_HOPS: u32 = 5;

/// Edge types that make up the operational cascade from an airport.
pub const CASCADE_EDGE_TYPES: [&str; 4] = [
    "FLIGHT_DEPARTS_FROM",
    "SHIPMENT_ON_FLIGHT",
    "BOOKING_FOR_SHIPMENT",
    "BOOKING_WITH_CARRIER",
];

/// Parameters for a reachability query.
#[derive(Debug, Clone)]
pub struct TraversalQuery {
    pub start_nodes: Vec<Uuid>,
    pub edge_types: Vec<String>,
    pub at_event_time: DateTime<Utc>,
    pub at_ingest_time: DateTime<Utc>,
    /// 0 means only the start nodes' directly incident edges.
    pub max_hops: u32,
}

/// Operational exposure reachable from an airport through scheduled
/// flights to shipments and bookings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CascadeImpact {
    pub affected_flights: Vec<Value>,
    pub total_flights: usize,
    pub total_shipments: usize,
    pub total_bookings: usize,
    pub total_carriers: usize,
    pub total_revenue_at_risk: f64,
    pub total_weight_kg: f64,
    pub sla_at_risk_count: usize,
    pub premium_sla_at_risk: usize,
    pub express_sla_at_risk: usize,
}

impl GraphStore {
    /// Reachability over allowed edge types at `(event_time, ingest_time)`.
    ///
    /// Cycles are handled by `DISTINCT` on edge id in the recursive walk;
    /// depth beyond [`MAX_HOPS`] is rejected.
    pub fn traverse(&self, query: &TraversalQuery) -> Result<Subgraph> {
        if query.max_hops > MAX_HOPS {
            return Err(Error::Config(format!(
                "max_hops {} exceeds cap {}",
                query.max_hops, MAX_HOPS
            )));
        }
        if query.start_nodes.is_empty() || query.edge_types.is_empty() {
            return Ok(Subgraph::default());
        }

        let mut edges: BTreeMap<String, Edge> = BTreeMap::new();
        for start in &query.start_nodes {
            for edge in self.walk_from(*start, query)? {
                edges.insert(edge.id.to_string(), edge);
            }
        }

        let mut node_ids: BTreeSet<Uuid> = query.start_nodes.iter().copied().collect();
        for edge in edges.values() {
            node_ids.insert(edge.src);
            node_ids.insert(edge.dst);
        }

        let nodes = self.nodes_by_ids(&node_ids)?;
        Ok(Subgraph {
            nodes,
            edges: edges.into_values().collect(),
        })
    }

    fn walk_from(&self, start: Uuid, query: &TraversalQuery) -> Result<Vec<Edge>> {
        let type_list = query
            .edge_types
            .iter()
            .map(|t| format!("'{}'", t.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        let visible = edge_visible_at("e", true);

        let sql = format!(
            "WITH RECURSIVE walk(edge_id, node_id, depth) AS (
                 SELECT e.id, CASE WHEN e.src = :start THEN e.dst ELSE e.src END, 1
                 FROM edge e
                 WHERE (e.src = :start OR e.dst = :start)
                   AND e.edge_type IN ({types})
                   AND e.status = 'FACT'
                   AND {visible}
                 UNION
                 SELECT e.id, CASE WHEN e.src = w.node_id THEN e.dst ELSE e.src END, w.depth + 1
                 FROM edge e
                 JOIN walk w ON (e.src = w.node_id OR e.dst = w.node_id)
                 WHERE w.depth <= :max_hops
                   AND e.edge_type IN ({types})
                   AND e.status = 'FACT'
                   AND {visible}
             )
             SELECT DISTINCT e.id, e.src, e.dst, e.edge_type, e.attrs, e.status,
                    e.supersedes_edge_id, e.event_time_start, e.event_time_end,
                    e.ingested_at, e.valid_from, e.valid_to, e.source_system, e.confidence
             FROM edge e
             JOIN walk w ON w.edge_id = e.id
             ORDER BY e.id",
            types = type_list,
            visible = visible
        );

        self.query_edges_named(
            &sql,
            &[
                (":start", &start.to_string()),
                (":max_hops", &(query.max_hops as i64)),
                (":at_event_time", &super::store::ts(query.at_event_time)),
                (":at_ingest_time", &super::store::ts(query.at_ingest_time)),
            ],
        )
    }

    fn nodes_by_ids(&self, ids: &BTreeSet<Uuid>) -> Result<Vec<Node>> {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.node_by_id(*id)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// Cascade analysis from an airport at `event_time = ingest_time = now`.
    ///
    /// Walks flights scheduled out of the airport down to shipments,
    /// bookings and carriers, and rolls up forwarder revenue exposure and
    /// the bookings whose SLA deadline falls inside the next 48 hours.
    pub fn cascade_from_airport(&self, icao: &str) -> Result<CascadeImpact> {
        let airport = match self.get_node_by_identifier(NodeType::Airport, icao)? {
            Some(node) => node,
            None => return Ok(CascadeImpact::default()),
        };

        let now = Utc::now();
        let subgraph = self.traverse(&TraversalQuery {
            start_nodes: vec![airport.id],
            edge_types: CASCADE_EDGE_TYPES.iter().map(|s| s.to_string()).collect(),
            at_event_time: now,
            at_ingest_time: now,
            max_hops: 4,
        })?;

        let mut impact = CascadeImpact::default();
        let sla_window_end = now + Duration::hours(48);

        for node in &subgraph.nodes {
            let attrs = self
                .node_version_at(node.id, now)?
                .map(|v| v.attrs)
                .unwrap_or(Value::Null);

            match node.node_type {
                NodeType::Flight => {
                    impact.total_flights += 1;
                    impact.affected_flights.push(serde_json::json!({
                        "flight_number": node.identifier,
                        "origin": attrs.get("origin").cloned().unwrap_or(Value::Null),
                        "destination": attrs.get("destination").cloned().unwrap_or(Value::Null),
                    }));
                }
                NodeType::Shipment => {
                    impact.total_shipments += 1;
                    impact.total_weight_kg += attrs
                        .get("weight_kg")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                }
                NodeType::Booking => {
                    impact.total_bookings += 1;
                    impact.total_revenue_at_risk += attrs
                        .get("revenue_usd")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);

                    let tier = attrs
                        .get("service_tier")
                        .and_then(Value::as_str)
                        .unwrap_or("STANDARD");
                    let deadline = attrs
                        .get("sla_deadline")
                        .and_then(Value::as_str)
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc));

                    if let Some(deadline) = deadline {
                        if deadline <= sla_window_end {
                            impact.sla_at_risk_count += 1;
                            match tier {
                                "PREMIUM" => impact.premium_sla_at_risk += 1,
                                "EXPRESS" => impact.express_sla_at_risk += 1,
                                _ => {}
                            }
                        }
                    }
                }
                NodeType::Carrier => impact.total_carriers += 1,
                _ => {}
            }
        }

        // Keep the flight list small and stable for packet embedding.
        impact
            .affected_flights
            .sort_by(|a, b| a["flight_number"].to_string().cmp(&b["flight_number"].to_string()));
        impact.affected_flights.truncate(10);

        Ok(impact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::{NewEdge, NewEvidence};
    use serde_json::json;

    fn fact_edge(store: &GraphStore, src: Uuid, dst: Uuid, edge_type: &str) {
        let edge = store
            .create_edge(NewEdge {
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
            })
            .unwrap();
        let (evidence, _) = store
            .insert_evidence(NewEvidence {
                source_system: "OPERATIONAL".to_string(),
                source_ref: format!("{}-{}", edge_type, edge.id),
                retrieved_at: Utc::now(),
                content_type: "application/json".to_string(),
                payload_sha256: edge.id.to_string(),
                raw_path: None,
                excerpt: String::new(),
                meta: json!({}),
            })
            .unwrap();
        store.bind_edge_evidence(edge.id, evidence.id).unwrap();
        store.promote_edge_to_fact(edge.id).unwrap();
    }

    #[test]
    fn test_traverse_depth_zero_incident_only() {
        let store = GraphStore::in_memory().unwrap();
        let airport = store.create_node(NodeType::Airport, "KJFK", None).unwrap();
        let flight = store.create_node(NodeType::Flight, "FX100", None).unwrap();
        let shipment = store.create_node(NodeType::Shipment, "SHP-1", None).unwrap();

        fact_edge(&store, flight.id, airport.id, "FLIGHT_DEPARTS_FROM");
        fact_edge(&store, shipment.id, flight.id, "SHIPMENT_ON_FLIGHT");

        let now = Utc::now();
        let subgraph = store
            .traverse(&TraversalQuery {
                start_nodes: vec![airport.id],
                edge_types: CASCADE_EDGE_TYPES.iter().map(|s| s.to_string()).collect(),
                at_event_time: now,
                at_ingest_time: now,
                max_hops: 0,
            })
            .unwrap();

        assert_eq!(subgraph.edges.len(), 1);
        assert_eq!(subgraph.edges[0].edge_type, "FLIGHT_DEPARTS_FROM");
    }

    #[test]
    fn test_traverse_reaches_bookings() {
        let store = GraphStore::in_memory().unwrap();
        let airport = store.create_node(NodeType::Airport, "KJFK", None).unwrap();
        let flight = store.create_node(NodeType::Flight, "FX100", None).unwrap();
        let shipment = store.create_node(NodeType::Shipment, "SHP-1", None).unwrap();
        let booking = store.create_node(NodeType::Booking, "BKG-1", None).unwrap();

        fact_edge(&store, flight.id, airport.id, "FLIGHT_DEPARTS_FROM");
        fact_edge(&store, shipment.id, flight.id, "SHIPMENT_ON_FLIGHT");
        fact_edge(&store, booking.id, shipment.id, "BOOKING_FOR_SHIPMENT");

        let now = Utc::now();
        let subgraph = store
            .traverse(&TraversalQuery {
                start_nodes: vec![airport.id],
                edge_types: CASCADE_EDGE_TYPES.iter().map(|s| s.to_string()).collect(),
                at_event_time: now,
                at_ingest_time: now,
                max_hops: 3,
            })
            .unwrap();

        assert_eq!(subgraph.edges.len(), 3);
        assert!(subgraph.nodes.iter().any(|n| n.identifier == "BKG-1"));
    }

    #[test]
    fn test_traverse_rejects_excess_depth() {
        let store = GraphStore::in_memory().unwrap();
        let airport = store.create_node(NodeType::Airport, "KJFK", None).unwrap();
        let err = store
            .traverse(&TraversalQuery {
                start_nodes: vec![airport.id],
                edge_types: vec!["FLIGHT_DEPARTS_FROM".to_string()],
                at_event_time: Utc::now(),
                at_ingest_time: Utc::now(),
                max_hops: 6,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_cascade_rollup() {
        let store = GraphStore::in_memory().unwrap();
        let airport = store.create_node(NodeType::Airport, "KJFK", None).unwrap();
        let flight = store
            .create_node(
                NodeType::Flight,
                "FX100",
                Some(json!({"origin": "KJFK", "destination": "KORD"})),
            )
            .unwrap();
        let shipment = store
            .create_node(NodeType::Shipment, "SHP-1", Some(json!({"weight_kg": 1200.0})))
            .unwrap();
        let deadline = (Utc::now() + Duration::hours(12)).to_rfc3339();
        let booking = store
            .create_node(
                NodeType::Booking,
                "BKG-1",
                Some(json!({
                    "revenue_usd": 48000.0,
                    "service_tier": "PREMIUM",
                    "sla_deadline": deadline,
                })),
            )
            .unwrap();

        fact_edge(&store, flight.id, airport.id, "FLIGHT_DEPARTS_FROM");
        fact_edge(&store, shipment.id, flight.id, "SHIPMENT_ON_FLIGHT");
        fact_edge(&store, booking.id, shipment.id, "BOOKING_FOR_SHIPMENT");

        let impact = store.cascade_from_airport("KJFK").unwrap();
        assert_eq!(impact.total_flights, 1);
        assert_eq!(impact.total_shipments, 1);
        assert_eq!(impact.total_bookings, 1);
        assert!((impact.total_revenue_at_risk - 48000.0).abs() < f64::EPSILON);
        assert_eq!(impact.sla_at_risk_count, 1);
        assert_eq!(impact.premium_sla_at_risk, 1);
    }

    #[test]
    fn test_cascade_missing_airport_is_empty() {
        let store = GraphStore::in_memory().unwrap();
        let impact = store.cascade_from_airport("KSEA").unwrap();
        assert_eq!(impact.total_flights, 0);
        assert!((impact.total_revenue_at_risk).abs() < f64::EPSILON);
    }
}
