//! SQLite-backed bi-temporal graph store.
//!
//! The store is the only writer to `node`, `node_version`, `edge`,
//! `claim` and their join tables. Evidence rows are content-addressed
//! and deduplicated on `(source_system, source_ref, payload_sha256)`.
//! Trace sequence numbers are allocated under a per-case lock so writers
//! for the same case serialize while different cases do not contend.

use crate::error::{Error, Result};
use crate::graph::schema::{initialize_schema, is_initialized};
use crate::graph::types::*;
use crate::graph::visibility::{edge_visible_at, node_version_visible_at};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Encode a timestamp as fixed-width RFC 3339 so TEXT comparison is
/// chronological.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {}: {}", s, e)))
}

fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|v| parse_ts(&v)).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Storage(format!("bad uuid {}: {}", s, e)))
}

fn parse_uuid_opt(s: Option<String>) -> Result<Option<Uuid>> {
    s.map(|v| parse_uuid(&v)).transpose()
}

fn parse_json(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or(Value::Null)
}

/// Parameters for creating an edge. Edges default to DRAFT status and
/// `ingested_at` is set on write and never changed.
#[derive(Debug, Clone)]
pub struct NewEdge {
    pub src: Uuid,
    pub dst: Uuid,
    pub edge_type: String,
    pub attrs: Value,
    pub source_system: String,
    pub confidence: f64,
    pub event_time_start: Option<DateTime<Utc>>,
    pub event_time_end: Option<DateTime<Utc>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub supersedes_edge_id: Option<Uuid>,
}

/// Parameters for inserting an evidence row.
#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub source_system: String,
    pub source_ref: String,
    pub retrieved_at: DateTime<Utc>,
    pub content_type: String,
    pub payload_sha256: String,
    pub raw_path: Option<String>,
    pub excerpt: String,
    pub meta: Value,
}

/// Parameters for inserting a proposed action.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub case_id: Uuid,
    pub action_type: String,
    pub args: Value,
    pub risk_level: String,
    pub requires_approval: bool,
}

/// A persisted action row.
#[derive(Debug, Clone)]
pub struct ActionRow {
    pub id: Uuid,
    pub case_id: Uuid,
    pub action_type: String,
    pub args: Value,
    pub state: String,
    pub risk_level: String,
    pub requires_approval: bool,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// A persisted outcome row for an executed action.
#[derive(Debug, Clone)]
pub struct OutcomeRow {
    pub id: Uuid,
    pub action_id: Uuid,
    pub success: bool,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// An active governance policy.
#[derive(Debug, Clone)]
pub struct PolicyRow {
    pub id: Uuid,
    pub name: String,
    pub rule_text: String,
    pub active: bool,
}

/// SQLite-backed graph store.
pub struct GraphStore {
    conn: Arc<Mutex<Connection>>,
    seq_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl GraphStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            seq_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Create an in-memory store (tests, sandboxes).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            seq_locks: Mutex::new(HashMap::new()),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("connection lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| Error::Storage(e.to_string()))
    }

    fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("connection lock poisoned: {}", e)))?;
        f(&mut conn).map_err(|e| Error::Storage(e.to_string()))
    }

    // ==================== Case Operations ====================

    /// Create a new case in OPEN status.
    pub fn create_case(&self, case_type: CaseType, scope: Value) -> Result<CaseRecord> {
        let case = CaseRecord {
            id: Uuid::new_v4(),
            case_type,
            scope,
            status: CaseStatus::Open,
            created_at: Utc::now(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO case_record (id, case_type, scope, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    case.id.to_string(),
                    case.case_type.to_string(),
                    case.scope.to_string(),
                    case.status.to_string(),
                    ts(case.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(case)
    }

    /// Get a case by id.
    pub fn get_case(&self, case_id: Uuid) -> Result<Option<CaseRecord>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, case_type, scope, status, created_at
                 FROM case_record WHERE id = ?1",
                params![case_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(id, case_type, scope, status, created_at)| {
            Ok(CaseRecord {
                id: parse_uuid(&id)?,
                case_type: CaseType::from_str(&case_type).map_err(Error::Storage)?,
                scope: parse_json(&scope),
                status: CaseStatus::from_str(&status).map_err(Error::Storage)?,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    /// Set the case status. Called only by the case's orchestrator or the
    /// approval manager.
    pub fn set_case_status(&self, case_id: Uuid, status: CaseStatus) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE case_record SET status = ?2 WHERE id = ?1",
                params![case_id.to_string(), status.to_string()],
            )
        })?;
        if changed == 0 {
            return Err(Error::not_found("case", case_id));
        }
        Ok(())
    }

    // ==================== Node Operations ====================

    /// Create a node, or return the existing one when `(type, identifier)`
    /// already exists. The optional initial version is inserted atomically
    /// with the node.
    pub fn create_node(
        &self,
        node_type: NodeType,
        identifier: &str,
        attrs: Option<Value>,
    ) -> Result<Node> {
        if let Some(existing) = self.get_node_by_identifier(node_type, identifier)? {
            return Ok(existing);
        }

        let node = Node {
            id: Uuid::new_v4(),
            node_type,
            identifier: identifier.to_string(),
            created_at: Utc::now(),
        };
        let version_attrs = attrs.clone();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO node (id, node_type, identifier, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (node_type, identifier) DO NOTHING",
                params![
                    node.id.to_string(),
                    node.node_type.to_string(),
                    node.identifier,
                    ts(node.created_at),
                ],
            )?;
            // Another writer may have won the race; the version row, if
            // any, belongs only to the node this call created.
            let winner: String = tx.query_row(
                "SELECT id FROM node WHERE node_type = ?1 AND identifier = ?2",
                params![node.node_type.to_string(), node.identifier],
                |row| row.get(0),
            )?;
            if winner == node.id.to_string() {
                if let Some(attrs) = version_attrs {
                    tx.execute(
                        "INSERT INTO node_version (id, node_id, attrs, valid_from)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            Uuid::new_v4().to_string(),
                            node.id.to_string(),
                            attrs.to_string(),
                            ts(node.created_at),
                        ],
                    )?;
                }
            }
            tx.commit()
        })?;

        self.get_node_by_identifier(node_type, identifier)?
            .ok_or_else(|| Error::Internal("node vanished after insert".to_string()))
    }

    /// Look up a node by `(type, identifier)`.
    pub fn get_node_by_identifier(
        &self,
        node_type: NodeType,
        identifier: &str,
    ) -> Result<Option<Node>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, node_type, identifier, created_at FROM node
                 WHERE node_type = ?1 AND identifier = ?2",
                params![node_type.to_string(), identifier],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(id, node_type, identifier, created_at)| {
            Ok(Node {
                id: parse_uuid(&id)?,
                node_type: NodeType::from_str(&node_type).map_err(Error::Storage)?,
                identifier,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    /// Look up a node by id.
    pub fn node_by_id(&self, node_id: Uuid) -> Result<Option<Node>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, node_type, identifier, created_at FROM node WHERE id = ?1",
                params![node_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(id, node_type, identifier, created_at)| {
            Ok(Node {
                id: parse_uuid(&id)?,
                node_type: NodeType::from_str(&node_type).map_err(Error::Storage)?,
                identifier,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    /// Create a new node version, closing the prior current version in the
    /// same transaction.
    pub fn create_node_version(&self, node_id: Uuid, attrs: Value) -> Result<NodeVersion> {
        let now = Utc::now();
        let version = NodeVersion {
            id: Uuid::new_v4(),
            node_id,
            attrs,
            valid_from: now,
            valid_to: None,
            supersedes_id: None,
        };
        let attrs_str = version.attrs.to_string();

        let supersedes = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let prior: Option<String> = tx
                .query_row(
                    "SELECT id FROM node_version
                     WHERE node_id = ?1 AND valid_to IS NULL
                     ORDER BY valid_from DESC LIMIT 1",
                    params![node_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(ref prior_id) = prior {
                tx.execute(
                    "UPDATE node_version SET valid_to = ?2 WHERE id = ?1",
                    params![prior_id, ts(now)],
                )?;
            }

            tx.execute(
                "INSERT INTO node_version (id, node_id, attrs, valid_from, supersedes_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    version.id.to_string(),
                    node_id.to_string(),
                    attrs_str,
                    ts(now),
                    prior,
                ],
            )?;
            tx.commit()?;
            Ok(prior)
        })?;

        Ok(NodeVersion {
            supersedes_id: supersedes.as_deref().map(parse_uuid).transpose()?,
            ..version
        })
    }

    /// Current attributes of a node at the given event time.
    pub fn node_version_at(
        &self,
        node_id: Uuid,
        at_event_time: DateTime<Utc>,
    ) -> Result<Option<NodeVersion>> {
        let predicate = node_version_visible_at("nv");
        let sql = format!(
            "SELECT nv.id, nv.node_id, nv.attrs, nv.valid_from, nv.valid_to, nv.supersedes_id
             FROM node_version nv
             WHERE nv.node_id = :node_id AND {}
             ORDER BY nv.valid_from DESC LIMIT 1",
            predicate
        );

        let row = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row(
                &[
                    (":node_id", &node_id.to_string() as &dyn rusqlite::ToSql),
                    (":at_event_time", &ts(at_event_time)),
                ][..],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(id, node_id, attrs, valid_from, valid_to, supersedes)| {
            Ok(NodeVersion {
                id: parse_uuid(&id)?,
                node_id: parse_uuid(&node_id)?,
                attrs: parse_json(&attrs),
                valid_from: parse_ts(&valid_from)?,
                valid_to: parse_ts_opt(valid_to)?,
                supersedes_id: parse_uuid_opt(supersedes)?,
            })
        })
        .transpose()
    }

    // ==================== Edge Operations ====================

    /// Create an edge in DRAFT status. `ingested_at` is stamped here and
    /// never mutated.
    pub fn create_edge(&self, new: NewEdge) -> Result<Edge> {
        let edge = Edge {
            id: Uuid::new_v4(),
            src: new.src,
            dst: new.dst,
            edge_type: new.edge_type,
            attrs: new.attrs,
            status: EdgeStatus::Draft,
            supersedes_edge_id: new.supersedes_edge_id,
            event_time_start: new.event_time_start,
            event_time_end: new.event_time_end,
            ingested_at: Utc::now(),
            valid_from: new.valid_from,
            valid_to: new.valid_to,
            source_system: new.source_system,
            confidence: new.confidence,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO edge (id, src, dst, edge_type, attrs, status, supersedes_edge_id,
                                   event_time_start, event_time_end, ingested_at,
                                   valid_from, valid_to, source_system, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    edge.id.to_string(),
                    edge.src.to_string(),
                    edge.dst.to_string(),
                    edge.edge_type,
                    edge.attrs.to_string(),
                    edge.status.to_string(),
                    edge.supersedes_edge_id.map(|u| u.to_string()),
                    edge.event_time_start.map(ts),
                    edge.event_time_end.map(ts),
                    ts(edge.ingested_at),
                    edge.valid_from.map(ts),
                    edge.valid_to.map(ts),
                    edge.source_system,
                    edge.confidence,
                ],
            )?;
            Ok(())
        })?;

        Ok(edge)
    }

    /// Get an edge by id.
    pub fn get_edge(&self, edge_id: Uuid) -> Result<Option<Edge>> {
        let edges = self.query_edges(
            "SELECT id, src, dst, edge_type, attrs, status, supersedes_edge_id,
                    event_time_start, event_time_end, ingested_at, valid_from, valid_to,
                    source_system, confidence
             FROM edge WHERE id = :id",
            &[(":id", &edge_id.to_string())],
        )?;
        Ok(edges.into_iter().next())
    }

    /// Bind an evidence row to an edge (idempotent).
    pub fn bind_edge_evidence(&self, edge_id: Uuid, evidence_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO edge_evidence (edge_id, evidence_id) VALUES (?1, ?2)
                 ON CONFLICT DO NOTHING",
                params![edge_id.to_string(), evidence_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Promote a DRAFT edge to FACT. Refused unless at least one evidence
    /// row is bound to the edge.
    pub fn promote_edge_to_fact(&self, edge_id: Uuid) -> Result<()> {
        let bound: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM edge_evidence WHERE edge_id = ?1",
                params![edge_id.to_string()],
                |row| row.get(0),
            )
        })?;
        if bound == 0 {
            return Err(Error::evidence_without_binding("edge", edge_id.to_string()));
        }
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE edge SET status = 'FACT' WHERE id = ?1",
                params![edge_id.to_string()],
            )
        })?;
        if changed == 0 {
            return Err(Error::not_found("edge", edge_id));
        }
        Ok(())
    }

    /// Retract an edge.
    pub fn retract_edge(&self, edge_id: Uuid) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE edge SET status = 'RETRACTED' WHERE id = ?1",
                params![edge_id.to_string()],
            )
        })?;
        if changed == 0 {
            return Err(Error::not_found("edge", edge_id));
        }
        Ok(())
    }

    /// Most recent visible edge per source system for an airport node,
    /// restricted to the given edge types. Used by contradiction checks
    /// and the risk context.
    pub fn latest_edges_per_source(
        &self,
        src_node: Uuid,
        edge_types: &[&str],
        at: DateTime<Utc>,
    ) -> Result<Vec<Edge>> {
        if edge_types.is_empty() {
            return Ok(Vec::new());
        }
        let type_list = edge_types
            .iter()
            .map(|t| format!("'{}'", t))
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = edge_visible_at("e", true);
        let sql = format!(
            "SELECT e.id, e.src, e.dst, e.edge_type, e.attrs, e.status, e.supersedes_edge_id,
                    e.event_time_start, e.event_time_end, e.ingested_at, e.valid_from, e.valid_to,
                    e.source_system, e.confidence
             FROM edge e
             WHERE e.src = :src
               AND e.edge_type IN ({types})
               AND e.status = 'FACT'
               AND {predicate}
               AND e.ingested_at = (
                   SELECT MAX(e2.ingested_at) FROM edge e2
                   WHERE e2.src = e.src
                     AND e2.source_system = e.source_system
                     AND e2.edge_type = e.edge_type
                     AND e2.ingested_at <= :at_ingest_time
               )
             ORDER BY e.source_system, e.id",
            types = type_list,
            predicate = predicate
        );

        let at_str = ts(at);
        self.query_edges(
            &sql,
            &[
                (":src", &src_node.to_string()),
                (":at_event_time", &at_str),
                (":at_ingest_time", &at_str),
            ],
        )
    }

    /// All edges referenced by a case's trace.
    pub fn edges_for_case(&self, case_id: Uuid) -> Result<Vec<Edge>> {
        self.query_edges(
            "SELECT e.id, e.src, e.dst, e.edge_type, e.attrs, e.status, e.supersedes_edge_id,
                    e.event_time_start, e.event_time_end, e.ingested_at, e.valid_from, e.valid_to,
                    e.source_system, e.confidence
             FROM edge e
             JOIN trace_event t ON t.ref_id = e.id AND t.ref_type = 'edge'
             WHERE t.case_id = :case_id
             GROUP BY e.id
             ORDER BY e.ingested_at",
            &[(":case_id", &case_id.to_string())],
        )
    }

    pub(crate) fn query_edges_named(
        &self,
        sql: &str,
        named: &[(&str, &dyn rusqlite::ToSql)],
    ) -> Result<Vec<Edge>> {
        self.query_edges(sql, named)
    }

    fn query_edges(&self, sql: &str, named: &[(&str, &dyn rusqlite::ToSql)]) -> Result<Vec<Edge>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mapped = stmt.query_map(named, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<String>>(11)?,
                    row.get::<_, String>(12)?,
                    row.get::<_, f64>(13)?,
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter().map(Self::tuple_to_edge).collect()
    }

    #[allow(clippy::type_complexity)]
    fn tuple_to_edge(
        row: (
            String,
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
            String,
            f64,
        ),
    ) -> Result<Edge> {
        let (
            id,
            src,
            dst,
            edge_type,
            attrs,
            status,
            supersedes,
            ets,
            ete,
            ingested_at,
            valid_from,
            valid_to,
            source_system,
            confidence,
        ) = row;
        Ok(Edge {
            id: parse_uuid(&id)?,
            src: parse_uuid(&src)?,
            dst: parse_uuid(&dst)?,
            edge_type,
            attrs: parse_json(&attrs),
            status: EdgeStatus::from_str(&status).map_err(Error::Storage)?,
            supersedes_edge_id: parse_uuid_opt(supersedes)?,
            event_time_start: parse_ts_opt(ets)?,
            event_time_end: parse_ts_opt(ete)?,
            ingested_at: parse_ts(&ingested_at)?,
            valid_from: parse_ts_opt(valid_from)?,
            valid_to: parse_ts_opt(valid_to)?,
            source_system,
            confidence,
        })
    }

    // ==================== Evidence Operations ====================

    /// Insert an evidence row, returning the existing row when the
    /// content key already exists. The bool is true when a new row was
    /// created.
    pub fn insert_evidence(&self, new: NewEvidence) -> Result<(Evidence, bool)> {
        if let Some(existing) = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM evidence
                 WHERE source_system = ?1 AND source_ref = ?2 AND payload_sha256 = ?3",
                params![new.source_system, new.source_ref, new.payload_sha256],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })? {
            let evidence = self
                .get_evidence(parse_uuid(&existing)?)?
                .ok_or_else(|| Error::Internal("evidence vanished after lookup".to_string()))?;
            return Ok((evidence, false));
        }

        let evidence = Evidence {
            id: Uuid::new_v4(),
            source_system: new.source_system,
            source_ref: new.source_ref,
            retrieved_at: new.retrieved_at,
            content_type: new.content_type,
            payload_sha256: new.payload_sha256,
            raw_path: new.raw_path,
            excerpt: new.excerpt,
            meta: new.meta,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO evidence (id, source_system, source_ref, retrieved_at, content_type,
                                       payload_sha256, raw_path, excerpt, meta)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (source_system, source_ref, payload_sha256) DO NOTHING",
                params![
                    evidence.id.to_string(),
                    evidence.source_system,
                    evidence.source_ref,
                    ts(evidence.retrieved_at),
                    evidence.content_type,
                    evidence.payload_sha256,
                    evidence.raw_path,
                    evidence.excerpt,
                    evidence.meta.to_string(),
                ],
            )?;
            Ok(())
        })?;

        Ok((evidence, true))
    }

    /// Get an evidence row by id.
    pub fn get_evidence(&self, evidence_id: Uuid) -> Result<Option<Evidence>> {
        let rows = self.query_evidence(
            "SELECT id, source_system, source_ref, retrieved_at, content_type, payload_sha256,
                    raw_path, excerpt, meta
             FROM evidence WHERE id = :id",
            &[(":id", &evidence_id.to_string())],
        )?;
        Ok(rows.into_iter().next())
    }

    /// Evidence rows linked to a case via trace events.
    pub fn evidence_for_case(&self, case_id: Uuid) -> Result<Vec<Evidence>> {
        self.query_evidence(
            "SELECT e.id, e.source_system, e.source_ref, e.retrieved_at, e.content_type,
                    e.payload_sha256, e.raw_path, e.excerpt, e.meta
             FROM evidence e
             JOIN trace_event t ON t.ref_id = e.id AND t.ref_type = 'evidence'
             WHERE t.case_id = :case_id
             GROUP BY e.id
             ORDER BY e.retrieved_at",
            &[(":case_id", &case_id.to_string())],
        )
    }

    /// Evidence retrieved for an airport within a recency window, newest
    /// first per source. Backs the 5-minute ingestion cache.
    pub fn recent_evidence_for_airport(
        &self,
        icao: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Evidence>> {
        self.query_evidence(
            "SELECT e.id, e.source_system, e.source_ref, e.retrieved_at, e.content_type,
                    e.payload_sha256, e.raw_path, e.excerpt, e.meta
             FROM evidence e
             WHERE e.source_ref = :icao AND e.retrieved_at >= :since
               AND e.retrieved_at = (
                   SELECT MAX(e2.retrieved_at) FROM evidence e2
                   WHERE e2.source_ref = e.source_ref
                     AND e2.source_system = e.source_system
                     AND e2.retrieved_at >= :since
               )
             ORDER BY e.source_system",
            &[(":icao", &icao), (":since", &ts(since))],
        )
    }

    fn query_evidence(
        &self,
        sql: &str,
        named: &[(&str, &dyn rusqlite::ToSql)],
    ) -> Result<Vec<Evidence>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mapped = stmt.query_map(named, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(
                |(id, source_system, source_ref, retrieved_at, content_type, sha, raw, excerpt, meta)| {
                    Ok(Evidence {
                        id: parse_uuid(&id)?,
                        source_system,
                        source_ref,
                        retrieved_at: parse_ts(&retrieved_at)?,
                        content_type,
                        payload_sha256: sha,
                        raw_path: raw,
                        excerpt,
                        meta: parse_json(&meta),
                    })
                },
            )
            .collect()
    }

    // ==================== Claim Operations ====================

    /// Create a claim.
    pub fn create_claim(
        &self,
        text: &str,
        subject_node_id: Option<Uuid>,
        confidence: f64,
        status: ClaimStatus,
        event_time_start: Option<DateTime<Utc>>,
    ) -> Result<Claim> {
        let claim = Claim {
            id: Uuid::new_v4(),
            text: text.to_string(),
            subject_node_id,
            confidence,
            status,
            supersedes_claim_id: None,
            event_time_start,
            event_time_end: None,
            ingested_at: Utc::now(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO claim (id, text, subject_node_id, confidence, status,
                                    event_time_start, event_time_end, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    claim.id.to_string(),
                    claim.text,
                    claim.subject_node_id.map(|u| u.to_string()),
                    claim.confidence,
                    claim.status.to_string(),
                    claim.event_time_start.map(ts),
                    claim.event_time_end.map(ts),
                    ts(claim.ingested_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(claim)
    }

    /// Bind an evidence row to a claim (idempotent).
    pub fn bind_claim_evidence(&self, claim_id: Uuid, evidence_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO claim_evidence (claim_id, evidence_id) VALUES (?1, ?2)
                 ON CONFLICT DO NOTHING",
                params![claim_id.to_string(), evidence_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Promote a claim to FACT. Refused unless evidence is bound.
    pub fn promote_claim_to_fact(&self, claim_id: Uuid) -> Result<()> {
        let bound: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM claim_evidence WHERE claim_id = ?1",
                params![claim_id.to_string()],
                |row| row.get(0),
            )
        })?;
        if bound == 0 {
            return Err(Error::evidence_without_binding(
                "claim",
                claim_id.to_string(),
            ));
        }
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE claim SET status = 'FACT' WHERE id = ?1",
                params![claim_id.to_string()],
            )
        })?;
        if changed == 0 {
            return Err(Error::not_found("claim", claim_id));
        }
        Ok(())
    }

    /// Claims linked to a case via trace events, newest first.
    pub fn claims_for_case(&self, case_id: Uuid) -> Result<Vec<Claim>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.text, c.subject_node_id, c.confidence, c.status,
                        c.supersedes_claim_id, c.event_time_start, c.event_time_end, c.ingested_at
                 FROM claim c
                 JOIN trace_event t ON t.ref_id = c.id AND t.ref_type = 'claim'
                 WHERE t.case_id = :case_id
                 GROUP BY c.id
                 ORDER BY c.confidence DESC, c.ingested_at DESC",
            )?;
            let mapped = stmt.query_map(
                &[(":case_id", &case_id.to_string() as &dyn rusqlite::ToSql)][..],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(
                |(id, text, subject, confidence, status, supersedes, ets, ete, ingested)| {
                    Ok(Claim {
                        id: parse_uuid(&id)?,
                        text,
                        subject_node_id: parse_uuid_opt(subject)?,
                        confidence,
                        status: ClaimStatus::from_str(&status).map_err(Error::Storage)?,
                        supersedes_claim_id: parse_uuid_opt(supersedes)?,
                        event_time_start: parse_ts_opt(ets)?,
                        event_time_end: parse_ts_opt(ete)?,
                        ingested_at: parse_ts(&ingested)?,
                    })
                },
            )
            .collect()
    }

    /// Claims linked to a case and visible at `(event_time, ingest_time)`
    /// through the canonical claim predicate.
    pub fn visible_claims_for_case(
        &self,
        case_id: Uuid,
        at_event_time: DateTime<Utc>,
        at_ingest_time: DateTime<Utc>,
    ) -> Result<Vec<Claim>> {
        let predicate = crate::graph::visibility::claim_visible_at("c");
        let sql = format!(
            "SELECT c.id, c.text, c.subject_node_id, c.confidence, c.status,
                    c.supersedes_claim_id, c.event_time_start, c.event_time_end, c.ingested_at
             FROM claim c
             JOIN trace_event t ON t.ref_id = c.id AND t.ref_type = 'claim'
             WHERE t.case_id = :case_id AND {}
             GROUP BY c.id
             ORDER BY c.confidence DESC, c.ingested_at DESC",
            predicate
        );

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mapped = stmt.query_map(
                &[
                    (":case_id", &case_id.to_string() as &dyn rusqlite::ToSql),
                    (":at_event_time", &ts(at_event_time)),
                    (":at_ingest_time", &ts(at_ingest_time)),
                ][..],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(
                |(id, text, subject, confidence, status, supersedes, ets, ete, ingested)| {
                    Ok(Claim {
                        id: parse_uuid(&id)?,
                        text,
                        subject_node_id: parse_uuid_opt(subject)?,
                        confidence,
                        status: ClaimStatus::from_str(&status).map_err(Error::Storage)?,
                        supersedes_claim_id: parse_uuid_opt(supersedes)?,
                        event_time_start: parse_ts_opt(ets)?,
                        event_time_end: parse_ts_opt(ete)?,
                        ingested_at: parse_ts(&ingested)?,
                    })
                },
            )
            .collect()
    }

    /// Unlink claims from a case whose text matches a prefix. Used when
    /// risk re-assessment replaces earlier hypothesis claims; the claim
    /// rows themselves remain for audit.
    pub fn unlink_case_claims_by_prefix(&self, case_id: Uuid, prefixes: &[&str]) -> Result<Vec<Uuid>> {
        let mut removed = Vec::new();
        for prefix in prefixes {
            let pattern = format!("{}%", prefix);
            let ids = self.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id FROM claim c
                     JOIN trace_event t ON t.ref_id = c.id AND t.ref_type = 'claim'
                     WHERE t.case_id = ?1 AND c.text LIKE ?2",
                )?;
                let mapped =
                    stmt.query_map(params![case_id.to_string(), pattern], |row| {
                        row.get::<_, String>(0)
                    })?;
                mapped.collect::<rusqlite::Result<Vec<_>>>()
            })?;
            for id in &ids {
                self.with_conn(|conn| {
                    conn.execute(
                        "DELETE FROM trace_event
                         WHERE case_id = ?1 AND ref_type = 'claim' AND ref_id = ?2",
                        params![case_id.to_string(), id],
                    )?;
                    Ok(())
                })?;
                removed.push(parse_uuid(id)?);
            }
        }
        Ok(removed)
    }

    // ==================== Contradiction Operations ====================

    /// Record a contradiction between two claims, OPEN by default.
    pub fn insert_contradiction(
        &self,
        claim_a: Uuid,
        claim_b: Uuid,
        contradiction_type: &str,
        notes: &str,
    ) -> Result<Contradiction> {
        let row = Contradiction {
            id: Uuid::new_v4(),
            claim_a,
            claim_b,
            contradiction_type: contradiction_type.to_string(),
            detected_at: Utc::now(),
            resolution_status: "OPEN".to_string(),
            notes: notes.to_string(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO contradiction (id, claim_a, claim_b, contradiction_type,
                                            detected_at, resolution_status, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id.to_string(),
                    row.claim_a.to_string(),
                    row.claim_b.to_string(),
                    row.contradiction_type,
                    ts(row.detected_at),
                    row.resolution_status,
                    row.notes,
                ],
            )?;
            Ok(())
        })?;

        Ok(row)
    }

    /// Contradictions whose claims are linked to the case.
    pub fn contradictions_for_case(&self, case_id: Uuid) -> Result<Vec<Contradiction>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT x.id, x.claim_a, x.claim_b, x.contradiction_type, x.detected_at,
                        x.resolution_status, x.notes
                 FROM contradiction x
                 WHERE x.claim_a IN (
                         SELECT ref_id FROM trace_event
                         WHERE case_id = :case_id AND ref_type = 'claim')
                    OR x.claim_b IN (
                         SELECT ref_id FROM trace_event
                         WHERE case_id = :case_id AND ref_type = 'claim')
                 ORDER BY x.detected_at",
            )?;
            let mapped = stmt.query_map(
                &[(":case_id", &case_id.to_string() as &dyn rusqlite::ToSql)][..],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(id, a, b, ctype, detected, status, notes)| {
                Ok(Contradiction {
                    id: parse_uuid(&id)?,
                    claim_a: parse_uuid(&a)?,
                    claim_b: parse_uuid(&b)?,
                    contradiction_type: ctype,
                    detected_at: parse_ts(&detected)?,
                    resolution_status: status,
                    notes,
                })
            })
            .collect()
    }

    // ==================== Missing Evidence Operations ====================

    /// Record a missing-evidence request.
    pub fn insert_missing_evidence(
        &self,
        case_id: Option<Uuid>,
        source_system: &str,
        request_type: &str,
        request_params: Value,
        reason: &str,
        criticality: Criticality,
    ) -> Result<MissingEvidenceRequest> {
        let row = MissingEvidenceRequest {
            id: Uuid::new_v4(),
            case_id,
            source_system: source_system.to_string(),
            request_type: request_type.to_string(),
            request_params,
            reason: reason.to_string(),
            criticality,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by_evidence_id: None,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO missing_evidence_request
                 (id, case_id, source_system, request_type, request_params, reason,
                  criticality, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.id.to_string(),
                    row.case_id.map(|u| u.to_string()),
                    row.source_system,
                    row.request_type,
                    row.request_params.to_string(),
                    row.reason,
                    row.criticality.to_string(),
                    ts(row.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(row)
    }

    /// Unresolved missing-evidence requests for a case, BLOCKING first.
    pub fn unresolved_missing_evidence(&self, case_id: Uuid) -> Result<Vec<MissingEvidenceRequest>> {
        self.query_missing(
            "SELECT id, case_id, source_system, request_type, request_params, reason,
                    criticality, created_at, resolved_at, resolved_by_evidence_id
             FROM missing_evidence_request
             WHERE case_id = :case_id AND resolved_at IS NULL
             ORDER BY criticality, created_at",
            &[(":case_id", &case_id.to_string())],
        )
    }

    /// True when the case has at least one unresolved BLOCKING request.
    pub fn has_blocking_missing_evidence(&self, case_id: Uuid) -> Result<bool> {
        let count: i64 = self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM missing_evidence_request
                 WHERE case_id = ?1 AND criticality = 'BLOCKING' AND resolved_at IS NULL",
                params![case_id.to_string()],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    /// Resolve all open requests for a source on a case with the evidence
    /// that satisfied them.
    pub fn resolve_missing_evidence(
        &self,
        case_id: Uuid,
        source_system: &str,
        evidence_id: Uuid,
    ) -> Result<u32> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE missing_evidence_request
                 SET resolved_at = ?3, resolved_by_evidence_id = ?4
                 WHERE case_id = ?1 AND source_system = ?2 AND resolved_at IS NULL",
                params![
                    case_id.to_string(),
                    source_system,
                    ts(Utc::now()),
                    evidence_id.to_string(),
                ],
            )
        })?;
        Ok(changed as u32)
    }

    /// Attach orphan requests (no case) for an airport to a case.
    pub fn adopt_orphan_missing_evidence(&self, case_id: Uuid, icao: &str) -> Result<u32> {
        let pattern = format!("%\"airport\":\"{}\"%", icao);
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE missing_evidence_request
                 SET case_id = ?1
                 WHERE case_id IS NULL AND resolved_at IS NULL
                   AND request_params LIKE ?2",
                params![case_id.to_string(), pattern],
            )
        })?;
        Ok(changed as u32)
    }

    fn query_missing(
        &self,
        sql: &str,
        named: &[(&str, &dyn rusqlite::ToSql)],
    ) -> Result<Vec<MissingEvidenceRequest>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mapped = stmt.query_map(named, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(
                |(id, case_id, source, rtype, rparams, reason, crit, created, resolved, by)| {
                    Ok(MissingEvidenceRequest {
                        id: parse_uuid(&id)?,
                        case_id: parse_uuid_opt(case_id)?,
                        source_system: source,
                        request_type: rtype,
                        request_params: parse_json(&rparams),
                        reason,
                        criticality: Criticality::from_str(&crit).map_err(Error::Storage)?,
                        created_at: parse_ts(&created)?,
                        resolved_at: parse_ts_opt(resolved)?,
                        resolved_by_evidence_id: parse_uuid_opt(by)?,
                    })
                },
            )
            .collect()
    }

    // ==================== Action / Outcome Operations ====================

    /// Insert a proposed action.
    pub fn insert_action(&self, new: NewAction) -> Result<ActionRow> {
        let row = ActionRow {
            id: Uuid::new_v4(),
            case_id: new.case_id,
            action_type: new.action_type,
            args: new.args,
            state: "PROPOSED".to_string(),
            risk_level: new.risk_level,
            requires_approval: new.requires_approval,
            created_at: Utc::now(),
            approved_by: None,
            approved_at: None,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO action (id, case_id, action_type, args, state, risk_level,
                                     requires_approval, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.id.to_string(),
                    row.case_id.to_string(),
                    row.action_type,
                    row.args.to_string(),
                    row.state,
                    row.risk_level,
                    row.requires_approval as i64,
                    ts(row.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(row)
    }

    /// Get an action by id.
    pub fn get_action(&self, action_id: Uuid) -> Result<Option<ActionRow>> {
        let rows = self.query_actions(
            "SELECT id, case_id, action_type, args, state, risk_level, requires_approval,
                    created_at, approved_by, approved_at
             FROM action WHERE id = :id",
            &[(":id", &action_id.to_string())],
        )?;
        Ok(rows.into_iter().next())
    }

    /// Actions for a case in creation order.
    pub fn actions_for_case(&self, case_id: Uuid) -> Result<Vec<ActionRow>> {
        self.query_actions(
            "SELECT id, case_id, action_type, args, state, risk_level, requires_approval,
                    created_at, approved_by, approved_at
             FROM action WHERE case_id = :case_id
             ORDER BY created_at, id",
            &[(":case_id", &case_id.to_string())],
        )
    }

    /// Raw state write for the action state machine. Callers must have
    /// validated the transition.
    pub fn set_action_state(&self, action_id: Uuid, state: &str) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE action SET state = ?2 WHERE id = ?1",
                params![action_id.to_string(), state],
            )
        })?;
        if changed == 0 {
            return Err(Error::not_found("action", action_id));
        }
        Ok(())
    }

    /// Record approval metadata alongside the APPROVED transition.
    pub fn set_action_approved(&self, action_id: Uuid, actor: &str) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE action SET state = 'APPROVED', approved_by = ?2, approved_at = ?3
                 WHERE id = ?1",
                params![action_id.to_string(), actor, ts(Utc::now())],
            )
        })?;
        if changed == 0 {
            return Err(Error::not_found("action", action_id));
        }
        Ok(())
    }

    /// Replace action args (e.g. to mark a rejection).
    pub fn set_action_args(&self, action_id: Uuid, args: &Value) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE action SET args = ?2 WHERE id = ?1",
                params![action_id.to_string(), args.to_string()],
            )
        })?;
        if changed == 0 {
            return Err(Error::not_found("action", action_id));
        }
        Ok(())
    }

    /// Count actions for a case not yet in a terminal state.
    pub fn nonterminal_action_count(&self, case_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM action
                 WHERE case_id = ?1
                   AND state NOT IN ('COMPLETED', 'FAILED', 'ROLLED_BACK')",
                params![case_id.to_string()],
                |row| row.get(0),
            )
        })
    }

    /// Count actions pending approval for a case.
    pub fn pending_approval_count(&self, case_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM action WHERE case_id = ?1 AND state = 'PENDING_APPROVAL'",
                params![case_id.to_string()],
                |row| row.get(0),
            )
        })
    }

    /// Insert an outcome row for an executed (or failed, or rolled-back)
    /// action.
    pub fn insert_outcome(&self, action_id: Uuid, success: bool, payload: Value) -> Result<OutcomeRow> {
        let row = OutcomeRow {
            id: Uuid::new_v4(),
            action_id,
            success,
            payload,
            created_at: Utc::now(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO outcome (id, action_id, success, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.id.to_string(),
                    row.action_id.to_string(),
                    row.success as i64,
                    row.payload.to_string(),
                    ts(row.created_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    /// The outcome of the most recent COMPLETED SET_POSTURE action for a
    /// case, if any. Backs the PDL metric.
    pub fn completed_posture_outcome(&self, case_id: Uuid) -> Result<Option<OutcomeRow>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT o.id, o.action_id, o.success, o.payload, o.created_at
                 FROM action a
                 JOIN outcome o ON o.action_id = a.id
                 WHERE a.case_id = ?1 AND a.action_type = 'SET_POSTURE' AND a.state = 'COMPLETED'
                 ORDER BY a.created_at DESC
                 LIMIT 1",
                params![case_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
        })?;

        row.map(|(id, action_id, success, payload, created_at)| {
            Ok(OutcomeRow {
                id: parse_uuid(&id)?,
                action_id: parse_uuid(&action_id)?,
                success: success != 0,
                payload: parse_json(&payload),
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    /// Outcomes for a case's actions in creation order.
    pub fn outcomes_for_case(&self, case_id: Uuid) -> Result<Vec<OutcomeRow>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT o.id, o.action_id, o.success, o.payload, o.created_at
                 FROM outcome o
                 JOIN action a ON a.id = o.action_id
                 WHERE a.case_id = :case_id
                 ORDER BY o.created_at, o.id",
            )?;
            let mapped = stmt.query_map(
                &[(":case_id", &case_id.to_string() as &dyn rusqlite::ToSql)][..],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(id, action_id, success, payload, created_at)| {
                Ok(OutcomeRow {
                    id: parse_uuid(&id)?,
                    action_id: parse_uuid(&action_id)?,
                    success: success != 0,
                    payload: parse_json(&payload),
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }

    fn query_actions(
        &self,
        sql: &str,
        named: &[(&str, &dyn rusqlite::ToSql)],
    ) -> Result<Vec<ActionRow>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mapped = stmt.query_map(named, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(
                |(id, case_id, atype, args, state, risk, approval, created, by, at)| {
                    Ok(ActionRow {
                        id: parse_uuid(&id)?,
                        case_id: parse_uuid(&case_id)?,
                        action_type: atype,
                        args: parse_json(&args),
                        state,
                        risk_level: risk,
                        requires_approval: approval != 0,
                        created_at: parse_ts(&created)?,
                        approved_by: by,
                        approved_at: parse_ts_opt(at)?,
                    })
                },
            )
            .collect()
    }

    // ==================== Policy Operations ====================

    /// Insert a governance policy.
    pub fn insert_policy(&self, name: &str, rule_text: &str) -> Result<PolicyRow> {
        let row = PolicyRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            rule_text: rule_text.to_string(),
            active: true,
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO policy (id, name, rule_text, active, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![row.id.to_string(), row.name, row.rule_text, ts(Utc::now())],
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    /// All active policies.
    pub fn active_policies(&self) -> Result<Vec<PolicyRow>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, rule_text, active FROM policy WHERE active = 1 ORDER BY name",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(id, name, rule_text, active)| {
                Ok(PolicyRow {
                    id: parse_uuid(&id)?,
                    name,
                    rule_text,
                    active: active != 0,
                })
            })
            .collect()
    }

    // ==================== Trace Operations ====================

    /// Allocate the next trace sequence number for a case.
    ///
    /// Held under a per-case lock: concurrent writers for the same case
    /// serialize here, writers for different cases do not contend. The
    /// resulting sequence is gap-free from 1.
    pub fn next_trace_seq(&self, case_id: Uuid) -> Result<i64> {
        let lock = self.case_lock(case_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| Error::Internal(format!("seq lock poisoned: {}", e)))?;

        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM trace_event WHERE case_id = ?1",
                params![case_id.to_string()],
                |row| row.get(0),
            )
        })
    }

    fn case_lock(&self, case_id: Uuid) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .seq_locks
            .lock()
            .map_err(|e| Error::Internal(format!("lock registry poisoned: {}", e)))?;
        Ok(locks.entry(case_id).or_default().clone())
    }

    /// Append a trace event, allocating its sequence number under the
    /// per-case lock.
    pub fn append_trace(
        &self,
        case_id: Uuid,
        event_type: TraceEventType,
        ref_type: Option<&str>,
        ref_id: Option<&str>,
        meta: Value,
    ) -> Result<TraceEvent> {
        let lock = self.case_lock(case_id)?;
        let _guard = lock
            .lock()
            .map_err(|e| Error::Internal(format!("seq lock poisoned: {}", e)))?;

        let event = self.with_conn(|conn| {
            let seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM trace_event WHERE case_id = ?1",
                params![case_id.to_string()],
                |row| row.get(0),
            )?;
            let event = TraceEvent {
                id: Uuid::new_v4(),
                case_id,
                seq,
                event_type,
                ref_type: ref_type.map(str::to_string),
                ref_id: ref_id.map(str::to_string),
                meta,
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO trace_event (id, case_id, seq, event_type, ref_type, ref_id, meta, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id.to_string(),
                    event.case_id.to_string(),
                    event.seq,
                    event.event_type.to_string(),
                    event.ref_type,
                    event.ref_id,
                    event.meta.to_string(),
                    ts(event.created_at),
                ],
            )?;
            Ok(event)
        })?;

        Ok(event)
    }

    /// Full trace for a case in sequence order.
    pub fn trace_for_case(&self, case_id: Uuid) -> Result<Vec<TraceEvent>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, case_id, seq, event_type, ref_type, ref_id, meta, created_at
                 FROM trace_event WHERE case_id = :case_id ORDER BY seq",
            )?;
            let mapped = stmt.query_map(
                &[(":case_id", &case_id.to_string() as &dyn rusqlite::ToSql)][..],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(id, case_id, seq, etype, ref_type, ref_id, meta, created)| {
                Ok(TraceEvent {
                    id: parse_uuid(&id)?,
                    case_id: parse_uuid(&case_id)?,
                    seq,
                    event_type: TraceEventType::from_str(&etype).map_err(Error::Storage)?,
                    ref_type,
                    ref_id,
                    meta: parse_json(&meta),
                    created_at: parse_ts(&created)?,
                })
            })
            .collect()
    }

    /// Count trace events for a case matching an event type and ref type.
    /// Used by the critic's rejection guardrail.
    pub fn count_trace_events(
        &self,
        case_id: Uuid,
        event_type: TraceEventType,
        ref_type: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM trace_event
                 WHERE case_id = ?1 AND event_type = ?2 AND ref_type = ?3",
                params![case_id.to_string(), event_type.to_string(), ref_type],
                |row| row.get(0),
            )
        })
    }

    /// Latest trace event for a case with the given ref type, if any.
    pub fn latest_trace_event(&self, case_id: Uuid, ref_type: &str) -> Result<Option<TraceEvent>> {
        let events = self.trace_for_case(case_id)?;
        Ok(events
            .into_iter()
            .rev()
            .find(|e| e.ref_type.as_deref() == Some(ref_type)))
    }

    // ==================== Embedding Operations ====================

    /// Insert or replace the retrieval row for a case.
    pub fn upsert_case_embedding(&self, case_id: Uuid, text: &str, embedding: &[f32]) -> Result<()> {
        let blob: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM embedding_case WHERE case_id = ?1",
                params![case_id.to_string()],
            )?;
            conn.execute(
                "INSERT INTO embedding_case (id, case_id, text, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    case_id.to_string(),
                    text,
                    blob,
                    ts(Utc::now()),
                ],
            )?;
            Ok(())
        })
    }

    /// All retrieval rows: `(row_id, case_id, text, embedding)`.
    pub fn case_embeddings(&self) -> Result<Vec<(Uuid, Uuid, String, Vec<f32>)>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, case_id, text, embedding FROM embedding_case ORDER BY id",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(id, case_id, text, blob)| {
                let embedding = blob
                    .chunks_exact(4)
                    .map(|chunk| {
                        let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
                        f32::from_le_bytes(arr)
                    })
                    .collect();
                Ok((parse_uuid(&id)?, parse_uuid(&case_id)?, text, embedding))
            })
            .collect()
    }

    /// FTS5 rank per retrieval row for a query: `(row_id, rank)`. Rank is
    /// bm25, lower is better; normalization happens in the retrieval layer.
    pub fn keyword_ranks(&self, query: &str) -> Result<Vec<(Uuid, f64)>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ec.id, bm25(embedding_case_fts) AS rank
                 FROM embedding_case_fts
                 JOIN embedding_case ec ON ec.rowid = embedding_case_fts.rowid
                 WHERE embedding_case_fts MATCH ?1
                 ORDER BY rank",
            )?;
            let mapped = stmt.query_map(params![query], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(id, rank)| Ok((parse_uuid(&id)?, rank)))
            .collect()
    }

    /// Distinct edge types referenced by a case's trace. The graph leg of
    /// hybrid retrieval compares these across cases.
    pub fn edge_types_for_case(&self, case_id: Uuid) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT e.edge_type
                 FROM edge e
                 JOIN trace_event t ON t.ref_id = e.id AND t.ref_type = 'edge'
                 WHERE t.case_id = ?1
                 ORDER BY e.edge_type",
            )?;
            let mapped =
                stmt.query_map(params![case_id.to_string()], |row| row.get::<_, String>(0))?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    // ==================== Playbook Operations ====================

    /// Insert a playbook.
    pub fn insert_playbook(&self, name: &str, pattern: Value, action_template: Value) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO playbook (id, name, pattern, action_template, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.to_string(),
                    name,
                    pattern.to_string(),
                    action_template.to_string(),
                    ts(Utc::now()),
                ],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    /// All playbooks: `(id, name, pattern, action_template, use_count, success_count)`.
    #[allow(clippy::type_complexity)]
    pub fn all_playbooks(&self) -> Result<Vec<(Uuid, String, Value, Value, i64, i64)>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, pattern, action_template, use_count, success_count
                 FROM playbook ORDER BY name, id",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        rows.into_iter()
            .map(|(id, name, pattern, template, uses, successes)| {
                Ok((
                    parse_uuid(&id)?,
                    name,
                    parse_json(&pattern),
                    parse_json(&template),
                    uses,
                    successes,
                ))
            })
            .collect()
    }

    /// Record a playbook usage for a case and refresh its stats.
    pub fn record_playbook_usage(&self, playbook_id: Uuid, case_id: Uuid, success: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO playbook_case (playbook_id, case_id, success, recorded_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (playbook_id, case_id) DO UPDATE SET success = excluded.success",
                params![
                    playbook_id.to_string(),
                    case_id.to_string(),
                    success as i64,
                    ts(Utc::now()),
                ],
            )?;
            tx.execute(
                "UPDATE playbook SET
                    use_count = use_count + 1,
                    success_count = success_count + ?2,
                    success_rate = CAST(success_count + ?2 AS REAL) / CAST(use_count + 1 AS REAL)
                 WHERE id = ?1",
                params![playbook_id.to_string(), success as i64],
            )?;
            tx.commit()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> GraphStore {
        GraphStore::in_memory().unwrap()
    }

    #[test]
    fn test_create_node_idempotent() {
        let store = store();
        let a = store.create_node(NodeType::Airport, "KJFK", None).unwrap();
        let b = store.create_node(NodeType::Airport, "KJFK", None).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_node_version_supersession() {
        let store = store();
        let node = store
            .create_node(NodeType::Airport, "KLAX", Some(json!({"baseline": 90})))
            .unwrap();

        let v2 = store
            .create_node_version(node.id, json!({"baseline": 120}))
            .unwrap();
        assert!(v2.supersedes_id.is_some());

        let current = store.node_version_at(node.id, Utc::now()).unwrap().unwrap();
        assert_eq!(current.attrs["baseline"], json!(120));
    }

    #[test]
    fn test_promote_edge_requires_evidence() {
        let store = store();
        let node = store.create_node(NodeType::Airport, "KORD", None).unwrap();
        let edge = store
            .create_edge(NewEdge {
                src: node.id,
                dst: node.id,
                edge_type: "AIRPORT_WEATHER_RISK".to_string(),
                attrs: json!({}),
                source_system: "AVIATION_WEATHER".to_string(),
                confidence: 0.9,
                event_time_start: None,
                event_time_end: None,
                valid_from: None,
                valid_to: None,
                supersedes_edge_id: None,
            })
            .unwrap();

        let err = store.promote_edge_to_fact(edge.id).unwrap_err();
        assert!(matches!(err, Error::EvidenceWithoutBinding { .. }));

        let (evidence, created) = store
            .insert_evidence(NewEvidence {
                source_system: "AVIATION_WEATHER".to_string(),
                source_ref: "KORD".to_string(),
                retrieved_at: Utc::now(),
                content_type: "application/json".to_string(),
                payload_sha256: "abc123".to_string(),
                raw_path: None,
                excerpt: "{\"status\": \"has_data\"}".to_string(),
                meta: json!({}),
            })
            .unwrap();
        assert!(created);

        store.bind_edge_evidence(edge.id, evidence.id).unwrap();
        store.promote_edge_to_fact(edge.id).unwrap();

        let promoted = store.get_edge(edge.id).unwrap().unwrap();
        assert_eq!(promoted.status, EdgeStatus::Fact);
    }

    #[test]
    fn test_evidence_dedup_returns_existing() {
        let store = store();
        let new = NewEvidence {
            source_system: "METAR".to_string(),
            source_ref: "KJFK".to_string(),
            retrieved_at: Utc::now(),
            content_type: "application/json".to_string(),
            payload_sha256: "same-hash".to_string(),
            raw_path: None,
            excerpt: String::new(),
            meta: json!({}),
        };
        let (first, created_first) = store.insert_evidence(new.clone()).unwrap();
        let (second, created_second) = store.insert_evidence(new).unwrap();

        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_trace_seq_contiguous_from_one() {
        let store = store();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();

        for _ in 0..5 {
            store
                .append_trace(case.id, TraceEventType::ToolCall, None, None, json!({}))
                .unwrap();
        }

        let trace = store.trace_for_case(case.id).unwrap();
        let seqs: Vec<i64> = trace.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_trace_seq_isolated_between_cases() {
        let store = store();
        let a = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        let b = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KLAX"}))
            .unwrap();

        store
            .append_trace(a.id, TraceEventType::ToolCall, None, None, json!({}))
            .unwrap();
        let eb = store
            .append_trace(b.id, TraceEventType::ToolCall, None, None, json!({}))
            .unwrap();

        assert_eq!(eb.seq, 1);
    }

    #[test]
    fn test_missing_evidence_blocking_check() {
        let store = store();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();

        assert!(!store.has_blocking_missing_evidence(case.id).unwrap());

        store
            .insert_missing_evidence(
                Some(case.id),
                "METAR",
                "observation",
                json!({"airport": "KJFK"}),
                "timeout",
                Criticality::Blocking,
            )
            .unwrap();
        assert!(store.has_blocking_missing_evidence(case.id).unwrap());

        let (evidence, _) = store
            .insert_evidence(NewEvidence {
                source_system: "METAR".to_string(),
                source_ref: "KJFK".to_string(),
                retrieved_at: Utc::now(),
                content_type: "application/json".to_string(),
                payload_sha256: "h1".to_string(),
                raw_path: None,
                excerpt: String::new(),
                meta: json!({}),
            })
            .unwrap();
        store
            .resolve_missing_evidence(case.id, "METAR", evidence.id)
            .unwrap();
        assert!(!store.has_blocking_missing_evidence(case.id).unwrap());
    }

    #[test]
    fn test_supersession_respects_ingest_time() {
        let store = store();
        let airport = store.create_node(NodeType::Airport, "KJFK", None).unwrap();

        let make_evidence = |tag: &str| {
            let (evidence, _) = store
                .insert_evidence(NewEvidence {
                    source_system: "FAA_NAS".to_string(),
                    source_ref: "KJFK".to_string(),
                    retrieved_at: Utc::now(),
                    content_type: "application/json".to_string(),
                    payload_sha256: tag.to_string(),
                    raw_path: None,
                    excerpt: String::new(),
                    meta: json!({}),
                })
                .unwrap();
            evidence.id
        };

        let first = store
            .create_edge(NewEdge {
                src: airport.id,
                dst: airport.id,
                edge_type: "AIRPORT_HAS_FAA_DISRUPTION".to_string(),
                attrs: json!({"status": "DISRUPTED"}),
                source_system: "FAA_NAS".to_string(),
                confidence: 0.95,
                event_time_start: None,
                event_time_end: None,
                valid_from: None,
                valid_to: None,
                supersedes_edge_id: None,
            })
            .unwrap();
        store.bind_edge_evidence(first.id, make_evidence("e1")).unwrap();
        store.promote_edge_to_fact(first.id).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let between = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(10));

        let second = store
            .create_edge(NewEdge {
                src: airport.id,
                dst: airport.id,
                edge_type: "AIRPORT_HAS_FAA_DISRUPTION".to_string(),
                attrs: json!({"status": "NORMAL"}),
                source_system: "FAA_NAS".to_string(),
                confidence: 0.95,
                event_time_start: None,
                event_time_end: None,
                valid_from: None,
                valid_to: None,
                supersedes_edge_id: Some(first.id),
            })
            .unwrap();
        store.bind_edge_evidence(second.id, make_evidence("e2")).unwrap();
        store.promote_edge_to_fact(second.id).unwrap();

        // What we knew between the two ingestions: the first edge.
        let types = ["AIRPORT_HAS_FAA_DISRUPTION"];
        let at_between = store
            .latest_edges_per_source(airport.id, &types, between)
            .unwrap();
        assert_eq!(at_between.len(), 1);
        assert_eq!(at_between[0].id, first.id);

        // What we know now: the superseding edge only.
        let now = store
            .latest_edges_per_source(airport.id, &types, Utc::now())
            .unwrap();
        assert_eq!(now.len(), 1);
        assert_eq!(now[0].id, second.id);
    }

    #[test]
    fn test_playbook_usage_stats() {
        let store = store();
        let case = store
            .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
            .unwrap();
        let id = store
            .insert_playbook("ground-stop", json!({}), json!({"action_sequence": []}))
            .unwrap();

        store.record_playbook_usage(id, case.id, true).unwrap();

        let books = store.all_playbooks().unwrap();
        let (_, _, _, _, uses, successes) = &books[0];
        assert_eq!((*uses, *successes), (1, 1));
    }
}
