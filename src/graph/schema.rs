//! SQLite schema and migrations for the evidence graph.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // WAL for concurrent readers alongside the single writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

/// Apply version 1 schema.
fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS case_record (
            id TEXT PRIMARY KEY,
            case_type TEXT NOT NULL,
            scope TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'OPEN',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS node (
            id TEXT PRIMARY KEY,
            node_type TEXT NOT NULL,
            identifier TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (node_type, identifier)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS node_version (
            id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL REFERENCES node(id),
            attrs TEXT NOT NULL,
            valid_from TEXT NOT NULL,
            valid_to TEXT,
            supersedes_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS edge (
            id TEXT PRIMARY KEY,
            src TEXT NOT NULL REFERENCES node(id),
            dst TEXT NOT NULL REFERENCES node(id),
            edge_type TEXT NOT NULL,
            attrs TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'DRAFT',
            supersedes_edge_id TEXT,
            event_time_start TEXT,
            event_time_end TEXT,
            ingested_at TEXT NOT NULL,
            valid_from TEXT,
            valid_to TEXT,
            source_system TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0.5
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evidence (
            id TEXT PRIMARY KEY,
            source_system TEXT NOT NULL,
            source_ref TEXT NOT NULL,
            retrieved_at TEXT NOT NULL,
            content_type TEXT NOT NULL,
            payload_sha256 TEXT NOT NULL,
            raw_path TEXT,
            excerpt TEXT NOT NULL DEFAULT '',
            meta TEXT NOT NULL DEFAULT '{}',
            UNIQUE (source_system, source_ref, payload_sha256)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS edge_evidence (
            edge_id TEXT NOT NULL REFERENCES edge(id),
            evidence_id TEXT NOT NULL REFERENCES evidence(id),
            PRIMARY KEY (edge_id, evidence_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS claim (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            subject_node_id TEXT,
            confidence REAL NOT NULL DEFAULT 0.5,
            status TEXT NOT NULL DEFAULT 'DRAFT',
            supersedes_claim_id TEXT,
            event_time_start TEXT,
            event_time_end TEXT,
            ingested_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS claim_evidence (
            claim_id TEXT NOT NULL REFERENCES claim(id),
            evidence_id TEXT NOT NULL REFERENCES evidence(id),
            PRIMARY KEY (claim_id, evidence_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contradiction (
            id TEXT PRIMARY KEY,
            claim_a TEXT NOT NULL REFERENCES claim(id),
            claim_b TEXT NOT NULL REFERENCES claim(id),
            contradiction_type TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            resolution_status TEXT NOT NULL DEFAULT 'OPEN',
            notes TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS missing_evidence_request (
            id TEXT PRIMARY KEY,
            case_id TEXT,
            source_system TEXT NOT NULL,
            request_type TEXT NOT NULL,
            request_params TEXT NOT NULL DEFAULT '{}',
            reason TEXT NOT NULL,
            criticality TEXT NOT NULL,
            created_at TEXT NOT NULL,
            resolved_at TEXT,
            resolved_by_evidence_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS action (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL REFERENCES case_record(id),
            action_type TEXT NOT NULL,
            args TEXT NOT NULL DEFAULT '{}',
            state TEXT NOT NULL DEFAULT 'PROPOSED',
            risk_level TEXT NOT NULL DEFAULT 'LOW',
            requires_approval INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            approved_by TEXT,
            approved_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS outcome (
            id TEXT PRIMARY KEY,
            action_id TEXT NOT NULL REFERENCES action(id),
            success INTEGER NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS policy (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            rule_text TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS playbook (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            pattern TEXT NOT NULL,
            action_template TEXT NOT NULL,
            use_count INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            success_rate REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS playbook_case (
            playbook_id TEXT NOT NULL REFERENCES playbook(id),
            case_id TEXT NOT NULL REFERENCES case_record(id),
            success INTEGER NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (playbook_id, case_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trace_event (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL REFERENCES case_record(id),
            seq INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            ref_type TEXT,
            ref_id TEXT,
            meta TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE (case_id, seq)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS embedding_case (
            id TEXT PRIMARY KEY,
            case_id TEXT NOT NULL REFERENCES case_record(id),
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Indexes for the hot paths
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_edge_src_type ON edge(src, edge_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_edge_ingested ON edge(ingested_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_edge_supersedes ON edge(supersedes_edge_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_node_version_node ON node_version(node_id, valid_from)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evidence_source ON evidence(source_system, retrieved_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trace_case_seq ON trace_event(case_id, seq)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_trace_ref ON trace_event(case_id, ref_type)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_action_case ON action(case_id, state)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_missing_case ON missing_evidence_request(case_id, criticality)",
        [],
    )?;

    // Full-text search over case embedding text (keyword leg of hybrid retrieval)
    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS embedding_case_fts USING fts5(
            text,
            content='embedding_case',
            content_rowid='rowid'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS embedding_case_ai AFTER INSERT ON embedding_case BEGIN
            INSERT INTO embedding_case_fts(rowid, text) VALUES (NEW.rowid, NEW.text);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS embedding_case_ad AFTER DELETE ON embedding_case BEGIN
            INSERT INTO embedding_case_fts(embedding_case_fts, rowid, text) VALUES ('delete', OLD.rowid, OLD.text);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS embedding_case_au AFTER UPDATE ON embedding_case BEGIN
            INSERT INTO embedding_case_fts(embedding_case_fts, rowid, text) VALUES ('delete', OLD.rowid, OLD.text);
            INSERT INTO embedding_case_fts(rowid, text) VALUES (NEW.rowid, NEW.text);
        END",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='edge'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_schema() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        assert!(is_initialized(&conn));
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_idempotent_initialization() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_evidence_dedup_key() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO evidence (id, source_system, source_ref, retrieved_at, content_type, payload_sha256)
             VALUES ('a', 'METAR', 'KJFK', '2026-01-01T00:00:00Z', 'application/json', 'deadbeef')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO evidence (id, source_system, source_ref, retrieved_at, content_type, payload_sha256)
             VALUES ('b', 'METAR', 'KJFK', '2026-01-01T00:05:00Z', 'application/json', 'deadbeef')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_trace_seq_unique_per_case() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO case_record (id, case_type, scope, created_at)
             VALUES ('c1', 'AIRPORT_DISRUPTION', '{}', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO trace_event (id, case_id, seq, event_type, created_at)
             VALUES ('t1', 'c1', 1, 'STATE_ENTER', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO trace_event (id, case_id, seq, event_type, created_at)
             VALUES ('t2', 'c1', 1, 'STATE_EXIT', '2026-01-01T00:00:01Z')",
            [],
        );
        assert!(dup.is_err());
    }
}
