//! Canonical bi-temporal visibility predicates.
//!
//! Single source of truth for temporal filtering. Every traversal,
//! retrieval query and cascade analysis uses these predicates with only
//! table-alias substitution - inline temporal SQL is forbidden.
//!
//! An edge is visible at `(event_time, ingest_time)` when:
//! 1. its event-time window contains the query event time,
//! 2. it was ingested at or before the query ingest time,
//! 3. its validity window contains the query event time,
//! 4. no newer edge superseding it was ingested by the query ingest time.

/// Named parameters consumed by the predicates: `:at_event_time` and
/// `:at_ingest_time`, both RFC 3339 strings.
pub const AT_EVENT_TIME: &str = ":at_event_time";

/// See [`AT_EVENT_TIME`].
pub const AT_INGEST_TIME: &str = ":at_ingest_time";

/// SQL WHERE fragment for edge visibility.
///
/// `alias` is the edge table alias in the enclosing query. When
/// `include_supersession` is true, edges with a newer superseding edge
/// already ingested are filtered out.
pub fn edge_visible_at(alias: &str, include_supersession: bool) -> String {
    let a = alias;
    let base = format!(
        "({a}.event_time_start IS NULL OR {a}.event_time_start <= :at_event_time)
        AND ({a}.event_time_end IS NULL OR {a}.event_time_end > :at_event_time)
        AND {a}.ingested_at <= :at_ingest_time
        AND ({a}.valid_from IS NULL OR {a}.valid_from <= :at_event_time)
        AND ({a}.valid_to IS NULL OR {a}.valid_to > :at_event_time)",
        a = a
    );

    if include_supersession {
        format!(
            "{base}
        AND NOT EXISTS (
            SELECT 1 FROM edge e_newer
            WHERE e_newer.supersedes_edge_id = {a}.id
              AND e_newer.ingested_at <= :at_ingest_time
        )",
            base = base,
            a = a
        )
    } else {
        base
    }
}

/// SQL WHERE fragment for node_version visibility at `:at_event_time`.
pub fn node_version_visible_at(alias: &str) -> String {
    format!(
        "{a}.valid_from <= :at_event_time
        AND ({a}.valid_to IS NULL OR {a}.valid_to > :at_event_time)",
        a = alias
    )
}

/// SQL WHERE fragment for claim visibility at
/// `(:at_event_time, :at_ingest_time)`. Retracted claims are never visible.
pub fn claim_visible_at(alias: &str) -> String {
    format!(
        "({a}.event_time_start IS NULL OR {a}.event_time_start <= :at_event_time)
        AND ({a}.event_time_end IS NULL OR {a}.event_time_end > :at_event_time)
        AND {a}.ingested_at <= :at_ingest_time
        AND {a}.status != 'RETRACTED'",
        a = alias
    )
}
