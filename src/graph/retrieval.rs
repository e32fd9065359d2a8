//! Hybrid retrieval: semantic + keyword + graph.
//!
//! Deterministic ranking formula:
//!
//! ```text
//! final_score = 0.5 * semantic + 0.3 * keyword + 0.2 * graph
//! ```
//!
//! All component scores are normalized to [0, 1]; ties break by
//! ascending id. The weights are constants, not tunable per call.

use crate::error::Result;
use crate::graph::embedding::{cosine_similarity, Embedder};
use crate::graph::store::GraphStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Semantic (cosine) weight.
pub const WEIGHT_SEMANTIC: f64 = 0.5;
/// Keyword (text-rank) weight.
pub const WEIGHT_KEYWORD: f64 = 0.3;
/// Graph (shared-edge-type Jaccard) weight.
pub const WEIGHT_GRAPH: f64 = 0.2;

/// Single result from hybrid search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridSearchResult {
    pub id: Uuid,
    pub case_id: Uuid,
    pub text: String,
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub graph_score: f64,
    pub final_score: f64,
}

impl HybridSearchResult {
    /// Compute the deterministic final score.
    pub fn compute_final_score(semantic: f64, keyword: f64, graph: f64) -> f64 {
        WEIGHT_SEMANTIC * semantic + WEIGHT_KEYWORD * keyword + WEIGHT_GRAPH * graph
    }
}

/// Jaccard similarity between two sets.
pub fn jaccard_similarity<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Hybrid search over indexed cases.
///
/// `context_case` contributes the graph leg: Jaccard similarity of the
/// edge types each case touched. Without a context case the graph score
/// is zero for every candidate, keeping ranking deterministic.
pub fn hybrid_search(
    store: &GraphStore,
    embedder: &dyn Embedder,
    query_text: &str,
    context_case: Option<Uuid>,
    limit: usize,
) -> Result<Vec<HybridSearchResult>> {
    let rows = store.case_embeddings()?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let query_embedding = embedder.embed(query_text);

    // Keyword leg: FTS5 rank (bm25, lower is better), min-max normalized.
    let raw_ranks: HashMap<Uuid, f64> = store
        .keyword_ranks(&fts_query(query_text))
        .unwrap_or_default()
        .into_iter()
        .collect();
    let (min_rank, max_rank) = raw_ranks
        .values()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
            (lo.min(*r), hi.max(*r))
        });

    // Graph leg: edge-type fingerprint of the context case.
    let context_types: BTreeSet<String> = match context_case {
        Some(case_id) => store.edge_types_for_case(case_id)?.into_iter().collect(),
        None => BTreeSet::new(),
    };

    let mut results: Vec<HybridSearchResult> = Vec::with_capacity(rows.len());
    for (id, case_id, text, embedding) in rows {
        // Cosine is [-1, 1]; normalize to [0, 1].
        let semantic = (cosine_similarity(&query_embedding, &embedding) + 1.0) / 2.0;

        let keyword = match raw_ranks.get(&id) {
            Some(rank) if max_rank > min_rank => (max_rank - rank) / (max_rank - min_rank),
            Some(_) => 1.0,
            None => 0.0,
        };

        let graph = if context_types.is_empty() {
            0.0
        } else {
            let candidate_types: BTreeSet<String> =
                store.edge_types_for_case(case_id)?.into_iter().collect();
            jaccard_similarity(&context_types, &candidate_types)
        };

        let final_score = HybridSearchResult::compute_final_score(semantic, keyword, graph);
        results.push(HybridSearchResult {
            id,
            case_id,
            text,
            semantic_score: semantic,
            keyword_score: keyword,
            graph_score: graph,
            final_score,
        });
    }

    // Deterministic ordering: final_score desc, then ascending id.
    results.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    Ok(results)
}

/// Quote query tokens so FTS5 treats them as plain terms.
fn fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(|token| {
            let clean: String = token.chars().filter(|c| c.is_alphanumeric()).collect();
            format!("\"{}\"", clean)
        })
        .filter(|t| t.len() > 2)
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::embedding::HashingEmbedder;
    use crate::graph::types::CaseType;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn indexed_store() -> (GraphStore, Vec<Uuid>) {
        let store = GraphStore::in_memory().unwrap();
        let embedder = HashingEmbedder::new();
        let texts = [
            "ground stop at KJFK severe thunderstorm IFR",
            "normal operations at KLAX clear skies",
            "KORD ground delay program winter storm",
            "movement collapse at KBOS low visibility",
            "KATL restrict posture gusting winds",
        ];
        let mut case_ids = Vec::new();
        for text in texts {
            let case = store
                .create_case(CaseType::AirportDisruption, json!({"airport": "KJFK"}))
                .unwrap();
            store
                .upsert_case_embedding(case.id, text, &embedder.embed(text))
                .unwrap();
            case_ids.push(case.id);
        }
        (store, case_ids)
    }

    #[test]
    fn test_jaccard() {
        let a: BTreeSet<_> = ["x", "y"].into_iter().collect();
        let b: BTreeSet<_> = ["y", "z"].into_iter().collect();
        assert!((jaccard_similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_weights_sum_to_one() {
        assert!((WEIGHT_SEMANTIC + WEIGHT_KEYWORD + WEIGHT_GRAPH - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_search_relevance() {
        let (store, _) = indexed_store();
        let embedder = HashingEmbedder::new();
        let results =
            hybrid_search(&store, &embedder, "ground stop thunderstorm KJFK", None, 5).unwrap();

        assert!(!results.is_empty());
        assert!(results[0].text.contains("KJFK"));
    }

    #[test]
    fn test_search_deterministic_order_and_scores() {
        let (store, _) = indexed_store();
        let embedder = HashingEmbedder::new();

        let first = hybrid_search(&store, &embedder, "ground stop weather", None, 5).unwrap();
        let second = hybrid_search(&store, &embedder, "ground stop weather", None, 5).unwrap();

        let ids_a: Vec<Uuid> = first.iter().map(|r| r.id).collect();
        let ids_b: Vec<Uuid> = second.iter().map(|r| r.id).collect();
        assert_eq!(ids_a, ids_b);

        for (a, b) in first.iter().zip(second.iter()) {
            assert!((a.final_score - b.final_score).abs() < 1e-4);
        }
    }

    #[test]
    fn test_search_empty_corpus() {
        let store = GraphStore::in_memory().unwrap();
        let embedder = HashingEmbedder::new();
        let results = hybrid_search(&store, &embedder, "anything", None, 10).unwrap();
        assert!(results.is_empty());
    }
}
