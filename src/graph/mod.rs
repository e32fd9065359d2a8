//! Bi-temporal evidence graph: schema, store, visibility, traversal and
//! hybrid retrieval.

pub mod embedding;
pub mod retrieval;
pub mod schema;
pub mod store;
pub mod traversal;
pub mod types;
pub mod visibility;

pub use embedding::{cosine_similarity, Embedder, HashingEmbedder, EMBEDDING_DIM};
pub use retrieval::{hybrid_search, jaccard_similarity, HybridSearchResult};
pub use store::{ActionRow, GraphStore, NewAction, NewEdge, NewEvidence, OutcomeRow, PolicyRow};
pub use traversal::{CascadeImpact, TraversalQuery, CASCADE_EDGE_TYPES, MAX_HOPS};
pub use types::*;
