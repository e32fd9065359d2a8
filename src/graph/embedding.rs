//! Text embedding for the semantic leg of hybrid retrieval.

use sha2::{Digest, Sha256};

/// Dimensionality of case embeddings.
pub const EMBEDDING_DIM: usize = 384;

/// Produces fixed-dimension embeddings for case text.
///
/// The engine ships a deterministic local implementation so retrieval is
/// reproducible offline; a remote embedding service plugs into the same
/// trait.
pub trait Embedder: Send + Sync {
    /// Embed a text into an L2-normalized vector of [`EMBEDDING_DIM`] floats.
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic hashing embedder.
///
/// Each whitespace token is hashed into a bucket with a signed weight;
/// identical text always yields an identical vector.
#[derive(Debug, Clone, Default)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];

        for token in text.split_whitespace() {
            let normalized = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if normalized.is_empty() {
                continue;
            }

            let digest = Sha256::digest(normalized.as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % EMBEDDING_DIM;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Cosine similarity between two vectors of equal length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_deterministic() {
        let embedder = HashingEmbedder::new();
        let a = embedder.embed("ground stop at KJFK with IFR conditions");
        let b = embedder.embed("ground stop at KJFK with IFR conditions");
        assert_eq!(a, b);
    }

    #[test]
    fn test_embedding_normalized() {
        let embedder = HashingEmbedder::new();
        let v = embedder.embed("severe thunderstorm warning");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_text_scores_higher() {
        let embedder = HashingEmbedder::new();
        let query = embedder.embed("ground stop KJFK weather");
        let close = embedder.embed("KJFK ground stop due to weather");
        let far = embedder.embed("normal operations at KLAX");

        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_empty_text_zero_vector() {
        let embedder = HashingEmbedder::new();
        let v = embedder.embed("");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    proptest::proptest! {
        #[test]
        fn embeddings_are_unit_or_zero(text in ".{0,120}") {
            let embedder = HashingEmbedder::new();
            let v = embedder.embed(&text);
            proptest::prop_assert_eq!(v.len(), EMBEDDING_DIM);

            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            proptest::prop_assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-4);
        }
    }
}
