//! Re-ranker (C9): rescoring the hybrid candidate pool with a cross-encoder-shaped
//! backend, then min-max normalizing into `[0, 1]` so downstream consumers get a score
//! whose scale doesn't depend on which backend produced it (§4.9).

use std::collections::HashMap;

use crate::tokenizer::tokenize;
use crate::vector_index::ScoredChunk;

/// Scores a single (query, candidate text) pair. The only implementor this crate ships
/// is a deterministic token-overlap scorer standing in for a real cross-encoder model,
/// mirroring how `HashingEmbedder` stands in for a real embedding model.
pub trait RerankBackend: Send + Sync {
    fn score(&self, query: &str, text: &str) -> f32;
    fn model_id(&self) -> &str;
}

/// Deterministic token-Jaccard stand-in: no bundled cross-encoder weights ship with this
/// crate, so reordering falls back to lexical overlap between query and candidate.
pub struct OverlapReranker {
    model_id: String,
}

impl OverlapReranker {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

impl RerankBackend for OverlapReranker {
    fn score(&self, query: &str, text: &str) -> f32 {
        let query_terms: std::collections::HashSet<&str> =
            tokenize(&query.to_lowercase()).into_iter().collect();
        if query_terms.is_empty() {
            return 0.0;
        }
        let text_terms: std::collections::HashSet<&str> =
            tokenize(&text.to_lowercase()).into_iter().collect();
        let overlap = query_terms.intersection(&text_terms).count() as f32;
        let union = query_terms.union(&text_terms).count().max(1) as f32;
        overlap / union
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Rescores `candidates` (chunk_id, text) against `query`, then min-max normalizes the
/// resulting scores into `[0, 1]`. A pool with a single candidate, or one where every
/// candidate scores identically, normalizes to `1.0` across the board rather than
/// dividing by zero.
pub fn rerank(
    backend: &dyn RerankBackend,
    query: &str,
    candidates: &[(String, String)],
) -> Vec<ScoredChunk> {
    let mut raw: HashMap<String, f32> = HashMap::new();
    for (chunk_id, text) in candidates {
        raw.insert(chunk_id.clone(), backend.score(query, text));
    }

    let min = raw.values().cloned().fold(f32::INFINITY, f32::min);
    let max = raw.values().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    let mut scored: Vec<ScoredChunk> = raw
        .into_iter()
        .map(|(chunk_id, score)| {
            let normalized = if range > f32::EPSILON {
                (score - min) / range
            } else {
                1.0
            };
            ScoredChunk {
                chunk_id,
                score: normalized,
            }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_overlap_scores_highest() {
        let backend = OverlapReranker::new("test-rerank");
        let candidates = vec![
            ("a".to_string(), "rust documentation crawler".to_string()),
            ("b".to_string(), "completely unrelated gardening text".to_string()),
        ];
        let ranked = rerank(&backend, "rust crawler", &candidates);
        assert_eq!(ranked[0].chunk_id, "a");
        assert_eq!(ranked[0].score, 1.0);
    }

    #[test]
    fn single_candidate_normalizes_to_one() {
        let backend = OverlapReranker::new("test-rerank");
        let candidates = vec![("a".to_string(), "anything".to_string())];
        let ranked = rerank(&backend, "query", &candidates);
        assert_eq!(ranked[0].score, 1.0);
    }

    #[test]
    fn identical_scores_normalize_to_one_not_nan() {
        let backend = OverlapReranker::new("test-rerank");
        let candidates = vec![
            ("a".to_string(), "zzz".to_string()),
            ("b".to_string(), "zzz".to_string()),
        ];
        let ranked = rerank(&backend, "query", &candidates);
        assert!(ranked.iter().all(|r| r.score == 1.0));
    }
}
