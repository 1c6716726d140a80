//! Hybrid Retriever (C8): fuses the lexical (BM25) and vector (cosine) rankings with
//! Reciprocal Rank Fusion, producing the candidate pool the re-ranker scores next (§4.8).

use std::collections::HashMap;

use ahash::RandomState;

use crate::config::HybridConfig;
use crate::lexical::LexicalIndex;
use crate::vector_index::{ScoredChunk, VectorIndex};

const RRF_K: f32 = 60.0;

/// `score(chunk) = sum over ranked lists containing chunk of weight / (rank + RRF_K)`.
/// A chunk absent from one list simply contributes nothing from that list — candidates
/// are never padded in to force both lists to the same length. Ties on fused score are
/// broken by whichever candidate achieved the higher (numerically smaller) individual
/// rank in either list — unequal weights can make two different rank profiles land on
/// the exact same fused score, so the score alone isn't a total order.
pub fn reciprocal_rank_fusion(
    bm25_ranked: &[ScoredChunk],
    vector_ranked: &[ScoredChunk],
    bm25_weight: f32,
    vector_weight: f32,
) -> Vec<ScoredChunk> {
    let mut fused: HashMap<String, (f32, usize), RandomState> = HashMap::default();

    for (rank, entry) in bm25_ranked.iter().enumerate() {
        let contribution = bm25_weight / (rank as f32 + 1.0 + RRF_K);
        let slot = fused.entry(entry.chunk_id.clone()).or_insert((0.0, usize::MAX));
        slot.0 += contribution;
        slot.1 = slot.1.min(rank);
    }
    for (rank, entry) in vector_ranked.iter().enumerate() {
        let contribution = vector_weight / (rank as f32 + 1.0 + RRF_K);
        let slot = fused.entry(entry.chunk_id.clone()).or_insert((0.0, usize::MAX));
        slot.0 += contribution;
        slot.1 = slot.1.min(rank);
    }

    let mut out: Vec<(String, f32, usize)> = fused
        .into_iter()
        .map(|(chunk_id, (score, best_rank))| (chunk_id, score, best_rank))
        .collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.cmp(&b.2))
    });
    out.into_iter()
        .map(|(chunk_id, score, _)| ScoredChunk { chunk_id, score })
        .collect()
}

pub struct HybridRetriever<'a> {
    vector: &'a VectorIndex,
    lexical: &'a LexicalIndex,
    config: &'a HybridConfig,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(vector: &'a VectorIndex, lexical: &'a LexicalIndex, config: &'a HybridConfig) -> Self {
        Self {
            vector,
            lexical,
            config,
        }
    }

    /// Returns the fused candidate pool, sized `top_k * retriever_candidate_multiplier`
    /// so the re-ranker has room to reorder beyond the final cut (§4.8, §4.9).
    pub fn retrieve(&self, query: &str, query_vector: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let candidate_k = top_k * self.config.retriever_candidate_multiplier.max(1);
        let bm25_ranked = self.lexical.search(query, candidate_k);
        let vector_ranked = self.vector.search(query_vector, candidate_k);
        let mut fused = reciprocal_rank_fusion(
            &bm25_ranked,
            &vector_ranked,
            self.config.bm25_weight,
            self.config.semantic_weight,
        );
        fused.truncate(candidate_k);
        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sc(id: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk_id: id.to_string(),
            score,
        }
    }

    #[test]
    fn top_ranked_in_both_lists_wins_fusion() {
        let bm25 = vec![sc("a", 10.0), sc("b", 5.0)];
        let vector = vec![sc("a", 0.9), sc("c", 0.8)];
        let fused = reciprocal_rank_fusion(&bm25, &vector, 0.3, 0.7);
        assert_eq!(fused[0].chunk_id, "a");
    }

    #[test]
    fn chunk_in_one_list_only_still_scores() {
        let bm25 = vec![sc("a", 10.0)];
        let vector: Vec<ScoredChunk> = vec![];
        let fused = reciprocal_rank_fusion(&bm25, &vector, 0.3, 0.7);
        assert_eq!(fused.len(), 1);
        assert!(fused[0].score > 0.0);
    }

    #[test]
    fn no_candidates_from_either_list_is_empty() {
        let fused = reciprocal_rank_fusion(&[], &[], 0.3, 0.7);
        assert!(fused.is_empty());
    }

    /// With `bm25_weight = 1, vector_weight = 2`, a candidate at bm25 rank 0
    /// (`1 / (0 + 1 + 60) = 1/61`) and a candidate at vector rank 61
    /// (`2 / (61 + 1 + 60) = 2/122 = 1/61`) land on the exact same fused score despite
    /// having entirely different rank profiles. The one with the higher (smaller-numbered)
    /// individual best rank must win the tie.
    #[test]
    fn equal_fused_scores_are_broken_by_better_individual_rank() {
        let mut bm25 = vec![sc("a", 1.0)];
        bm25.extend((1..=61).map(|i| sc(&format!("filler-{i}"), 1.0)));

        let mut vector = (0..61).map(|i| sc(&format!("vfiller-{i}"), 1.0)).collect::<Vec<_>>();
        vector.push(sc("b", 1.0));

        let fused = reciprocal_rank_fusion(&bm25, &vector, 1.0, 2.0);
        let score_a = fused.iter().find(|c| c.chunk_id == "a").unwrap().score;
        let score_b = fused.iter().find(|c| c.chunk_id == "b").unwrap().score;
        assert_eq!(score_a, score_b, "fused scores must tie exactly for this to test the tie-break");

        let pos_a = fused.iter().position(|c| c.chunk_id == "a").unwrap();
        let pos_b = fused.iter().position(|c| c.chunk_id == "b").unwrap();
        assert!(pos_a < pos_b, "rank-0 candidate must win the tie over a rank-61 candidate");
    }
}
