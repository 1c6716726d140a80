//! Lexical Index (C7): classic Okapi BM25 over child chunk content. Always rebuilt from
//! the current chunk list on load and after every indexing run, never persisted to disk
//! (§4.7) — a stale BM25 snapshot could silently drift from the chunk store it scores.

use std::collections::HashMap;

use ahash::RandomState;
use serde::{Deserialize, Serialize};

use crate::tokenizer::tokenize;
use crate::vector_index::ScoredChunk;

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// Postings and document-length lookups are the hottest maps in the query path; `ahash`
/// trades DoS-resistant hashing (irrelevant for a locally built index) for raw speed, the
/// same tradeoff the corpus makes for its own performance-critical keyed collections.
type FastMap<K, V> = HashMap<K, V, RandomState>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Posting {
    chunk_id: String,
    term_freq: u32,
}

/// In-memory inverted index plus the two corpus statistics BM25 needs (document count
/// and average document length). Rebuilt wholesale on every indexing run rather than
/// incrementally updated — cheap relative to embedding, and avoids drift between a
/// document's stored length and its postings after a partial update.
pub struct LexicalIndex {
    postings: FastMap<String, Vec<Posting>>,
    doc_lengths: FastMap<String, u32>,
}

impl LexicalIndex {
    pub fn new(_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            postings: FastMap::default(),
            doc_lengths: FastMap::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Clears and rebuilds the index from scratch over `docs` (chunk_id, content).
    pub fn rebuild<'a>(&mut self, docs: impl Iterator<Item = (&'a str, &'a str)>) {
        self.postings.clear();
        self.doc_lengths.clear();

        for (chunk_id, content) in docs {
            let tokens = tokenize(&content.to_lowercase());
            self.doc_lengths
                .insert(chunk_id.to_string(), tokens.len() as u32);

            let mut term_counts: FastMap<&str, u32> = FastMap::default();
            for token in &tokens {
                *term_counts.entry(*token).or_insert(0) += 1;
            }
            for (term, count) in term_counts {
                self.postings
                    .entry(term.to_string())
                    .or_default()
                    .push(Posting {
                        chunk_id: chunk_id.to_string(),
                        term_freq: count,
                    });
            }
        }
    }

    fn avg_doc_len(&self) -> f32 {
        if self.doc_lengths.is_empty() {
            return 0.0;
        }
        self.doc_lengths.values().sum::<u32>() as f32 / self.doc_lengths.len() as f32
    }

    /// BM25 scoring over the query's lowercased tokens, deduplicated (a repeated query
    /// term contributes its IDF once per document, not once per occurrence in the query).
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        if self.doc_lengths.is_empty() {
            return Vec::new();
        }
        let n = self.doc_lengths.len() as f32;
        let avg_len = self.avg_doc_len();
        let mut query_terms: Vec<&str> = tokenize(&query.to_lowercase());
        query_terms.sort_unstable();
        query_terms.dedup();

        let mut scores: FastMap<&str, f32> = FastMap::default();
        for term in &query_terms {
            let Some(postings) = self.postings.get(*term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for posting in postings {
                let doc_len = *self.doc_lengths.get(&posting.chunk_id).unwrap_or(&0) as f32;
                let tf = posting.term_freq as f32;
                let denom = tf + K1 * (1.0 - B + B * doc_len / avg_len.max(1.0));
                let score = idf * (tf * (K1 + 1.0)) / denom.max(f32::EPSILON);
                *scores.entry(&posting.chunk_id).or_insert(0.0) += score;
            }
        }

        let mut scored: Vec<ScoredChunk> = scores
            .into_iter()
            .map(|(chunk_id, score)| ScoredChunk {
                chunk_id: chunk_id.to_string(),
                score,
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

}
