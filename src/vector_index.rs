//! Vector Index (C6): embeds chunk content, persists an approximate nearest-neighbor
//! store with a checksum file guarding against tampering, supports incremental add
//! (§4.6). The ANN here is a brute-force cosine scan over L2-normalized vectors — the
//! same approach this codebase's own semantic engine uses for GloVe nearest-neighbor
//! lookups — behind a trait so a real accelerated ANN backend can replace it later
//! without touching callers.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

/// Produces an embedding vector for a piece of text. The only implementor this crate
/// ships is CPU-bound; the trait boundary exists so an accelerator-backed embedder can
/// be swapped in without changing `VectorIndex`.
pub trait EmbeddingBackend: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
    fn model_id(&self) -> &str;
}

/// Deterministic hashing-trick embedder: stands in for a real model so the rest of the
/// pipeline (index math, persistence, checksum, RRF) can be built and tested without a
/// bundled embedding model. Produces dense, L2-normalized vectors from token hashes.
pub struct HashingEmbedder {
    dim: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize, model_id: impl Into<String>) -> Self {
        Self {
            dim,
            model_id: model_id.into(),
        }
    }
}

impl EmbeddingBackend for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in crate::tokenizer::tokenize(&text.to_lowercase()) {
            let mut hasher = Sha256::new();
            hasher.update(token.as_bytes());
            let digest = hasher.finalize();
            let bucket = (u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
                as usize)
                % self.dim;
            let sign = if digest[4] % 2 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        l2_normalize(&mut v);
        v
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn cosine(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    a.dot(b)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    chunk_id: String,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoredIndex {
    model_id: String,
    dimension: usize,
    entries: Vec<StoredEntry>,
}

pub struct VectorIndex {
    dir: PathBuf,
    model_id: String,
    dimension: usize,
    entries: Vec<StoredEntry>,
}

pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

const VECTOR_FILE: &str = "vectors.bin";

impl VectorIndex {
    pub fn new(dir: impl Into<PathBuf>, model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            dir: dir.into(),
            model_id: model_id.into(),
            dimension,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, chunk_id: impl Into<String>, vector: Vec<f32>) {
        self.entries.push(StoredEntry {
            chunk_id: chunk_id.into(),
            vector,
        });
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.entries.iter().any(|e| e.chunk_id == chunk_id)
    }

    /// Brute-force cosine top-k. Vectors are expected to already be L2-normalized, so
    /// cosine reduces to a dot product.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Vec<ScoredChunk> {
        let q = Array1::from_vec(query_vector.to_vec());
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|e| ScoredChunk {
                chunk_id: e.chunk_id.clone(),
                score: cosine(&q, &Array1::from_vec(e.vector.clone())),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn index_dir(&self) -> PathBuf {
        self.dir.join("vector_index")
    }

    fn vector_path(&self) -> PathBuf {
        self.index_dir().join(VECTOR_FILE)
    }

    fn checksum_path(&self) -> PathBuf {
        self.dir.join("vector_index.sha256")
    }

    /// Computes the SHA-256 checksum over every file in the index directory, in sorted
    /// path order, concatenated — the companion file verified on load (§4.6).
    fn compute_checksum(index_dir: &Path) -> Result<String> {
        let mut paths: Vec<PathBuf> = fs::read_dir(index_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        paths.sort();
        let mut hasher = Sha256::new();
        for path in paths {
            hasher.update(fs::read(&path)?);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Saves the index, then writes the checksum file *after* the index files are
    /// durable — the ordering that makes a mid-write crash detectable rather than
    /// silently corrupt (§5).
    pub fn save(&self) -> Result<()> {
        let index_dir = self.index_dir();
        fs::create_dir_all(&index_dir)?;
        let stored = StoredIndex {
            model_id: self.model_id.clone(),
            dimension: self.dimension,
            entries: self.entries.clone(),
        };
        let bytes = bincode::serialize(&stored)
            .map_err(|e| EngineError::Config(format!("failed to serialize vector index: {e}")))?;
        crate::persistence::write_bytes_atomic(&self.vector_path(), &bytes)?;

        let checksum = Self::compute_checksum(&index_dir)?;
        crate::persistence::write_bytes_atomic(&self.checksum_path(), checksum.as_bytes())?;
        Ok(())
    }

    /// Loads the index, verifying the checksum file before trusting the contents. A
    /// missing checksum file (legacy) loads with a warning rather than refusing.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let index_dir = dir.join("vector_index");
        let vector_path = index_dir.join(VECTOR_FILE);
        let checksum_path = dir.join("vector_index.sha256");

        if !vector_path.exists() {
            return Err(EngineError::IndexNotLoaded);
        }

        if checksum_path.exists() {
            let expected = fs::read_to_string(&checksum_path)?;
            let actual = Self::compute_checksum(&index_dir)?;
            if expected.trim() != actual {
                return Err(EngineError::IndexTamper {
                    path: checksum_path.display().to_string(),
                });
            }
        } else {
            tracing::warn!(
                path = %checksum_path.display(),
                "vector index checksum file missing (legacy); loading without verification"
            );
        }

        let bytes = fs::read(&vector_path)?;
        let stored: StoredIndex = bincode::deserialize(&bytes)
            .map_err(|e| EngineError::Config(format!("failed to deserialize vector index: {e}")))?;

        Ok(Self {
            dir,
            model_id: stored.model_id,
            dimension: stored.dimension,
            entries: stored.entries,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hashing_embedder_produces_unit_vectors() {
        let embedder = HashingEmbedder::new(64, "test-model");
        let v = embedder.embed("hello documentation world");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[test]
    fn search_ranks_identical_vector_first() {
        let mut index = VectorIndex::new("/tmp/unused", "test-model", 4);
        index.add("a", vec![1.0, 0.0, 0.0, 0.0]);
        index.add("b", vec![0.0, 1.0, 0.0, 0.0]);
        let results = index.search(&[1.0, 0.0, 0.0, 0.0], 2);
        assert_eq!(results[0].chunk_id, "a");
    }

    #[test]
    fn save_then_load_round_trips_and_verifies_checksum() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::new(dir.path(), "test-model", 4);
        index.add("a", vec![1.0, 0.0, 0.0, 0.0]);
        index.save().unwrap();

        let loaded = VectorIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("a"));
    }

    #[test]
    fn tampering_triggers_index_tamper_error() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::new(dir.path(), "test-model", 4);
        index.add("a", vec![1.0, 0.0, 0.0, 0.0]);
        index.save().unwrap();

        let vector_file = dir.path().join("vector_index").join(VECTOR_FILE);
        let mut bytes = fs::read(&vector_file).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&vector_file, bytes).unwrap();

        let result = VectorIndex::load(dir.path());
        assert!(matches!(result, Err(EngineError::IndexTamper { .. })));
    }

    #[test]
    fn missing_checksum_loads_with_warning_not_error() {
        let dir = tempdir().unwrap();
        let mut index = VectorIndex::new(dir.path(), "test-model", 4);
        index.add("a", vec![1.0, 0.0, 0.0, 0.0]);
        index.save().unwrap();
        fs::remove_file(dir.path().join("vector_index.sha256")).unwrap();

        let loaded = VectorIndex::load(dir.path());
        assert!(loaded.is_ok());
    }

    #[test]
    fn missing_index_is_index_not_loaded() {
        let dir = tempdir().unwrap();
        let result = VectorIndex::load(dir.path());
        assert!(matches!(result, Err(EngineError::IndexNotLoaded)));
    }
}
