use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single discovered URL plus whatever freshness signal the discovery source gave us.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlRecord {
    pub url: String,
    pub lastmod: Option<String>,
}

/// A raw fetched page, keyed by `sha256(url)[:32]` once it reaches the page cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub html: String,
    pub lastmod: Option<String>,
    pub cached_at: i64,
    #[serde(skip, default)]
    pub from_cache: bool,
}

/// Free-form per-chunk metadata: a few well-known fields plus an open bag for anything
/// a caller wants to carry through without a schema migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_url: String,
    pub position: usize,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Leaf unit of retrieval: what embeddings and BM25 score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildChunk {
    pub chunk_id: String,
    pub parent_id: String,
    /// Persisted as `page_content` in `chunks.json` (§6's on-disk layout names it that).
    #[serde(rename = "page_content")]
    pub content: String,
    /// Present iff a contextualizer prefix was applied; `content` = prefix + original then.
    pub original_content: Option<String>,
    pub url: String,
    pub lastmod: Option<String>,
    pub heading_path: Vec<String>,
    pub heading_path_joined: String,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
    /// Promoted parent emitted directly into the searchable set (see `ParentChunk`).
    pub is_parent_as_child: bool,
}

/// Enclosing region returned for context; never scored directly unless childless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentChunk {
    pub chunk_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub url: String,
    pub lastmod: Option<String>,
}

/// What the chunker actually hands back for one page: children plus the parents that own
/// them (including any parent-as-child promoted straight into the searchable set).
#[derive(Debug, Clone, Default)]
pub struct ChunkedPage {
    pub children: Vec<ChildChunk>,
    pub parents: Vec<ParentChunk>,
}

/// One scored hit returned by `search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub text: String,
    pub url: String,
    pub heading_path: Vec<String>,
    pub metadata: ChunkMetadata,
    pub score: f32,
    pub parent_text: Option<String>,
    pub parent_metadata: Option<ChunkMetadata>,
}

/// `{failure_count, first_error, last_error, last_attempt}` tracked per quarantine-eligible URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failure_count: u32,
    pub first_error: String,
    pub last_error: String,
    pub last_attempt: i64,
}

/// Persisted index/build metadata, compared against the current config on every load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub version: u32,
    pub last_update: i64,
    pub num_chunks: usize,
    pub embedding_model: String,
    #[serde(default)]
    pub contextual_retrieval: bool,
}

pub const CURRENT_INDEX_VERSION: u32 = 1;
