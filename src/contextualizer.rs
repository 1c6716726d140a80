//! Contextualizer (C12, optional): per-chunk LLM-produced prefix describing how a chunk
//! fits its page, with an idempotent content-hash cache and a background task-handle so
//! the main index stays searchable while prefixes are generated (§4.12).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::ChildChunk;

/// Produces a short prefix for one chunk given its parent's text. The only implementor
/// this crate ships is the pass-through no-op below; a real backend (an LLM call) plugs
/// in behind the same trait without the rest of the pipeline changing.
pub trait Contextualizer: Send + Sync {
    fn contextualize(&self, parent_text: &str, chunk_text: &str) -> Result<String>;
}

/// Prefix is always the empty string, so `apply_contextual_retrieval` is a correctness
/// no-op: `content` stays unchanged and `original_content` stays unset. Lets the rest of
/// the pipeline be built and tested against a real `Contextualizer` without an LLM call.
pub struct NoOpContextualizer;

impl Contextualizer for NoOpContextualizer {
    fn contextualize(&self, _parent_text: &str, _chunk_text: &str) -> Result<String> {
        Ok(String::new())
    }
}

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

/// Persisted `chunk_hash → prefix` cache (§6, `context_cache.json`). Keyed by content
/// hash rather than `chunk_id` so an unchanged chunk that got a new ID across a re-chunk
/// (shouldn't happen per the chunk-ID invariant, but costs nothing to be robust to) still
/// hits the cache.
pub struct ContextCache {
    path: PathBuf,
    prefixes: HashMap<String, String>,
    dirty_since_save: usize,
}

impl ContextCache {
    pub fn load(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let path = cache_dir.as_ref().join("context_cache.json");
        let prefixes = crate::persistence::read_json_opt(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            prefixes,
            dirty_since_save: 0,
        })
    }

    pub fn save(&mut self) -> Result<()> {
        crate::persistence::write_json_atomic(&self.path, &self.prefixes)?;
        self.dirty_since_save = 0;
        Ok(())
    }

    fn get(&self, content: &str) -> Option<&String> {
        self.prefixes.get(&content_hash(content))
    }

    /// Inserts a freshly computed prefix, checkpointing to disk every `save_every`
    /// insertions so an interrupted run loses at most that many calls (§4.12).
    fn insert_and_maybe_save(&mut self, content: &str, prefix: String, save_every: usize) -> Result<()> {
        self.prefixes.insert(content_hash(content), prefix);
        self.dirty_since_save += 1;
        if save_every > 0 && self.dirty_since_save >= save_every {
            self.save()?;
        }
        Ok(())
    }
}

/// Applies `contextualizer` to every chunk in `children` whose prefix is not already
/// cached, mutating `content`/`original_content` in place (§3's chunk invariant: when a
/// prefix is applied, `original_content` holds the pre-prefix text and `content` = prefix
/// + original). A no-op prefix (empty string) leaves the chunk untouched.
pub fn apply_contextual_retrieval(
    contextualizer: &dyn Contextualizer,
    children: &mut [ChildChunk],
    parent_text_for: impl Fn(&str) -> Option<String>,
    cache: &mut ContextCache,
    save_every: usize,
) -> Result<()> {
    for child in children.iter_mut() {
        if child.original_content.is_some() {
            continue; // already contextualized in a prior run
        }
        let prefix = if let Some(cached) = cache.get(&child.content) {
            cached.clone()
        } else {
            let parent_text = parent_text_for(&child.parent_id).unwrap_or_default();
            let prefix = contextualizer.contextualize(&parent_text, &child.content)?;
            cache.insert_and_maybe_save(&child.content, prefix.clone(), save_every)?;
            prefix
        };
        if !prefix.is_empty() {
            child.original_content = Some(child.content.clone());
            child.content = format!("{prefix}\n\n{}", child.content);
        }
    }
    cache.save()
}

/// Outcome of a background contextualization pass: how many chunks got a non-empty
/// prefix, used by the orchestrator to decide whether to flip the `contextual_retrieval`
/// metadata flag and trigger an embedding rebuild.
pub struct ContextualizationReport {
    pub chunks_prefixed: usize,
}

/// Handle to a contextualization pass kicked off on a background task: the index stays
/// searchable while it runs, and the caller checks in on completion rather than blocking
/// indexing on it (§4.12, §5). Backed by a `tokio::task::JoinHandle`.
pub struct BackgroundContextualization {
    handle: tokio::task::JoinHandle<Result<ContextualizationReport>>,
}

impl BackgroundContextualization {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<ContextualizationReport> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Ok(ContextualizationReport { chunks_prefixed: 0 }),
        }
    }
}

/// Spawns `apply_contextual_retrieval` on a background task. CPU-light but potentially
/// long-running (one LLM call per uncached chunk), so it is dispatched via `spawn` rather
/// than run inline on the orchestrator's phase loop.
pub fn spawn_background(
    contextualizer: Arc<dyn Contextualizer>,
    children: Arc<Mutex<Vec<ChildChunk>>>,
    parent_texts: HashMap<String, String>,
    cache_dir: PathBuf,
    save_every: usize,
) -> BackgroundContextualization {
    let handle = tokio::task::spawn(async move {
        let mut cache = ContextCache::load(&cache_dir)?;
        let mut guard = children.lock().expect("contextualization child lock");
        let before: usize = guard.iter().filter(|c| c.original_content.is_some()).count();
        apply_contextual_retrieval(
            contextualizer.as_ref(),
            &mut guard,
            |parent_id| parent_texts.get(parent_id).cloned(),
            &mut cache,
            save_every,
        )?;
        let after: usize = guard.iter().filter(|c| c.original_content.is_some()).count();
        Ok(ContextualizationReport {
            chunks_prefixed: after.saturating_sub(before),
        })
    });
    BackgroundContextualization { handle }
}
