//! Chunk Store: durable home for the parent/child tree the chunker produces, keyed by
//! `chunk_id` so the vector and lexical indexes can resolve a scored ID back to text and
//! a parent region looks up in O(1) when attached to a search result (§4.3, §4.11).

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::Result;
use crate::persistence::{read_json_opt, write_json_atomic};
use crate::types::{ChildChunk, ChunkedPage, ParentChunk};

pub struct ChunkStore {
    children_path: PathBuf,
    parents_path: PathBuf,
    children: IndexMap<String, ChildChunk>,
    parents: IndexMap<String, ParentChunk>,
}

impl ChunkStore {
    /// An empty store rooted at `cache_dir`, ignoring whatever is already persisted
    /// there. Used by a force-rebuild, which discards prior chunks rather than reloading
    /// them (§4.10).
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        let cache_dir = cache_dir.as_ref();
        Self {
            children_path: cache_dir.join("chunks.json"),
            parents_path: cache_dir.join("parent_chunks.json"),
            children: IndexMap::new(),
            parents: IndexMap::new(),
        }
    }

    pub fn load(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        let children_path = cache_dir.join("chunks.json");
        let parents_path = cache_dir.join("parent_chunks.json");
        // chunks.json is a list, not a map (§6: "list of {page_content, metadata}") — the
        // chunk_id a caller needs for lookup lives inside each element, not as a JSON key.
        let children_list: Vec<ChildChunk> = read_json_opt(&children_path)?.unwrap_or_default();
        let children = children_list
            .into_iter()
            .map(|c| (c.chunk_id.clone(), c))
            .collect();
        let parents: IndexMap<String, ParentChunk> =
            read_json_opt(&parents_path)?.unwrap_or_default();
        Ok(Self {
            children_path,
            parents_path,
            children,
            parents,
        })
    }

    pub fn save(&self) -> Result<()> {
        let children_list: Vec<&ChildChunk> = self.children.values().collect();
        write_json_atomic(&self.children_path, &children_list)?;
        write_json_atomic(&self.parents_path, &self.parents)
    }

    /// Replaces whatever was previously stored for `chunked`'s URL with its freshly
    /// chunked contents — a no-op union would leave stale chunks behind after a page's
    /// structure changes between crawls.
    pub fn replace_page(&mut self, url: &str, chunked: ChunkedPage) {
        self.purge_url(url);
        for child in chunked.children {
            self.children.insert(child.chunk_id.clone(), child);
        }
        for parent in chunked.parents {
            self.parents.insert(parent.chunk_id.clone(), parent);
        }
    }

    /// Drops every chunk (parent and child) belonging to `url`. Used on re-crawl before
    /// re-inserting, and to clean up a quarantined or removed URL.
    pub fn purge_url(&mut self, url: &str) {
        self.children.retain(|_, c| c.url != url);
        self.parents.retain(|_, p| p.url != url);
    }

    /// Overwrites a single child in place (by `chunk_id`), used after contextualization
    /// mutates a chunk's `content`/`original_content` without touching the rest of the page.
    pub fn upsert_child(&mut self, child: ChildChunk) {
        self.children.insert(child.chunk_id.clone(), child);
    }

    pub fn child(&self, chunk_id: &str) -> Option<&ChildChunk> {
        self.children.get(chunk_id)
    }

    pub fn parent(&self, parent_id: &str) -> Option<&ParentChunk> {
        self.parents.get(parent_id)
    }

    pub fn children(&self) -> impl Iterator<Item = &ChildChunk> {
        self.children.values()
    }

    /// The `lastmod` carried by whatever chunk(s) are currently on record for `url`, or
    /// `None` if no chunk for that URL exists yet. Every child chunked from the same page
    /// shares one `lastmod` (`chunker::chunk_page` stamps it uniformly), so the first match
    /// is authoritative.
    pub fn lastmod_for_url(&self, url: &str) -> Option<Option<String>> {
        self.children
            .values()
            .find(|c| c.url == url)
            .map(|c| c.lastmod.clone())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
