//! Indexing Orchestrator (C10) and Query Orchestrator (C11): the four-phase build
//! pipeline gated by crawl-state signals, and the `search()` entry point that ties the
//! hybrid retriever and re-ranker together (§4.10, §4.11).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};

use crate::cache::PageCache;
use crate::config::Config;
use crate::contextualizer::{
    self, apply_contextual_retrieval, Contextualizer, ContextCache, NoOpContextualizer,
};
use crate::crawler::Crawler;
use crate::error::{EngineError, Result};
use crate::lexical::LexicalIndex;
use crate::reranker::{rerank, OverlapReranker, RerankBackend};
use crate::retriever::HybridRetriever;
use crate::state::{CrawlStateStore, PipelineMode};
use crate::store::ChunkStore;
use crate::types::{ChildChunk, IndexMetadata, Page, SearchResult, UrlRecord, CURRENT_INDEX_VERSION};
use crate::vector_index::{EmbeddingBackend, HashingEmbedder, VectorIndex};

const EMBEDDING_DIMENSION: usize = 256;
const CONTEXT_SAVE_EVERY: usize = 20;

/// Summary returned by [`Engine::index`] — how much work the pipeline actually did, for
/// CLI reporting.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub mode: Option<String>,
    pub urls_discovered: usize,
    pub pages_fetched: usize,
    pub pages_from_cache: usize,
    pub pages_failed: usize,
    pub chunks_total: usize,
    pub chunks_new: usize,
}

pub struct Engine {
    config: Config,
    cache_dir: PathBuf,
    crawler: Crawler,
    state: CrawlStateStore,
    chunk_store: ChunkStore,
    vector_index: Option<VectorIndex>,
    lexical_index: LexicalIndex,
    embedder: Arc<dyn EmbeddingBackend>,
    reranker: Arc<dyn RerankBackend>,
    contextualizer: Arc<dyn Contextualizer>,
}

impl Engine {
    /// Loads every on-disk component described in §6's layout. A missing vector index is
    /// not an error here — it only becomes one if `search()` is called before `index()`.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let cache_dir = PathBuf::from(&config.cache_dir);
        let crawler = Crawler::new(config.crawl.clone());
        let state = CrawlStateStore::load(&cache_dir)?;
        let chunk_store = ChunkStore::load(&cache_dir)?;

        let mut lexical_index = LexicalIndex::new(&cache_dir);
        lexical_index.rebuild(chunk_store.children().map(|c| (c.chunk_id.as_str(), c.content.as_str())));

        let vector_index = VectorIndex::load(&cache_dir).ok();

        let embedder: Arc<dyn EmbeddingBackend> =
            Arc::new(HashingEmbedder::new(EMBEDDING_DIMENSION, config.embedding_model.clone()));
        let reranker: Arc<dyn RerankBackend> = Arc::new(OverlapReranker::new(config.rerank_model.clone()));
        let contextualizer: Arc<dyn Contextualizer> = Arc::new(NoOpContextualizer);

        Ok(Self {
            config,
            cache_dir,
            crawler,
            state,
            chunk_store,
            vector_index,
            lexical_index,
            embedder,
            reranker,
            contextualizer,
        })
    }

    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Runs the four-phase indexing pipeline once, end to end, per the mode C5 selects.
    pub async fn index(&mut self) -> Result<IndexReport> {
        let now = self.now_unix();
        let mode = self
            .state
            .pipeline_mode(&self.config, now, !self.chunk_store.is_empty());
        tracing::info!(?mode, "selected pipeline mode");

        if mode == PipelineMode::ForceRebuild {
            self.state.state = Default::default();
            self.chunk_store = ChunkStore::new(&self.cache_dir);
            self.chunk_store.save()?;
        }

        self.crawler.load_robots().await;

        let mut report = IndexReport {
            mode: Some(format!("{mode:?}")),
            ..Default::default()
        };

        let url_records = self.discover_phase(mode).await?;
        report.urls_discovered = url_records.len();

        let (pages, refreshed_urls) = self.fetch_phase(&url_records, mode).await?;
        report.pages_fetched = pages.iter().filter(|(_, p)| !p.from_cache).count();
        report.pages_from_cache = pages.iter().filter(|(_, p)| p.from_cache).count();
        report.pages_failed = url_records.len().saturating_sub(pages.len());

        let new_chunk_ids = self.chunk_phase(pages, &refreshed_urls)?;
        report.chunks_new = new_chunk_ids.len();

        self.maybe_contextualize(&new_chunk_ids).await?;

        self.index_build_phase(mode, !refreshed_urls.is_empty(), &new_chunk_ids)
            .await?;
        report.chunks_total = self.chunk_store.len();

        self.state.save()?;
        self.chunk_store.save()?;

        Ok(report)
    }

    /// Phase 1 — Discover (§4.10). Skipped (keeping the prior discovery list) only when
    /// the crawl is already complete and neither expanding nor rebuilding.
    async fn discover_phase(&mut self, mode: PipelineMode) -> Result<Vec<UrlRecord>> {
        let should_discover = !self.state.state.crawl_complete
            || matches!(mode, PipelineMode::ForceRebuild | PipelineMode::ResumeOrExpand);

        let records = if should_discover {
            self.crawler.discover().await
        } else {
            self.state
                .state
                .discovered_urls
                .iter()
                .cloned()
                .map(|url| UrlRecord { url, lastmod: None })
                .collect()
        };

        let urls: Vec<String> = records.iter().map(|r| r.url.clone()).collect();
        self.state.record_discovery(&urls, self.config.crawl.max_pages);
        if !urls.is_empty() {
            self.state.state.crawl_complete = true;
        }
        self.state.save()?;
        Ok(records)
    }

    /// Phase 2 — Fetch (§4.10). Cache hits short-circuit the network entirely; misses go
    /// through the crawler's politeness-bounded fetch, then C2 extraction, then are
    /// written back into the page cache.
    async fn fetch_phase(
        &mut self,
        url_records: &[UrlRecord],
        mode: PipelineMode,
    ) -> Result<(Vec<(UrlRecord, Page)>, HashSet<String>)> {
        let max_retries = self.config.crawl.max_url_retries;
        let targets: Vec<UrlRecord> = url_records
            .iter()
            .filter(|r| !self.state.is_quarantined(&r.url, max_retries))
            .filter(|r| {
                if !matches!(mode, PipelineMode::ResumeOrExpand) {
                    return true;
                }
                if !self.state.state.indexed_urls.contains(&r.url) {
                    return true;
                }
                // Already indexed under a plain resume/expand — only worth refetching if
                // its freshly-discovered lastmod drifted from what we last chunked it
                // under. Otherwise the cache check below is a guaranteed hit anyway, so
                // excluding it here just saves a disk read.
                match self.chunk_store.lastmod_for_url(&r.url) {
                    Some(prior_lastmod) => prior_lastmod.as_deref() != r.lastmod.as_deref(),
                    None => true,
                }
            })
            .cloned()
            .collect();

        let crawler = Arc::new(self.crawler.clone());
        let cache_dir = self.cache_dir.clone();
        let ttl_hours = self.config.page_cache_ttl_hours;
        let force_refresh = self.config.force_refresh
            || matches!(mode, PipelineMode::Refresh | PipelineMode::ForceRebuild);
        let now = self.now_unix();
        let max_workers = self.config.crawl.max_workers.max(1);

        let fetch_results: Vec<(UrlRecord, std::result::Result<Page, EngineError>)> = stream::iter(
            targets.into_iter().map(|record| {
                let crawler = Arc::clone(&crawler);
                let cache_dir = cache_dir.clone();
                async move {
                    let page_cache = PageCache::new(&cache_dir);
                    let cached = page_cache.get(&record.url).ok().flatten();
                    let is_valid = cached
                        .as_ref()
                        .map(|p| {
                            PageCache::is_valid(p, record.lastmod.as_deref(), ttl_hours, now, force_refresh)
                        })
                        .unwrap_or(false);

                    if let Some(mut page) = cached.filter(|_| is_valid) {
                        page.from_cache = true;
                        return (record, Ok(page));
                    }

                    let fetched = match crawler.fetch_page(&record.url).await {
                        Ok(html) => html,
                        Err(reason) => {
                            return (
                                record.clone(),
                                Err(EngineError::Fetch {
                                    url: record.url.clone(),
                                    reason,
                                }),
                            )
                        }
                    };

                    let extracted = match crate::extractor::extract(&fetched, &record.url) {
                        Ok(e) => e,
                        Err(e) => return (record, Err(e)),
                    };

                    let page = Page {
                        url: record.url.clone(),
                        html: extracted.html,
                        lastmod: record.lastmod.clone(),
                        cached_at: now,
                        from_cache: false,
                    };
                    if let Err(e) = page_cache.put(&page) {
                        tracing::warn!(url = %record.url, error = %e, "failed to persist page cache entry");
                    }
                    (record, Ok(page))
                }
            }),
        )
        .buffer_unordered(max_workers)
        .collect()
        .await;

        let mut pages = Vec::new();
        let mut refreshed_urls = HashSet::new();
        for (record, result) in fetch_results {
            match result {
                Ok(page) => {
                    let was_indexed = self.state.state.indexed_urls.contains(&record.url);
                    if !page.from_cache && was_indexed {
                        refreshed_urls.insert(record.url.clone());
                    }
                    self.state.record_success(&record.url);
                    pages.push((record, page));
                }
                Err(e) => {
                    tracing::warn!(url = %record.url, error = %e, "fetch failed");
                    self.state.record_failure(&record.url, now, &e.to_string());
                }
            }
        }
        self.state.save()?;

        Ok((pages, refreshed_urls))
    }

    /// Phase 3 — Chunk (§4.10). Content-deduplicates by `sha256(html)` (first URL wins),
    /// purges stale chunks for refreshed URLs, and chunks every page that wasn't already
    /// served from cache. Returns the `chunk_id`s of every child written this phase.
    fn chunk_phase(
        &mut self,
        mut pages: Vec<(UrlRecord, Page)>,
        refreshed_urls: &HashSet<String>,
    ) -> Result<Vec<String>> {
        pages.sort_by(|a, b| a.0.url.cmp(&b.0.url));

        let mut seen_hashes: HashSet<String> = HashSet::new();
        let mut new_chunk_ids = Vec::new();

        for url in refreshed_urls {
            self.chunk_store.purge_url(url);
        }

        for (record, page) in pages {
            if page.from_cache {
                continue;
            }
            let hash = hex::encode(Sha256::digest(page.html.as_bytes()));
            if !seen_hashes.insert(hash) {
                tracing::debug!(url = %record.url, "duplicate content hash, skipping re-chunk");
                continue;
            }

            let chunked = crate::chunker::chunk_page(
                &record.url,
                record.lastmod.as_deref(),
                &page.html,
                &self.config.chunker,
            );
            new_chunk_ids.extend(chunked.children.iter().map(|c| c.chunk_id.clone()));
            self.chunk_store.replace_page(&record.url, chunked);
        }

        Ok(new_chunk_ids)
    }

    /// Optional contextualization step between Phase 3 and Phase 4: generates an LLM
    /// prefix for each newly written child, inline or on a background task depending on
    /// `contextual_retrieval_background` (§4.12).
    async fn maybe_contextualize(&mut self, new_chunk_ids: &[String]) -> Result<()> {
        if !self.config.contextual_retrieval_enabled || new_chunk_ids.is_empty() {
            return Ok(());
        }

        let mut touched: Vec<ChildChunk> = new_chunk_ids
            .iter()
            .filter_map(|id| self.chunk_store.child(id).cloned())
            .collect();
        let parent_texts: HashMap<String, String> = touched
            .iter()
            .filter_map(|c| {
                self.chunk_store
                    .parent(&c.parent_id)
                    .map(|p| (c.parent_id.clone(), p.content.clone()))
            })
            .collect();

        if self.config.contextual_retrieval_background {
            let children_arc = Arc::new(Mutex::new(touched));
            let handle = contextualizer::spawn_background(
                Arc::clone(&self.contextualizer),
                Arc::clone(&children_arc),
                parent_texts,
                self.cache_dir.clone(),
                CONTEXT_SAVE_EVERY,
            );
            let report = handle.join().await?;
            tracing::info!(chunks_prefixed = report.chunks_prefixed, "background contextualization complete");
            touched = Arc::try_unwrap(children_arc)
                .map(|m| m.into_inner().expect("contextualization lock not poisoned"))
                .unwrap_or_default();
        } else {
            let mut cache = ContextCache::load(&self.cache_dir)?;
            apply_contextual_retrieval(
                self.contextualizer.as_ref(),
                &mut touched,
                |pid| parent_texts.get(pid).cloned(),
                &mut cache,
                CONTEXT_SAVE_EVERY,
            )?;
        }

        for child in touched {
            self.chunk_store.upsert_child(child);
        }
        Ok(())
    }

    /// Phase 4 — Index build (§4.10). A full rebuild is forced whenever any URL was
    /// refreshed (the vector index can't selectively drop stale entries); otherwise new
    /// chunks are added incrementally on top of whatever was already embedded.
    async fn index_build_phase(
        &mut self,
        mode: PipelineMode,
        any_refreshed: bool,
        new_chunk_ids: &[String],
    ) -> Result<()> {
        let full_rebuild = any_refreshed
            || matches!(mode, PipelineMode::ForceRebuild | PipelineMode::EmbeddingOnlyRebuild)
            || self.vector_index.is_none();

        let embedder = Arc::clone(&self.embedder);

        if full_rebuild {
            let all_docs: Vec<(String, String)> = self
                .chunk_store
                .children()
                .map(|c| (c.chunk_id.clone(), c.content.clone()))
                .collect();
            let embedded = embed_batch(embedder, all_docs).await;
            let mut index = VectorIndex::new(&self.cache_dir, self.config.embedding_model.clone(), EMBEDDING_DIMENSION);
            for (chunk_id, vector) in embedded {
                index.add(chunk_id, vector);
            }
            self.vector_index = Some(index);
        } else if !new_chunk_ids.is_empty() {
            let docs: Vec<(String, String)> = new_chunk_ids
                .iter()
                .filter_map(|id| self.chunk_store.child(id).map(|c| (id.clone(), c.content.clone())))
                .collect();
            let embedded = embed_batch(embedder, docs).await;
            let index = self.vector_index.as_mut().expect("checked is_some above");
            for (chunk_id, vector) in embedded {
                if !index.contains(&chunk_id) {
                    index.add(chunk_id, vector);
                }
            }
        }

        if let Some(index) = &self.vector_index {
            index.save()?;
        }

        self.lexical_index.rebuild(
            self.chunk_store
                .children()
                .map(|c| (c.chunk_id.as_str(), c.content.as_str())),
        );

        let metadata = IndexMetadata {
            version: CURRENT_INDEX_VERSION,
            last_update: self.now_unix(),
            num_chunks: self.chunk_store.len(),
            embedding_model: self.config.embedding_model.clone(),
            contextual_retrieval: self.config.contextual_retrieval_enabled,
        };
        self.state.save_metadata(&metadata)?;
        self.state.metadata = Some(metadata);

        Ok(())
    }

    /// Query Orchestrator (C11): fuses hybrid candidates, optionally re-ranks, and
    /// attaches parent context (§4.11).
    pub fn search(&self, query: &str, top_k: Option<usize>, return_parent: bool) -> Vec<SearchResult> {
        let Some(vector_index) = &self.vector_index else {
            tracing::warn!("search() called before an index was built");
            return Vec::new();
        };

        let top_k = top_k.unwrap_or(self.config.hybrid.search_top_k);
        let query_vector = self.embedder.embed(query);
        let retriever = HybridRetriever::new(vector_index, &self.lexical_index, &self.config.hybrid);
        let candidates = retriever.retrieve(query, &query_vector, top_k);

        let mut staged: Vec<(String, SearchResult)> = Vec::new();
        for candidate in &candidates {
            let Some(child) = self.chunk_store.child(&candidate.chunk_id) else {
                continue;
            };
            let (parent_text, parent_metadata) = if return_parent {
                match self.chunk_store.parent(&child.parent_id) {
                    Some(parent) => (
                        Some(crate::chunker::truncate_parent_context(
                            &parent.content,
                            self.config.hybrid.parent_context_max_chars,
                        )),
                        Some(parent.metadata.clone()),
                    ),
                    None => (None, None),
                }
            } else {
                (None, None)
            };

            staged.push((
                candidate.chunk_id.clone(),
                SearchResult {
                    text: child.content.clone(),
                    url: child.url.clone(),
                    heading_path: child.heading_path.clone(),
                    metadata: child.metadata.clone(),
                    score: candidate.score,
                    parent_text,
                    parent_metadata,
                },
            ));
        }

        if self.config.hybrid.rerank_enabled && !staged.is_empty() {
            let candidate_texts: Vec<(String, String)> = staged
                .iter()
                .map(|(id, r)| (id.clone(), r.text.clone()))
                .collect();
            let reranked = rerank(self.reranker.as_ref(), query, &candidate_texts);
            let score_by_id: HashMap<String, f32> =
                reranked.into_iter().map(|s| (s.chunk_id, s.score)).collect();
            for (id, result) in staged.iter_mut() {
                if let Some(score) = score_by_id.get(id) {
                    result.score = *score;
                }
            }
            staged.sort_by(|a, b| b.1.score.partial_cmp(&a.1.score).unwrap_or(std::cmp::Ordering::Equal));
        }

        staged.truncate(top_k);
        staged.into_iter().map(|(_, r)| r).collect()
    }
}

/// Embeds `docs` off the async runtime: embedding is CPU-bound, so the batch is handed to
/// rayon's global pool from inside a `spawn_blocking` task rather than run on the tokio
/// worker thread directly (§5).
async fn embed_batch(embedder: Arc<dyn EmbeddingBackend>, docs: Vec<(String, String)>) -> Vec<(String, Vec<f32>)> {
    tokio::task::spawn_blocking(move || {
        use rayon::prelude::*;
        docs.par_iter()
            .map(|(chunk_id, text)| (chunk_id.clone(), embedder.embed(text)))
            .collect()
    })
    .await
    .unwrap_or_default()
}
