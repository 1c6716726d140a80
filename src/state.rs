//! Crawl State Store (C5): tracks discovered/indexed/failed URLs across runs and derives
//! the resume/expand/refresh/quarantine signals that gate the orchestrator (§4.5, §4.10).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::persistence::{read_json_opt, write_json_atomic};
use crate::types::{FailureRecord, IndexMetadata, CURRENT_INDEX_VERSION};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlState {
    pub discovered_urls: HashSet<String>,
    pub indexed_urls: HashSet<String>,
    pub failed_urls: HashMap<String, FailureRecord>,
    pub crawl_complete: bool,
    pub max_pages_limit: Option<usize>,
}

pub struct CrawlStateStore {
    path: PathBuf,
    metadata_path: PathBuf,
    pub state: CrawlState,
    pub metadata: Option<IndexMetadata>,
}

/// Bundles the signals C10 reads to pick a pipeline mode (§4.10's action table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    ForceRebuild,
    EmbeddingOnlyRebuild,
    Refresh,
    ResumeOrExpand,
    Fresh,
}

impl CrawlStateStore {
    pub fn load(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref();
        let path = cache_dir.join("crawl_state.json");
        let metadata_path = cache_dir.join("metadata.json");
        let state = read_json_opt(&path)?.unwrap_or_default();
        let metadata = read_json_opt(&metadata_path)?;
        Ok(Self {
            path,
            metadata_path,
            state,
            metadata,
        })
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.state)
    }

    pub fn save_metadata(&self, metadata: &IndexMetadata) -> Result<()> {
        write_json_atomic(&self.metadata_path, metadata)
    }

    pub fn is_quarantined(&self, url: &str, max_url_retries: u32) -> bool {
        self.state
            .failed_urls
            .get(url)
            .map(|r| r.failure_count >= max_url_retries)
            .unwrap_or(false)
    }

    pub fn record_success(&mut self, url: &str) {
        self.state.indexed_urls.insert(url.to_string());
        self.state.failed_urls.remove(url);
    }

    pub fn record_failure(&mut self, url: &str, now_unix: i64, error: &str) {
        let entry = self
            .state
            .failed_urls
            .entry(url.to_string())
            .or_insert_with(|| FailureRecord {
                failure_count: 0,
                first_error: error.to_string(),
                last_error: error.to_string(),
                last_attempt: now_unix,
            });
        entry.failure_count += 1;
        entry.last_error = error.to_string();
        entry.last_attempt = now_unix;
    }

    /// `needs_update()` (§4.5): true if there's no prior metadata, the persisted index
    /// version or embedding model has drifted, `max_pages` grew, or the staleness window
    /// elapsed. Useful standalone for an external "is this index due for a check" caller;
    /// `pipeline_mode` below does NOT call this directly, since it would make a pure
    /// expand indistinguishable from a refresh (see `is_stale_refresh`).
    pub fn needs_update(&self, config: &Config, now_unix: i64) -> bool {
        let Some(meta) = &self.metadata else {
            return true;
        };
        if meta.version != CURRENT_INDEX_VERSION {
            return true;
        }
        if meta.embedding_model != config.embedding_model {
            return true;
        }
        if let Some(prior_max) = self.state.max_pages_limit {
            if config.crawl.max_pages > prior_max {
                return true;
            }
        }
        let hours_elapsed = (now_unix - meta.last_update) as f64 / 3600.0;
        hours_elapsed >= config.update_check_interval_hours
    }

    /// The subset of `needs_update()`'s conditions that actually mean "re-discover and
    /// re-fetch everything changed" (§4.10's refresh row: "forced, or TTL/lastmod"):
    /// missing/stale metadata or an elapsed staleness window. Deliberately excludes
    /// `max_pages` growth, which is its own signal (`is_expand`) with a distinct action —
    /// an incremental add, not a full refresh — per §4.10's action table.
    fn is_stale_refresh(&self, config: &Config, now_unix: i64) -> bool {
        let Some(meta) = &self.metadata else {
            return true;
        };
        if meta.version != CURRENT_INDEX_VERSION {
            return true;
        }
        if meta.embedding_model != config.embedding_model {
            return true;
        }
        let hours_elapsed = (now_unix - meta.last_update) as f64 / 3600.0;
        hours_elapsed >= config.update_check_interval_hours
    }

    pub fn is_expand(&self, config: &Config) -> bool {
        self.state
            .max_pages_limit
            .map(|prior| config.crawl.max_pages > prior)
            .unwrap_or(false)
    }

    pub fn is_resume(&self, config: &Config) -> bool {
        !self.state.indexed_urls.is_empty() && !config.force_rebuild
    }

    pub fn embedding_model_changed(&self, config: &Config) -> bool {
        self.metadata
            .as_ref()
            .map(|m| m.embedding_model != config.embedding_model)
            .unwrap_or(false)
    }

    /// Selects the pipeline mode per §4.10's signal table, highest-precedence first.
    pub fn pipeline_mode(&self, config: &Config, now_unix: i64, chunks_persisted: bool) -> PipelineMode {
        if config.force_rebuild {
            return PipelineMode::ForceRebuild;
        }
        if self.embedding_model_changed(config) && chunks_persisted {
            return PipelineMode::EmbeddingOnlyRebuild;
        }
        if config.force_refresh || self.is_stale_refresh(config, now_unix) {
            return PipelineMode::Refresh;
        }
        if self.is_resume(config) || self.is_expand(config) {
            return PipelineMode::ResumeOrExpand;
        }
        PipelineMode::Fresh
    }

    /// Discovery results are only ever cached when non-empty — an empty discovery is
    /// treated as a transient outage, not a fact about the site, and must not poison a
    /// later resumed run (§4.10 Phase 1).
    pub fn record_discovery(&mut self, discovered: &[String], max_pages: usize) {
        if discovered.is_empty() {
            return;
        }
        self.state.discovered_urls = discovered.iter().cloned().collect();
        self.state.max_pages_limit = Some(max_pages);
    }
}
