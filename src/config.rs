use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Tuning knobs for the two-level parent/child chunker (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub child_min_tokens: usize,
    pub child_max_tokens: usize,
    /// Explicit floor for a parent region. If `None`, derived as `parent_max_tokens / 3`.
    pub parent_min_tokens: Option<usize>,
    pub parent_max_tokens: usize,
    pub absolute_max_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            child_min_tokens: 150,
            child_max_tokens: 400,
            parent_min_tokens: None,
            parent_max_tokens: 1200,
            absolute_max_tokens: 4000,
        }
    }
}

impl ChunkerConfig {
    /// Resolves `parent_min_tokens`, deriving it from `parent_max_tokens / 3` when unset.
    /// Two upstream variants of this default were observed; this crate always exposes the
    /// knob explicitly and only derives when the caller left it `None`.
    pub fn parent_min(&self) -> usize {
        self.parent_min_tokens
            .unwrap_or(self.parent_max_tokens / 3)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub base_url: String,
    pub manual_urls: Vec<String>,
    pub manual_urls_only: bool,
    pub max_crawl_depth: usize,
    pub max_pages: usize,
    pub max_workers: usize,
    pub rate_limit_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_url_retries: u32,
    pub user_agent: String,
    pub url_include_patterns: Vec<String>,
    pub url_exclude_patterns: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            manual_urls: Vec::new(),
            manual_urls_only: false,
            max_crawl_depth: 5,
            max_pages: 500,
            max_workers: 8,
            rate_limit_delay_ms: 250,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            max_url_retries: 3,
            user_agent: "docrag/0.1 (+https://github.com; documentation indexer bot)".to_string(),
            url_include_patterns: Vec::new(),
            url_exclude_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub bm25_weight: f32,
    pub semantic_weight: f32,
    pub search_top_k: usize,
    pub retriever_candidate_multiplier: usize,
    pub rerank_enabled: bool,
    pub parent_context_max_chars: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            bm25_weight: 0.3,
            semantic_weight: 0.7,
            search_top_k: 10,
            retriever_candidate_multiplier: 4,
            rerank_enabled: true,
            parent_context_max_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub chunker: ChunkerConfig,
    pub hybrid: HybridConfig,
    pub embedding_model: String,
    pub rerank_model: String,
    pub update_check_interval_hours: f64,
    pub page_cache_ttl_hours: f64,
    pub contextual_retrieval_enabled: bool,
    pub contextual_retrieval_background: bool,
    pub cache_dir: String,
    pub force_refresh: bool,
    pub force_rebuild: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawl: CrawlConfig::default(),
            chunker: ChunkerConfig::default(),
            hybrid: HybridConfig::default(),
            embedding_model: "glove-docrag-300d".to_string(),
            rerank_model: "cross-encoder-docrag".to_string(),
            update_check_interval_hours: 24.0,
            page_cache_ttl_hours: 168.0,
            contextual_retrieval_enabled: false,
            contextual_retrieval_background: false,
            cache_dir: "./data".to_string(),
            force_refresh: false,
            force_rebuild: false,
        }
    }
}

impl Config {
    /// Fails fast: constructing a `Config` with invalid hybrid weights or an empty scope
    /// is a programmer error, not a runtime condition to swallow at a phase boundary.
    pub fn validate(&self) -> Result<()> {
        let sum = self.hybrid.bm25_weight + self.hybrid.semantic_weight;
        if (sum - 1.0).abs() > 0.01 {
            return Err(EngineError::Config(format!(
                "hybrid weights must sum to 1.0 (±0.01), got bm25={} + semantic={} = {sum}",
                self.hybrid.bm25_weight, self.hybrid.semantic_weight
            )));
        }
        if self.crawl.base_url.is_empty() && self.crawl.manual_urls.is_empty() {
            return Err(EngineError::Config(
                "either crawl.base_url or crawl.manual_urls must be set".to_string(),
            ));
        }
        if self.chunker.child_max_tokens > self.chunker.absolute_max_tokens
            || self.chunker.parent_max_tokens > self.chunker.absolute_max_tokens
        {
            return Err(EngineError::Config(
                "child_max_tokens and parent_max_tokens must not exceed absolute_max_tokens"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_are_valid() {
        let mut cfg = Config::default();
        cfg.crawl.base_url = "https://example.com".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let mut cfg = Config::default();
        cfg.crawl.base_url = "https://example.com".to_string();
        cfg.hybrid.bm25_weight = 0.4;
        cfg.hybrid.semantic_weight = 0.7;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn equal_weights_are_valid() {
        let mut cfg = Config::default();
        cfg.crawl.base_url = "https://example.com".to_string();
        cfg.hybrid.bm25_weight = 0.5;
        cfg.hybrid.semantic_weight = 0.5;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parent_min_derives_from_parent_max() {
        let cfg = ChunkerConfig {
            parent_min_tokens: None,
            parent_max_tokens: 900,
            ..ChunkerConfig::default()
        };
        assert_eq!(cfg.parent_min(), 300);
    }

    #[test]
    fn parent_min_explicit_wins() {
        let cfg = ChunkerConfig {
            parent_min_tokens: Some(50),
            parent_max_tokens: 900,
            ..ChunkerConfig::default()
        };
        assert_eq!(cfg.parent_min(), 50);
    }

    #[test]
    fn requires_scope() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }
}
