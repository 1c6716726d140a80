//! Scenario: embedding-model swap (§8). Changing `embedding_model` with chunks already
//! persisted triggers an embedding-only rebuild: every chunk is re-embedded from the
//! chunk store already on disk, with no network activity, and the persisted metadata and
//! vector index reflect the new model (§4.5, §4.10).

mod common;

use tempfile::tempdir;

use docrag::config::Config;
use docrag::engine::Engine;
use docrag::state::CrawlStateStore;
use docrag::vector_index::VectorIndex;

fn base_config(dir: &std::path::Path, base_url: &str) -> Config {
    let mut cfg = Config::default();
    cfg.cache_dir = dir.to_string_lossy().to_string();
    cfg.crawl.base_url = base_url.to_string();
    cfg.crawl.manual_urls_only = true;
    cfg.chunker.child_min_tokens = 5;
    cfg.embedding_model = "hashing-v1".to_string();
    cfg
}

#[tokio::test]
async fn embedding_model_change_rebuilds_vectors_without_refetching() {
    let server = common::StubServer::start().await;
    server.set_page("/doc", common::doc_html("Guide", "replication"));

    let dir = tempdir().unwrap();
    let mut cfg = base_config(dir.path(), &server.base_url());
    cfg.crawl.manual_urls = vec![server.url("/doc")];

    let mut engine = Engine::open(cfg.clone()).unwrap();
    let report1 = engine.index().await.unwrap();
    assert_eq!(report1.pages_fetched, 1);
    let chunks_before = report1.chunks_total;
    assert_eq!(VectorIndex::load(dir.path()).unwrap().model_id(), "hashing-v1");
    drop(engine);

    let mut cfg2 = cfg;
    cfg2.embedding_model = "hashing-v2".to_string();
    let mut engine = Engine::open(cfg2).unwrap();
    let report2 = engine.index().await.unwrap();

    assert_eq!(report2.pages_fetched, 0, "an embedding-model swap must not refetch any page");
    assert_eq!(report2.pages_from_cache, 1);
    assert_eq!(report2.chunks_total, chunks_before, "the chunk set itself is untouched by a model swap");

    let reloaded = VectorIndex::load(dir.path()).unwrap();
    assert_eq!(reloaded.model_id(), "hashing-v2");
    assert_eq!(reloaded.len(), chunks_before);

    let state = CrawlStateStore::load(dir.path()).unwrap();
    assert_eq!(state.metadata.unwrap().embedding_model, "hashing-v2");

    assert!(!engine.search("replication", None, true).is_empty());
}
