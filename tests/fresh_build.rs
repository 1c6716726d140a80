//! Scenario: fresh two-page build (§8). A brand-new cache directory, two manual pages
//! each with multiple sections, indexed in one pass — both pages show up as parents and
//! children in the chunk store, and search ranks results by descending score.

mod common;

use tempfile::tempdir;

use docrag::config::Config;
use docrag::engine::Engine;
use docrag::store::ChunkStore;

fn sectioned_page(title: &str, sections: &[(&str, &str)]) -> String {
    let mut body = format!("<h1>{title}</h1>");
    for (heading, paragraph) in sections {
        body.push_str(&format!("<h2>{heading}</h2><p>{paragraph}</p>"));
    }
    format!("<html><body><main>{body}</main></body></html>")
}

fn base_config(dir: &std::path::Path, base_url: &str) -> Config {
    let mut cfg = Config::default();
    cfg.cache_dir = dir.to_string_lossy().to_string();
    cfg.crawl.base_url = base_url.to_string();
    cfg.crawl.manual_urls_only = true;
    cfg.chunker.child_min_tokens = 5;
    cfg.chunker.child_max_tokens = 25;
    cfg
}

#[tokio::test]
async fn fresh_build_indexes_both_pages_and_ranks_search_results() {
    let server = common::StubServer::start().await;
    server.set_page(
        "/routing",
        sectioned_page(
            "Routing Guide",
            &[
                (
                    "Static routes",
                    "Static routes match an exact request path segment by segment without any wildcard expansion at all",
                ),
                (
                    "Dynamic routes",
                    "Dynamic routes capture a path segment into a named parameter that handlers can read back out later",
                ),
                (
                    "Fallback routes",
                    "A fallback route catches any request that no other registered route in the table was able to match",
                ),
            ],
        ),
    );
    server.set_page(
        "/caching",
        sectioned_page(
            "Caching Guide",
            &[
                (
                    "Read-through cache",
                    "A read-through cache fetches the underlying value on a miss and stores it before returning to the caller",
                ),
                (
                    "Write-back cache",
                    "A write-back cache buffers writes in memory and flushes them to the backing store on a later schedule",
                ),
                (
                    "Eviction",
                    "Eviction removes the least recently used entries once the cache grows past its configured capacity limit",
                ),
            ],
        ),
    );

    let dir = tempdir().unwrap();
    let mut cfg = base_config(dir.path(), &server.base_url());
    cfg.crawl.manual_urls = vec![server.url("/routing"), server.url("/caching")];

    let mut engine = Engine::open(cfg).unwrap();
    let report = engine.index().await.unwrap();

    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.pages_from_cache, 0);
    assert_eq!(report.pages_failed, 0);
    assert!(report.chunks_total >= 4, "expected multiple chunks per page, got {}", report.chunks_total);

    let store = ChunkStore::load(dir.path()).unwrap();
    let parent_count = store.children().map(|c| c.parent_id.clone()).collect::<std::collections::HashSet<_>>().len();
    assert!(parent_count >= 2, "expected at least one parent per page, got {parent_count}");

    let results = engine.search("read-through cache eviction", None, true);
    assert!(!results.is_empty());
    assert!(results.iter().any(|r| r.url.ends_with("/caching")));
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score, "results must be sorted by descending score");
    }
}
