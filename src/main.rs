//! CLI entrypoint. `docrag index` runs the four-phase indexing pipeline once against the
//! configured site; `docrag search` queries whatever index is currently persisted under
//! `cache_dir` (§6, §4.10, §4.11).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docrag::config::Config;
use docrag::engine::Engine;
use docrag::error::{EngineError, Result};

#[derive(Parser, Debug)]
#[command(name = "docrag")]
#[command(about = "Documentation-corpus retrieval engine: crawl, chunk, index, and query a docs site")]
struct Cli {
    /// Path to a TOML config file. Fields left unset fall back to `Config::default()`.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the four-phase indexing pipeline once (discover -> fetch -> chunk -> index build).
    Index {
        /// Discard all crawl state and persisted chunks, then rebuild from scratch.
        #[arg(long)]
        force_rebuild: bool,
        /// Force a refresh pass even if nothing looks stale.
        #[arg(long)]
        force_refresh: bool,
    },
    /// Query the persisted index and print ranked results.
    Search {
        query: String,
        /// Overrides `hybrid.search_top_k` for this query.
        #[arg(short, long)]
        top_k: Option<usize>,
        /// Attach each result's parent context.
        #[arg(long, default_value_t = true)]
        return_parent: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text)
        .map_err(|e| EngineError::Config(format!("invalid config at {}: {e}", path.display())))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let exit_code = match cli.command {
        Command::Index {
            force_rebuild,
            force_refresh,
        } => {
            config.force_rebuild = force_rebuild;
            config.force_refresh = force_refresh;
            run_index(config).await
        }
        Command::Search {
            query,
            top_k,
            return_parent,
        } => run_search(config, &query, top_k, return_parent),
    };

    std::process::exit(exit_code);
}

async fn run_index(config: Config) -> i32 {
    let mut engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "failed to open engine");
            return 1;
        }
    };

    match engine.index().await {
        Ok(report) => {
            tracing::info!(
                mode = ?report.mode,
                urls_discovered = report.urls_discovered,
                pages_fetched = report.pages_fetched,
                pages_from_cache = report.pages_from_cache,
                pages_failed = report.pages_failed,
                chunks_total = report.chunks_total,
                chunks_new = report.chunks_new,
                "indexing complete"
            );
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "indexing failed");
            1
        }
    }
}

fn run_search(config: Config, query: &str, top_k: Option<usize>, return_parent: bool) -> i32 {
    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "failed to open engine");
            return 1;
        }
    };

    let results = engine.search(query, top_k, return_parent);
    if results.is_empty() {
        println!("no results");
        return 0;
    }

    for (i, r) in results.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, r.score, r.url);
        if !r.heading_path.is_empty() {
            println!("   {}", r.heading_path.join(" > "));
        }
        println!("   {}", truncate_for_display(&r.text, 200));
        if let Some(parent) = &r.parent_text {
            println!("   parent: {}", truncate_for_display(parent, 200));
        }
        println!();
    }
    0
}

fn truncate_for_display(text: &str, max_chars: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
