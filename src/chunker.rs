//! Semantic Chunker (C3): builds a two-level parent/child chunk tree from HTML structure,
//! anchored on headings/lists/code blocks/tables, honoring the token budgets in §4.3.

use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};

use crate::config::ChunkerConfig;
use crate::tokenizer::{count_tokens, truncate_to_tokens};
use crate::types::{ChildChunk, ChunkMetadata, ChunkedPage, ParentChunk};

/// One structural unit pulled out of the DOM in document order, with the heading path
/// active at the point it was encountered.
#[derive(Debug, Clone)]
struct Block {
    heading_path: Vec<String>,
    content: String,
}

const HEADING_TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];
const BLOCK_TAGS: [&str; 8] = ["p", "pre", "ul", "ol", "table", "blockquote", "dl", "figure"];

fn element_text(el: ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// Walks the DOM in document order, emitting one `Block` per heading and per content
/// element, tagging each with the heading path active at that point. Nested block tags
/// (e.g. a `<pre>` inside a `<div>`) are matched once via descendant traversal; we skip
/// descending further into an already-matched block to avoid re-emitting its contents.
fn walk_blocks(document: &Html) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut heading_path: Vec<String> = Vec::new();
    let root = document.root_element();

    for node in root.descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let tag = el.value().name();
        if HEADING_TAGS.contains(&tag) {
            let level = tag[1..].parse::<usize>().unwrap_or(1);
            let text = element_text(el);
            if text.is_empty() {
                continue;
            }
            heading_path.truncate(level.saturating_sub(1));
            heading_path.push(text.clone());
            blocks.push(Block {
                heading_path: heading_path.clone(),
                content: text,
            });
        } else if BLOCK_TAGS.contains(&tag) {
            // Skip if an ancestor is also a matched block tag, to avoid double-emission.
            let has_block_ancestor = el
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| BLOCK_TAGS.contains(&a.value().name()));
            if has_block_ancestor {
                continue;
            }
            let text = element_text(el);
            if text.is_empty() {
                continue;
            }
            blocks.push(Block {
                heading_path: heading_path.clone(),
                content: text,
            });
        }
    }
    blocks
}

/// Deterministic chunk ID: a function of (url, position, content hash), stable across
/// re-chunks of identical content (§4.3 point 5).
fn chunk_id(url: &str, position: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(position.to_le_bytes());
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())[..24].to_string()
}

/// Greedily packs blocks into groups bounded by `[min, max]` tokens, forcibly splitting
/// (mid-structure, i.e. mid-block-list) anything that would exceed `absolute_max`. Used
/// both for parent grouping and, recursively, child grouping within a parent.
fn pack_blocks(blocks: &[Block], min: usize, max: usize, absolute_max: usize) -> Vec<Vec<Block>> {
    let mut groups: Vec<Vec<Block>> = Vec::new();
    let mut current: Vec<Block> = Vec::new();
    let mut current_tokens = 0usize;

    for block in blocks {
        let block_tokens = count_tokens(&block.content);

        if block_tokens > absolute_max {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            // Force-split an oversized single block by token count.
            let words: Vec<&str> = block.content.split_whitespace().collect();
            for chunk_words in words.chunks(absolute_max.max(1)) {
                groups.push(vec![Block {
                    heading_path: block.heading_path.clone(),
                    content: chunk_words.join(" "),
                }]);
            }
            continue;
        }

        if current_tokens + block_tokens > max && current_tokens >= min && !current.is_empty() {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }

        current_tokens += block_tokens;
        current.push(block.clone());

        if current_tokens >= max {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn group_text(group: &[Block]) -> String {
    group
        .iter()
        .map(|b| b.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn group_heading_path(group: &[Block]) -> Vec<String> {
    group
        .last()
        .map(|b| b.heading_path.clone())
        .unwrap_or_default()
}

/// Chunks one page's extracted HTML into the parent/child tree described by §4.3.
pub fn chunk_page(
    url: &str,
    lastmod: Option<&str>,
    html: &str,
    config: &ChunkerConfig,
) -> ChunkedPage {
    let document = Html::parse_fragment(html);
    let blocks = walk_blocks(&document);

    if blocks.is_empty() {
        return ChunkedPage::default();
    }

    let parent_min = config.parent_min();
    let parent_groups = pack_blocks(
        &blocks,
        parent_min,
        config.parent_max_tokens,
        config.absolute_max_tokens,
    );

    let mut children = Vec::new();
    let mut parents = Vec::new();
    let mut position = 0usize;

    for parent_group in parent_groups {
        let parent_text = group_text(&parent_group);
        let parent_heading = group_heading_path(&parent_group);
        let parent_token_count = count_tokens(&parent_text);
        let parent_pos = position;
        let parent_id = chunk_id(url, parent_pos, &parent_text);
        position += 1;

        let child_groups = pack_blocks(
            &parent_group,
            config.child_min_tokens,
            config.child_max_tokens,
            config.absolute_max_tokens,
        );

        let mut any_child_met_min = false;
        let mut built_children = Vec::new();
        for child_group in &child_groups {
            let child_text = group_text(child_group);
            let child_tokens = count_tokens(&child_text);
            if child_tokens < config.child_min_tokens {
                continue;
            }
            any_child_met_min = true;
            let heading_path = group_heading_path(child_group);
            let child_pos = position;
            let cid = chunk_id(url, child_pos, &child_text);
            position += 1;
            built_children.push(ChildChunk {
                chunk_id: cid,
                parent_id: parent_id.clone(),
                content: child_text.clone(),
                original_content: None,
                url: url.to_string(),
                lastmod: lastmod.map(str::to_string),
                heading_path_joined: heading_path.join(" > "),
                heading_path,
                token_count: child_tokens,
                metadata: ChunkMetadata {
                    source_url: url.to_string(),
                    position: child_pos,
                    token_count: child_tokens,
                    extra: Default::default(),
                },
                is_parent_as_child: false,
            });
        }

        parents.push(ParentChunk {
            chunk_id: parent_id.clone(),
            content: parent_text.clone(),
            metadata: ChunkMetadata {
                source_url: url.to_string(),
                position: parent_pos,
                token_count: parent_token_count,
                extra: Default::default(),
            },
            url: url.to_string(),
            lastmod: lastmod.map(str::to_string),
        });

        if any_child_met_min {
            children.extend(built_children);
        } else {
            // No subdivision met child_min: promote the parent straight into the
            // searchable set as a parent-as-child (§4.3 point 4, invariant #2).
            children.push(ChildChunk {
                chunk_id: parent_id.clone(),
                parent_id: parent_id.clone(),
                content: parent_text.clone(),
                original_content: None,
                url: url.to_string(),
                lastmod: lastmod.map(str::to_string),
                heading_path_joined: parent_heading.join(" > "),
                heading_path: parent_heading,
                token_count: parent_token_count,
                metadata: ChunkMetadata {
                    source_url: url.to_string(),
                    position: parent_pos,
                    token_count: parent_token_count,
                    extra: Default::default(),
                },
                is_parent_as_child: true,
            });
        }
    }

    ChunkedPage { children, parents }
}

/// Truncates parent text for attachment to a query result (§4.11); `max_chars = 0` means
/// unlimited. Uses the same tokenizer as chunking so truncation stays word-aligned.
pub fn truncate_parent_context(parent_text: &str, max_chars: usize) -> String {
    if max_chars == 0 || parent_text.len() <= max_chars {
        return parent_text.to_string();
    }
    // Binary-search-free approximation: truncate by tokens until under the char budget.
    let mut tokens_budget = count_tokens(parent_text);
    loop {
        let candidate = truncate_to_tokens(parent_text, tokens_budget);
        if candidate.len() <= max_chars || tokens_budget == 0 {
            return candidate;
        }
        tokens_budget = tokens_budget.saturating_sub(1).max(tokens_budget / 2);
        if tokens_budget == 0 {
            return candidate.chars().take(max_chars).collect();
        }
    }
}
