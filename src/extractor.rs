//! Content Extractor (C2): readability-style main-content extraction with a fallback
//! chain tuned to preserve code blocks (§4.2).

use scraper::{Html, Selector};

use crate::error::Result;

const MIN_EXTRACTED_BYTES: usize = 100;
const CODE_PRESERVATION_RATIO: f64 = 0.5;

pub struct Extracted {
    pub html: String,
    pub text: String,
}

fn count_code_tokens(document: &Html) -> usize {
    let pre = Selector::parse("pre").unwrap();
    let code = Selector::parse("code").unwrap();
    document.select(&pre).count() + document.select(&code).count()
}

fn inner_html(element: scraper::ElementRef) -> String {
    element.html()
}

fn text_of(document: &Html) -> String {
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Readability-style heuristic: picks the element with the highest ratio of direct text
/// to markup among a short list of common content containers, falling back to `<body>`.
fn readability_candidate(document: &Html) -> Option<scraper::ElementRef<'_>> {
    let candidates = [
        "main",
        "article",
        "[role='main']",
        "#content",
        ".content",
        ".markdown-body",
        "body",
    ];
    for selector_str in candidates {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(el) = document.select(&selector).next() {
                let text_len = el.text().collect::<Vec<_>>().join(" ").len();
                if text_len >= MIN_EXTRACTED_BYTES {
                    return Some(el);
                }
            }
        }
    }
    None
}

fn fallback_candidate<'a>(document: &'a Html) -> Option<scraper::ElementRef<'a>> {
    let fallbacks = ["div[class*='mdxContent']", "article", "main"];
    for selector_str in fallbacks {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(el) = document.select(&selector).next() {
                return Some(el);
            }
        }
    }
    None
}

/// Extracts main content from `html`. Validates the readability candidate against two
/// checks (emptiness, code-block preservation); on failure, walks the fallback chain;
/// if nothing in the chain qualifies, the original HTML is kept verbatim.
pub fn extract(html: &str, url: &str) -> Result<Extracted> {
    let document = Html::parse_document(html);
    let original_code_tokens = count_code_tokens(&document);

    if let Some(candidate) = readability_candidate(&document) {
        let candidate_html = inner_html(candidate);
        let candidate_doc = Html::parse_fragment(&candidate_html);
        let candidate_text = text_of(&candidate_doc);
        let candidate_code_tokens = count_code_tokens(&candidate_doc);

        let passes_emptiness = candidate_text.len() >= MIN_EXTRACTED_BYTES;
        let passes_code_preservation = original_code_tokens == 0
            || (candidate_code_tokens as f64) >= (original_code_tokens as f64) * CODE_PRESERVATION_RATIO;

        if passes_emptiness && passes_code_preservation {
            return Ok(Extracted {
                html: candidate_html,
                text: candidate_text,
            });
        }
        tracing::debug!(
            url,
            passes_emptiness,
            passes_code_preservation,
            "readability candidate rejected, falling back"
        );
    }

    if let Some(fallback) = fallback_candidate(&document) {
        let fallback_html = inner_html(fallback);
        let fallback_doc = Html::parse_fragment(&fallback_html);
        let fallback_text = text_of(&fallback_doc);
        if !fallback_text.is_empty() {
            return Ok(Extracted {
                html: fallback_html,
                text: fallback_text,
            });
        }
    }

    // No semantic fallback qualified: keep the original HTML verbatim rather than fail
    // the page outright (§4.2) — ExtractError never propagates past this function.
    tracing::debug!(url, "no extraction candidate qualified, keeping original HTML");
    let text = text_of(&document);
    Ok(Extracted {
        html: html.to_string(),
        text,
    })
}
