//! Crawler (C1): URL discovery (manual/sitemap/recursive), robots enforcement, and polite
//! single-page fetch (§4.1).

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::config::CrawlConfig;
use crate::error::FetchFailure;
use crate::types::UrlRecord;

/// Strips query string, fragment, and trailing slash — two URLs that differ only in
/// those respects are the same record (§3).
pub fn normalize_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let trimmed = without_query.trim_end_matches('/');
    trimmed.to_string()
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Exclude wins; if includes are non-empty, the URL must match at least one (§4.1).
pub fn should_crawl_url(url: &str, includes: &[Regex], excludes: &[Regex]) -> bool {
    if excludes.iter().any(|re| re.is_match(url)) {
        return false;
    }
    if !includes.is_empty() {
        return includes.iter().any(|re| re.is_match(url));
    }
    true
}

/// One parsed sitemap XML document: either a leaf `<urlset>` of page URLs, or a
/// `<sitemapindex>` of further sitemap locations to recurse into (§4.1).
enum SitemapDocument {
    UrlSet(Vec<UrlRecord>),
    Index(Vec<String>),
}

fn child_text<'a>(node: roxmltree::Node<'a, 'a>, tag: &str) -> Option<String> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name().eq_ignore_ascii_case(tag))
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Parses one sitemap document (a `<urlset>` or a `<sitemapindex>`), filtering `<url>`
/// entries by the include/exclude regex sets and sorting newest-first by `<lastmod>` —
/// sub-sitemaps and page URLs both recurse/surface freshest content first (§4.1, §5).
/// Entries with no `<lastmod>` sort after every entry that has one. A malformed document
/// yields an empty `UrlSet` rather than propagating a parse error past the crawler.
fn parse_one_sitemap(xml: &str, includes: &[Regex], excludes: &[Regex]) -> SitemapDocument {
    let Ok(doc) = roxmltree::Document::parse(xml) else {
        return SitemapDocument::UrlSet(Vec::new());
    };
    let root = doc.root_element();

    if root.tag_name().name().eq_ignore_ascii_case("sitemapindex") {
        let mut subs: Vec<(String, Option<String>)> = root
            .children()
            .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("sitemap"))
            .filter_map(|node| {
                let loc = child_text(node, "loc")?;
                Some((loc, child_text(node, "lastmod")))
            })
            .collect();
        subs.sort_by(|a, b| b.1.cmp(&a.1));
        SitemapDocument::Index(subs.into_iter().map(|(loc, _)| loc).collect())
    } else {
        let mut urls: Vec<UrlRecord> = root
            .children()
            .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("url"))
            .filter_map(|node| {
                let loc = child_text(node, "loc")?;
                let normalized = normalize_url(&loc);
                if !should_crawl_url(&normalized, includes, excludes) {
                    return None;
                }
                Some(UrlRecord {
                    url: normalized,
                    lastmod: child_text(node, "lastmod"),
                })
            })
            .collect();
        urls.sort_by(|a, b| b.lastmod.cmp(&a.lastmod));
        SitemapDocument::UrlSet(urls)
    }
}

/// Minimal `robots.txt` parser: collects `Sitemap:` lines, and `Disallow`/`Allow` rules for
/// the `*` group and any group whose `User-agent` is a prefix of ours. `can_fetch` picks
/// the longest matching rule, ties broken in favor of `Allow`.
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    loaded: bool,
    rules: Vec<(String, bool)>, // (path prefix, is_allow)
    pub sitemaps: Vec<String>,
}

impl RobotsPolicy {
    pub fn unloaded() -> Self {
        Self::default()
    }

    pub fn parse(body: &str, user_agent: &str) -> Self {
        let mut sitemaps = Vec::new();
        let mut rules = Vec::new();
        let mut in_matching_group = false;
        let mut any_group_seen = false;
        let ua_lower = user_agent.to_lowercase();

        for raw_line in body.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim().to_string();

            match key.as_str() {
                "sitemap" => sitemaps.push(value),
                "user-agent" => {
                    let v = value.to_lowercase();
                    if any_group_seen && in_matching_group {
                        // A new group starting right after ours ends the match.
                    }
                    any_group_seen = true;
                    in_matching_group = v == "*" || ua_lower.contains(&v) || v.contains(&ua_lower);
                }
                "disallow" if in_matching_group && !value.is_empty() => rules.push((value, false)),
                "allow" if in_matching_group && !value.is_empty() => rules.push((value, true)),
                _ => {}
            }
        }

        Self {
            loaded: true,
            rules,
            sitemaps,
        }
    }

    /// If robots.txt failed to load, every fetch is allowed (logged by the caller).
    pub fn can_fetch(&self, path: &str) -> bool {
        if !self.loaded {
            return true;
        }
        let mut best: Option<(usize, bool)> = None;
        for (prefix, is_allow) in &self.rules {
            if path.starts_with(prefix.as_str()) {
                let len = prefix.len();
                match best {
                    Some((best_len, best_allow)) if len > best_len || (len == best_len && *is_allow && !best_allow) => {
                        best = Some((len, *is_allow));
                    }
                    None => best = Some((len, *is_allow)),
                    _ => {}
                }
            }
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

#[derive(Clone)]
pub struct Crawler {
    client: Client,
    config: CrawlConfig,
    pub robots: RobotsPolicy,
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl Crawler {
    pub fn new(config: CrawlConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(
                config.connect_timeout_secs + config.read_timeout_secs,
            ))
            .user_agent(config.user_agent.clone())
            .build()
            .expect("reqwest client builds with static config");
        let includes = compile_patterns(&config.url_include_patterns);
        let excludes = compile_patterns(&config.url_exclude_patterns);
        Self {
            client,
            config,
            robots: RobotsPolicy::unloaded(),
            includes,
            excludes,
        }
    }

    /// Fetches and parses `robots.txt` from `base_url`, and — for subdomains — also from
    /// the registrable parent domain (§4.1). A fetch failure leaves the policy unloaded,
    /// which `can_fetch` treats as "proceed without restriction".
    pub async fn load_robots(&mut self) {
        let base = self.config.base_url.trim_end_matches('/');
        if let Ok(parsed) = url::Url::parse(base) {
            let robots_url = format!(
                "{}://{}/robots.txt",
                parsed.scheme(),
                parsed.host_str().unwrap_or_default()
            );
            match self.client.get(&robots_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    if let Ok(body) = resp.text().await {
                        self.robots = RobotsPolicy::parse(&body, &self.config.user_agent);
                        tracing::info!(url = %robots_url, sitemaps = self.robots.sitemaps.len(), "loaded robots.txt");
                        return;
                    }
                }
                _ => {}
            }
            tracing::warn!(url = %robots_url, "failed to load robots.txt, proceeding without restrictions");
        }
        self.robots = RobotsPolicy::unloaded();
    }

    fn base_prefix(&self) -> String {
        self.config.base_url.trim_end_matches('/').to_string()
    }

    /// Top-level discovery entry point: manual URLs, then (unless `manual_urls_only`)
    /// sitemap discovery falling back to recursive BFS (§4.1).
    pub async fn discover(&self) -> Vec<UrlRecord> {
        let mut out: Vec<UrlRecord> = self
            .config
            .manual_urls
            .iter()
            .map(|u| UrlRecord {
                url: normalize_url(u),
                lastmod: None,
            })
            .collect();

        if self.config.manual_urls_only {
            if out.is_empty() {
                tracing::warn!("manual_urls_only set but manual_urls is empty; no-op");
            }
            return out;
        }

        let sitemap_urls = self.discover_via_sitemap().await;
        if !sitemap_urls.is_empty() {
            out.extend(sitemap_urls);
        } else {
            out.extend(self.recursive_crawl().await);
        }

        let mut seen = HashSet::new();
        out.retain(|r| seen.insert(r.url.clone()));
        if self.config.max_pages > 0 && out.len() > self.config.max_pages {
            out.truncate(self.config.max_pages);
        }
        out
    }

    /// Sitemap fetching is sequential by design (§4.1). Tries robots-declared sitemaps
    /// first, then the three common probe locations.
    async fn discover_via_sitemap(&self) -> Vec<UrlRecord> {
        let base = self.base_prefix();
        let mut candidates = self.robots.sitemaps.clone();
        candidates.push(format!("{base}/sitemap.xml"));
        candidates.push(format!("{base}/sitemap_index.xml"));
        candidates.push(format!("{base}/server-sitemap.xml"));

        for sitemap_url in candidates {
            if let Ok(resp) = self.client.get(&sitemap_url).send().await {
                if let Ok(body) = resp.text().await {
                    let urls = self.parse_sitemap_tree(&body).await;
                    if !urls.is_empty() {
                        return urls;
                    }
                }
            }
        }
        Vec::new()
    }

    /// Walks a sitemap index (and any nested sitemap indexes) iteratively with an
    /// explicit work queue — an `async fn` cannot call itself recursively without
    /// boxing every frame, so the index/sub-index traversal is unrolled into a loop
    /// instead of mutual recursion.
    async fn parse_sitemap_tree(&self, root_xml: &str) -> Vec<UrlRecord> {
        let mut queue: std::collections::VecDeque<String> = std::collections::VecDeque::new();
        let mut urls = match parse_one_sitemap(root_xml, &self.includes, &self.excludes) {
            SitemapDocument::UrlSet(urls) => return urls,
            SitemapDocument::Index(sub_sitemaps) => {
                queue.extend(sub_sitemaps);
                Vec::new()
            }
        };

        while let Some(sub_url) = queue.pop_front() {
            let Ok(resp) = self.client.get(&sub_url).send().await else {
                continue;
            };
            let Ok(body) = resp.text().await else {
                continue;
            };
            match parse_one_sitemap(&body, &self.includes, &self.excludes) {
                SitemapDocument::UrlSet(mut found) => urls.append(&mut found),
                SitemapDocument::Index(mut sub_sitemaps) => {
                    for s in sub_sitemaps.drain(..) {
                        queue.push_back(s);
                    }
                }
            }
        }
        urls
    }

    /// BFS from `base_url`, only following links under the base prefix, skipping
    /// `mailto:`/`tel:`/fragment/`javascript:` links (§4.1).
    async fn recursive_crawl(&self) -> Vec<UrlRecord> {
        let base = self.base_prefix();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((base.clone(), 0));
        let mut out = Vec::new();
        let link_selector = Selector::parse("a[href]").unwrap();

        while let Some((current, depth)) = queue.pop_front() {
            if visited.contains(&current) || depth > self.config.max_crawl_depth {
                continue;
            }
            if self.config.max_pages > 0 && out.len() >= self.config.max_pages {
                break;
            }
            if !should_crawl_url(&current, &self.includes, &self.excludes) {
                continue;
            }
            visited.insert(current.clone());

            tokio::time::sleep(Duration::from_millis(self.config.rate_limit_delay_ms)).await;
            let Ok(resp) = self.client.get(&current).send().await else {
                continue;
            };
            let is_html = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|ct| ct.contains("text/html"))
                .unwrap_or(false);
            let Ok(body) = resp.text().await else {
                continue;
            };
            if !is_html {
                continue;
            }
            out.push(UrlRecord {
                url: current.clone(),
                lastmod: None,
            });

            let document = Html::parse_document(&body);
            for link in document.select(&link_selector) {
                let Some(href) = link.value().attr("href") else {
                    continue;
                };
                if href.starts_with("mailto:")
                    || href.starts_with("tel:")
                    || href.starts_with('#')
                    || href.starts_with("javascript:")
                {
                    continue;
                }
                let absolute = if let Ok(joined) = url::Url::parse(&current).and_then(|b| b.join(href)) {
                    joined.to_string()
                } else {
                    continue;
                };
                if !absolute.starts_with(&base) {
                    continue;
                }
                let normalized = normalize_url(&absolute);
                if !visited.contains(&normalized) {
                    queue.push_back((normalized, depth + 1));
                }
            }
        }
        out
    }

    /// Polite single-page fetch: robots check, HTML content-type check, off-domain
    /// redirect check (§4.1). Returns `FetchFailure` on any rejection — never throws.
    pub async fn fetch_page(&self, url: &str) -> Result<String, FetchFailure> {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        if !self.robots.can_fetch(&path) {
            return Err(FetchFailure::RobotsDenied);
        }

        tokio::time::sleep(Duration::from_millis(self.config.rate_limit_delay_ms)).await;

        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchFailure::Timeout
            } else {
                FetchFailure::Connection
            }
        })?;

        let final_url = resp.url().to_string();
        if !final_url.starts_with(&self.base_prefix()) {
            return Err(FetchFailure::ExternalRedirect);
        }

        if !resp.status().is_success() {
            return Err(FetchFailure::HttpStatus(resp.status().as_u16()));
        }

        let is_html = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);
        if !is_html {
            return Err(FetchFailure::NonHtml);
        }

        resp.text().await.map_err(|_| FetchFailure::Connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_query_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://x/a/?ref=1#section"),
            "https://x/a"
        );
    }

    #[test]
    fn parses_urlset_and_extracts_lastmod() {
        let xml = r#"<?xml version="1.0"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <url><loc>https://x/a</loc><lastmod>2024-01-01</lastmod></url>
                <url><loc>https://x/b</loc><lastmod>2024-03-01</lastmod></url>
                <url><loc>https://x/c</loc></url>
            </urlset>"#;
        let doc = parse_one_sitemap(xml, &[], &[]);
        let SitemapDocument::UrlSet(urls) = doc else {
            panic!("expected a urlset")
        };
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[0].url, "https://x/b");
        assert_eq!(urls[0].lastmod.as_deref(), Some("2024-03-01"));
        assert_eq!(urls[1].url, "https://x/a");
        assert_eq!(urls[2].url, "https://x/c");
        assert_eq!(urls[2].lastmod, None);
    }

    #[test]
    fn parses_sitemap_index_newest_first() {
        let xml = r#"<?xml version="1.0"?>
            <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <sitemap><loc>https://x/old.xml</loc><lastmod>2023-01-01</lastmod></sitemap>
                <sitemap><loc>https://x/new.xml</loc><lastmod>2024-06-01</lastmod></sitemap>
                <sitemap><loc>https://x/unknown.xml</loc></sitemap>
            </sitemapindex>"#;
        let doc = parse_one_sitemap(xml, &[], &[]);
        let SitemapDocument::Index(subs) = doc else {
            panic!("expected a sitemap index")
        };
        assert_eq!(
            subs,
            vec![
                "https://x/new.xml".to_string(),
                "https://x/old.xml".to_string(),
                "https://x/unknown.xml".to_string(),
            ]
        );
    }

    #[test]
    fn urlset_entries_filtered_by_exclude() {
        let xml = r#"<?xml version="1.0"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <url><loc>https://x/docs/a</loc></url>
                <url><loc>https://x/private/b</loc></url>
            </urlset>"#;
        let excludes = compile_patterns(&["/private".to_string()]);
        let doc = parse_one_sitemap(xml, &[], &excludes);
        let SitemapDocument::UrlSet(urls) = doc else {
            panic!("expected a urlset")
        };
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].url, "https://x/docs/a");
    }

    #[test]
    fn malformed_xml_yields_empty_urlset() {
        let doc = parse_one_sitemap("not xml at all <<<", &[], &[]);
        let SitemapDocument::UrlSet(urls) = doc else {
            panic!("expected a urlset")
        };
        assert!(urls.is_empty());
    }

    #[test]
    fn include_patterns_require_a_match() {
        let includes = compile_patterns(&["^https://x/docs".to_string()]);
        let excludes = vec![];
        assert!(should_crawl_url("https://x/docs/a", &includes, &excludes));
        assert!(!should_crawl_url("https://x/blog/a", &includes, &excludes));
    }

    #[test]
    fn exclude_wins_over_include() {
        let includes = compile_patterns(&["^https://x".to_string()]);
        let excludes = compile_patterns(&["/private".to_string()]);
        assert!(!should_crawl_url(
            "https://x/private/a",
            &includes,
            &excludes
        ));
    }

    #[test]
    fn robots_disallow_blocks_matching_path() {
        let body = "User-agent: *\nDisallow: /admin\nSitemap: https://x/sitemap.xml\n";
        let policy = RobotsPolicy::parse(body, "docrag/0.1");
        assert!(!policy.can_fetch("/admin/secret"));
        assert!(policy.can_fetch("/docs/a"));
        assert_eq!(policy.sitemaps, vec!["https://x/sitemap.xml".to_string()]);
    }

    #[test]
    fn longer_allow_overrides_shorter_disallow() {
        let body = "User-agent: *\nDisallow: /docs\nAllow: /docs/public\n";
        let policy = RobotsPolicy::parse(body, "docrag/0.1");
        assert!(policy.can_fetch("/docs/public/a"));
        assert!(!policy.can_fetch("/docs/private"));
    }

    #[test]
    fn unloaded_policy_allows_everything() {
        let policy = RobotsPolicy::unloaded();
        assert!(policy.can_fetch("/anything"));
    }
}
