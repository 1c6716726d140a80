//! Content-addressed page cache (C4): raw fetched HTML keyed by `sha256(url)[:32]`, with
//! TTL/lastmod invalidation (§4.4).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::persistence::{read_json_opt, write_json_atomic};
use crate::types::Page;

pub fn page_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(digest)[..32].to_string()
}

pub struct PageCache {
    dir: PathBuf,
}

impl PageCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: cache_dir.into().join("pages"),
        }
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", page_key(url)))
    }

    pub fn get(&self, url: &str) -> Result<Option<Page>> {
        read_json_opt(&self.path_for(url))
    }

    pub fn put(&self, page: &Page) -> Result<()> {
        write_json_atomic(&self.path_for(&page.url), page)
    }

    /// Decides cache validity per the invalidation order in §4.4: force-refresh always
    /// misses; a changed sitemap `lastmod` always misses; otherwise TTL governs (0 = never
    /// expire); with no lastmod and no TTL the cached entry is always valid.
    pub fn is_valid(
        cached: &Page,
        sitemap_lastmod: Option<&str>,
        ttl_hours: f64,
        now_unix: i64,
        force_refresh: bool,
    ) -> bool {
        if force_refresh {
            return false;
        }
        if let Some(lastmod) = sitemap_lastmod {
            if cached.lastmod.as_deref() != Some(lastmod) {
                return false;
            }
            return true;
        }
        if ttl_hours > 0.0 {
            let age_hours = (now_unix - cached.cached_at) as f64 / 3600.0;
            return age_hours < ttl_hours;
        }
        true
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn page(url: &str, cached_at: i64, lastmod: Option<&str>) -> Page {
        Page {
            url: url.to_string(),
            html: "<html></html>".to_string(),
            lastmod: lastmod.map(str::to_string),
            cached_at,
            from_cache: false,
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let cache = PageCache::new(dir.path());
        let p = page("https://x/a", 1000, None);
        cache.put(&p).unwrap();
        let loaded = cache.get("https://x/a").unwrap().unwrap();
        assert_eq!(loaded.url, "https://x/a");
        assert_eq!(loaded.cached_at, 1000);
    }

    #[test]
    fn miss_is_none() {
        let dir = tempdir().unwrap();
        let cache = PageCache::new(dir.path());
        assert!(cache.get("https://x/missing").unwrap().is_none());
    }

    #[test]
    fn force_refresh_always_invalidates() {
        let p = page("https://x/a", 0, None);
        assert!(!PageCache::is_valid(&p, None, 0.0, 0, true));
    }

    #[test]
    fn lastmod_mismatch_invalidates() {
        let p = page("https://x/a", 0, Some("2024-01-01"));
        assert!(!PageCache::is_valid(&p, Some("2024-02-01"), 0.0, 0, false));
    }

    #[test]
    fn lastmod_match_is_valid_regardless_of_ttl() {
        let p = page("https://x/a", 0, Some("2024-01-01"));
        assert!(PageCache::is_valid(
            &p,
            Some("2024-01-01"),
            1.0,
            1_000_000,
            false
        ));
    }

    #[test]
    fn ttl_expires_without_lastmod() {
        let p = page("https://x/a", 0, None);
        let one_hour_secs = 3600;
        assert!(!PageCache::is_valid(&p, None, 1.0, one_hour_secs + 1, false));
    }

    #[test]
    fn ttl_zero_never_expires() {
        let p = page("https://x/a", 0, None);
        assert!(PageCache::is_valid(&p, None, 0.0, 1_000_000_000, false));
    }

    #[test]
    fn page_key_is_stable_and_bounded() {
        let k1 = page_key("https://x/a");
        let k2 = page_key("https://x/a");
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 32);
    }
}
