//! Atomic file persistence primitives shared by the page cache, chunk store, crawl state
//! store and vector index. Every write in the on-disk layout (§6) goes through
//! `write_atomic`: serialize to a temp file beside the target, then `fs::rename` over it,
//! so a crash mid-write never leaves a half-written file behind.

use std::fs;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// Writes `value` as pretty JSON to `path`, atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)
}

/// Reads and deserializes JSON from `path`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(read_json(path)?))
}

/// Writes raw bytes to `path` atomically: write to a sibling `.tmp` file, fsync-free
/// rename over the target. The temp file carries a process-unique suffix so concurrent
/// writers (page cache workers) never collide on the same temp path.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(format!(
        "tmp-{}-{}",
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn round_trips_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");
        write_json_atomic(&path, &Sample { n: 7 }).unwrap();
        let loaded: Sample = read_json(&path).unwrap();
        assert_eq!(loaded, Sample { n: 7 });
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let loaded: Option<Sample> = read_json_opt(&path).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn no_leftover_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_atomic(&path, &Sample { n: 1 }).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
