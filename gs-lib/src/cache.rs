//! On-disk cache for fetched manifests and chunk bytes.
//!
//! Layout under the cache root:
//!
//! ```text
//! manifests/{station}/{date}.json
//! chunks/{key-as-path}
//! index.json
//! ```
//!
//! `index.json` lists cached chunks with retrieval timestamps and is
//! updated atomically (write temp file, rename) so a crash never leaves a
//! corrupt index.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::warn;

use crate::error::StoreError;
use crate::paths::key_to_rel_path;

#[derive(Clone, Debug)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self, station: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join("manifests")
            .join(station)
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn chunk_path(&self, key: &str) -> PathBuf {
        self.root.join("chunks").join(key_to_rel_path(key))
    }

    pub fn load_manifest_bytes(&self, station: &str, date: NaiveDate) -> Option<Vec<u8>> {
        fs::read(self.manifest_path(station, date)).ok()
    }

    pub fn save_manifest_bytes(
        &self,
        station: &str,
        date: NaiveDate,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let path = self.manifest_path(station, date);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_chunk(&self, key: &str) -> Option<Vec<u8>> {
        fs::read(self.chunk_path(key)).ok()
    }

    /// Save chunk bytes and record the key in the index. An index update
    /// failure is logged, not propagated; the chunk itself is cached.
    pub fn save_chunk(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.chunk_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        if let Err(e) = self.update_index(key, bytes.len()) {
            warn!("chunk cached but index update failed: {e}");
        }
        Ok(())
    }

    /// Read and parse the index, falling back gracefully on errors.
    fn read_index(&self) -> serde_json::Value {
        let index_path = self.root.join("index.json");
        let tmp_path = self.root.join("index.json.tmp");

        // Try the main index first, then the tmp fallback (in case a
        // rename didn't complete).
        for path in [&index_path, &tmp_path] {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(val) = serde_json::from_str::<serde_json::Value>(&content) {
                    if val["chunks"].is_array() {
                        return val;
                    }
                }
            }
        }
        serde_json::json!({ "version": 1, "chunks": [] })
    }

    fn update_index(&self, key: &str, byte_len: usize) -> Result<(), StoreError> {
        let index_path = self.root.join("index.json");
        let tmp_path = self.root.join("index.json.tmp");

        let mut index = self.read_index();
        let chunks = index["chunks"]
            .as_array_mut()
            .expect("read_index guarantees an array");

        if chunks.iter().any(|c| c["key"].as_str() == Some(key)) {
            return Ok(());
        }
        chunks.push(serde_json::json!({
            "key": key,
            "bytes": byte_len,
            "retrieved": chrono::Utc::now().to_rfc3339(),
        }));

        let json_str = serde_json::to_string_pretty(&index)
            .map_err(|e| StoreError::ManifestMalformed(format!("index serialize: {e}")))?;
        fs::create_dir_all(&self.root)?;
        fs::write(&tmp_path, format!("{json_str}\n"))?;
        fs::rename(&tmp_path, &index_path)?;
        Ok(())
    }

    /// Number of chunks recorded in the index.
    pub fn indexed_chunks(&self) -> usize {
        self.read_index()["chunks"]
            .as_array()
            .map(|a| a.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(name: &str) -> DiskCache {
        let dir = std::env::temp_dir().join(format!("gs-lib-cache-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        DiskCache::new(dir)
    }

    #[test]
    fn chunk_round_trip_updates_index() {
        let cache = temp_cache("round-trip");
        let key = "ANMO/2025-11-06/10m/00-00-00.bin";

        assert!(cache.load_chunk(key).is_none());
        cache.save_chunk(key, b"payload").unwrap();
        assert_eq!(cache.load_chunk(key).as_deref(), Some(&b"payload"[..]));
        assert_eq!(cache.indexed_chunks(), 1);

        // Re-saving the same key does not duplicate the index entry.
        cache.save_chunk(key, b"payload").unwrap();
        assert_eq!(cache.indexed_chunks(), 1);

        let _ = fs::remove_dir_all(cache.root());
    }

    #[test]
    fn manifest_round_trip() {
        let cache = temp_cache("manifest");
        let date = NaiveDate::from_ymd_opt(2025, 11, 6).unwrap();

        assert!(cache.load_manifest_bytes("ANMO", date).is_none());
        cache.save_manifest_bytes("ANMO", date, b"{}").unwrap();
        assert_eq!(cache.load_manifest_bytes("ANMO", date).as_deref(), Some(&b"{}"[..]));

        let _ = fs::remove_dir_all(cache.root());
    }

    #[test]
    fn corrupt_index_starts_fresh() {
        let cache = temp_cache("corrupt");
        fs::create_dir_all(cache.root()).unwrap();
        fs::write(cache.root().join("index.json"), b"not json").unwrap();

        cache.save_chunk("k.bin", b"x").unwrap();
        assert_eq!(cache.indexed_chunks(), 1);

        let _ = fs::remove_dir_all(cache.root());
    }
}
