//! Cache storage for fetched assets.

use super::Asset;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// A cached asset and the instant it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub asset: Asset,
    pub created_at: Instant,
}

/// Path-keyed storage behind [`super::AssetCache`].
///
/// Implementations must be safe for concurrent use; each call is a single
/// atomic operation on the mapping.
pub trait AssetStore: Send + Sync {
    fn get(&self, path: &str) -> Option<CacheEntry>;

    /// Insert or replace the entry for `path`.
    fn insert(&self, path: &str, entry: CacheEntry);

    /// Remove the entry for `path` if it was created at or before
    /// `stale_before`. A fresher entry written by a concurrent request is kept.
    fn evict_stale(&self, path: &str, stale_before: Instant) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`AssetStore`] over a `HashMap` behind an `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}

impl AssetStore for MemoryAssetStore {
    fn get(&self, path: &str) -> Option<CacheEntry> {
        self.read().get(path).cloned()
    }

    fn insert(&self, path: &str, entry: CacheEntry) {
        self.write().insert(path.to_string(), entry);
    }

    fn evict_stale(&self, path: &str, stale_before: Instant) -> bool {
        let mut entries = self.write();
        match entries.get(path) {
            Some(entry) if entry.created_at <= stale_before => {
                entries.remove(path);
                true
            }
            _ => false,
        }
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn entry(at: Instant) -> CacheEntry {
        CacheEntry {
            asset: Asset {
                bytes: Bytes::from_static(b"data"),
                content_type: "image/png".to_string(),
            },
            created_at: at,
        }
    }

    #[test]
    fn insert_then_get() {
        let store = MemoryAssetStore::new();
        let now = Instant::now();
        store.insert("/e/1/a.png", entry(now));
        let got = store.get("/e/1/a.png").unwrap();
        assert_eq!(got.asset.bytes, Bytes::from_static(b"data"));
        assert_eq!(store.len(), 1);
        assert!(store.get("/e/1/b.png").is_none());
    }

    #[test]
    fn evict_stale_keeps_fresher_entry() {
        let store = MemoryAssetStore::new();
        let old = Instant::now();
        let fresh = old + Duration::from_secs(10);
        store.insert("/p", entry(fresh));

        assert!(!store.evict_stale("/p", old));
        assert_eq!(store.len(), 1);

        assert!(store.evict_stale("/p", fresh));
        assert!(store.is_empty());
    }
}
