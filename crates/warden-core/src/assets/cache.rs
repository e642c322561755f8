//! TTL cache in front of the asset mirrors.

use super::fetch::{AssetFetcher, FetchOutcome};
use super::mirrors::{content_type_for, MirrorTable};
use super::store::{AssetStore, CacheEntry};
use super::Asset;
use crate::clock::{Clock, SystemClock};
use crate::error::GateError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default entry lifetime: 30 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default deadline for one upstream fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Why [`AssetCache::fetch_asset`] produced no asset.
#[derive(Debug, Error)]
pub enum AssetError {
    /// No mirror claims the path, or the mirror answered with a non-2xx
    /// status. The caller should let the next handler try.
    #[error("asset not found")]
    NotFound,

    /// Transport failure or deadline expiry talking to the mirror.
    #[error("upstream unavailable: {0}")]
    Upstream(#[source] GateError),
}

/// Tunables for [`AssetCache`].
#[derive(Debug, Clone)]
pub struct AssetCacheConfig {
    pub ttl: Duration,
    pub fetch_timeout: Duration,
    /// Extensions (with leading dot) always served as `application/octet-stream`.
    pub forced_binary: Vec<String>,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            forced_binary: vec![".unityweb".to_string()],
        }
    }
}

/// Path-keyed asset cache with lazy expiry.
///
/// Concurrent misses for the same path each fetch upstream; the last insert
/// wins.
pub struct AssetCache {
    mirrors: MirrorTable,
    store: Arc<dyn AssetStore>,
    fetcher: Arc<dyn AssetFetcher>,
    clock: Arc<dyn Clock>,
    config: AssetCacheConfig,
}

impl AssetCache {
    pub fn new(
        mirrors: MirrorTable,
        store: Arc<dyn AssetStore>,
        fetcher: Arc<dyn AssetFetcher>,
        config: AssetCacheConfig,
    ) -> Self {
        Self::with_clock(mirrors, store, fetcher, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        mirrors: MirrorTable,
        store: Arc<dyn AssetStore>,
        fetcher: Arc<dyn AssetFetcher>,
        config: AssetCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mirrors,
            store,
            fetcher,
            clock,
            config,
        }
    }

    pub fn mirrors(&self) -> &MirrorTable {
        &self.mirrors
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    /// Serve `path` from cache, or fetch it from its mirror and cache it.
    pub async fn fetch_asset(&self, path: &str) -> Result<Asset, AssetError> {
        let now = self.clock.now();

        if let Some(entry) = self.store.get(path) {
            if now.saturating_duration_since(entry.created_at) < self.config.ttl {
                debug!(path = %path, "asset cache hit");
                return Ok(entry.asset);
            }
            self.store.evict_stale(path, entry.created_at);
            debug!(path = %path, "evicted expired asset");
        }

        let Some(url) = self.mirrors.resolve(path) else {
            return Err(AssetError::NotFound);
        };

        let outcome = tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch(&url))
            .await
            .map_err(|_| AssetError::Upstream(GateError::Timeout(self.config.fetch_timeout)))?
            .map_err(AssetError::Upstream)?;

        let bytes = match outcome {
            FetchOutcome::Found(bytes) => bytes,
            FetchOutcome::Missing(status) => {
                debug!(path = %path, url = %url, status, "mirror has no such asset");
                return Err(AssetError::NotFound);
            }
        };

        let asset = Asset {
            bytes,
            content_type: content_type_for(&url, &self.config.forced_binary),
        };
        self.store.insert(
            path,
            CacheEntry {
                asset: asset.clone(),
                created_at: self.clock.now(),
            },
        );
        info!(
            path = %path,
            content_type = %asset.content_type,
            bytes = asset.bytes.len(),
            "cached asset"
        );

        Ok(asset)
    }
}
