//! Asset proxy — re-serves static assets from a fixed set of remote mirrors,
//! caching each response in memory for a bounded time.
//!
//! # Submodules
//!
//! - **[`mirrors`]** — the ordered prefix → base-URL table and content-type
//!   resolution.
//! - **[`store`]** — the [`AssetStore`] trait and its in-memory implementation.
//! - **[`fetch`]** — the [`AssetFetcher`] trait and the `reqwest` client behind it.
//! - **[`cache`]** — [`AssetCache`], which ties the three together.
//!
//! # Data Flow
//!
//! ```text
//! AssetCache::fetch_asset(path)
//!   → AssetStore::get           (live hit → return)
//!   → AssetStore::evict_stale   (expired → drop, continue)
//!   → MirrorTable::resolve      (no prefix → NotFound)
//!   → AssetFetcher::fetch       (non-2xx → NotFound, transport/timeout → Upstream)
//!   → content_type_for + AssetStore::insert
//! ```

pub mod cache;
pub mod fetch;
pub mod mirrors;
pub mod store;

pub use cache::{AssetCache, AssetCacheConfig, AssetError};
pub use fetch::{AssetFetcher, FetchOutcome, ReqwestFetcher};
pub use mirrors::{content_type_for, Mirror, MirrorTable};
pub use store::{AssetStore, CacheEntry, MemoryAssetStore};

use bytes::Bytes;

/// A servable asset: payload plus the content type to send with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub bytes: Bytes,
    pub content_type: String,
}
