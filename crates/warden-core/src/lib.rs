//! warden-core: request gating and asset caching for the warden gateway.
//!
//! Provides the hot-reloaded blocklist, the single-session guard, the
//! banned-address list, the TTL asset cache in front of remote mirrors, and
//! the classifier that routes each request to the tunnel engine, the asset
//! proxy, or the application.

pub mod access;
pub mod assets;
pub mod blocklist;
pub mod classifier;
pub mod clock;
pub mod error;
pub mod session;

// Re-export commonly used items at crate root.
pub use access::{client_address, BannedAddresses};
pub use assets::{Asset, AssetCache, AssetCacheConfig, AssetError, Mirror, MirrorTable};
pub use blocklist::BlocklistStore;
pub use classifier::{Classifier, ConnectionKind, Route, TunnelPredicate};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{GateError, GateResult};
pub use session::{MemorySessionGuard, SessionDecision, SessionGuard};
