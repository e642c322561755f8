//! Blocklist store — substring patterns that deny a request when any of them
//! appears in the request context.
//!
//! The active list is an immutable [`BlockList`] snapshot held in an
//! [`ArcSwap`]. Reloads build a complete new snapshot and swap it in, so a
//! reader either sees the old list or the new one, never a mix.
//!
//! The backing file is a JSON array of strings. A background task started
//! with [`BlocklistStore::spawn_watcher`] polls its modification time and
//! length and reloads on change. A file that fails to read or parse is
//! logged and ignored; the previous snapshot stays in force.

use crate::error::{GateError, GateResult};
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A normalized blocklist pattern: lowercased, one trailing `/` removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry(String);

impl BlockEntry {
    /// Normalize a raw pattern. Returns `None` for patterns that normalize to
    /// the empty string, since those would match every request.
    pub fn new(raw: &str) -> Option<Self> {
        let stripped = raw.strip_suffix('/').unwrap_or(raw);
        if stripped.is_empty() {
            return None;
        }
        Some(Self(stripped.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One complete, immutable generation of the blocklist.
#[derive(Debug, Default, Clone)]
pub struct BlockList {
    entries: Vec<BlockEntry>,
}

impl BlockList {
    /// Build a list from raw patterns, dropping the ones that normalize to nothing.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = patterns
            .into_iter()
            .filter_map(|p| {
                let entry = BlockEntry::new(p.as_ref());
                if entry.is_none() {
                    warn!(pattern = %p.as_ref(), "ignoring empty blocklist pattern");
                }
                entry
            })
            .collect();
        Self { entries }
    }

    /// Parse the JSON array-of-strings file format.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Vec<String> = serde_json::from_str(text)?;
        Ok(Self::new(raw))
    }

    /// First entry contained in `candidate`, compared case-insensitively.
    pub fn find_match(&self, candidate: &str) -> Option<&BlockEntry> {
        let lowered = candidate.to_lowercase();
        self.entries.iter().find(|e| lowered.contains(e.as_str()))
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Modification time and size, used to notice that the file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Hot-reloadable blocklist backed by a JSON file.
pub struct BlocklistStore {
    path: Option<PathBuf>,
    current: ArcSwap<BlockList>,
    stamp: Mutex<Option<FileStamp>>,
    reload_count: AtomicU64,
}

impl BlocklistStore {
    /// A store with a fixed list and no backing file.
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            path: None,
            current: ArcSwap::from_pointee(BlockList::new(patterns)),
            stamp: Mutex::new(None),
            reload_count: AtomicU64::new(0),
        }
    }

    /// Load the store from `path`.
    ///
    /// A missing file yields an empty list (the watcher picks the file up once
    /// it appears). A file that exists but does not parse is an error, so a
    /// broken deployment fails at startup instead of running unprotected.
    pub fn load(path: impl Into<PathBuf>) -> GateResult<Self> {
        let path = path.into();
        let stamp = FileStamp::read(&path);
        let list = if stamp.is_some() {
            read_list(&path)?
        } else {
            warn!(path = %path.display(), "blocklist file not found, starting with an empty list");
            BlockList::default()
        };

        info!(path = %path.display(), entries = list.len(), "blocklist loaded");

        Ok(Self {
            path: Some(path),
            current: ArcSwap::from_pointee(list),
            stamp: Mutex::new(stamp),
            reload_count: AtomicU64::new(0),
        })
    }

    /// Whether any entry is a substring of `candidate` (case-insensitive).
    pub fn is_blocked(&self, candidate: &str) -> bool {
        self.matching_entry(candidate).is_some()
    }

    /// The entry that blocks `candidate`, if any. Used for deny logging.
    pub fn matching_entry(&self, candidate: &str) -> Option<String> {
        self.current
            .load()
            .find_match(candidate)
            .map(|e| e.as_str().to_string())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<BlockList> {
        self.current.load_full()
    }

    /// Number of successful reloads since startup.
    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::Relaxed)
    }

    /// Re-read the backing file and swap in the new list.
    ///
    /// On failure the current snapshot is left untouched and the error is
    /// returned. Returns the number of entries now active.
    pub fn reload(&self) -> GateResult<usize> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.current.load().len());
        };

        let list = read_list(path)?;
        let count = list.len();
        self.current.store(Arc::new(list));
        self.reload_count.fetch_add(1, Ordering::Relaxed);
        info!(path = %path.display(), entries = count, "blocklist reloaded");
        Ok(count)
    }

    /// Reload when the file's modification time or size differs from the
    /// last observation. Returns `Ok(true)` if a reload succeeded.
    ///
    /// The observation is updated even when the reload fails, so a broken file
    /// is reported once per change rather than on every poll.
    pub fn reload_if_changed(&self) -> GateResult<bool> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };

        let observed = FileStamp::read(path);
        {
            let mut stamp = match self.stamp.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *stamp == observed {
                return Ok(false);
            }
            *stamp = observed;
        }

        debug!(path = %path.display(), "blocklist file changed");
        self.reload().map(|_| true)
    }

    /// Start a background task polling the backing file every `interval`.
    ///
    /// Reload failures are logged and never stop the task.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = store.reload_if_changed() {
                    error!(error = %e, "blocklist reload failed, keeping previous list");
                }
            }
        })
    }
}

fn read_list(path: &Path) -> GateResult<BlockList> {
    let text = std::fs::read_to_string(path).map_err(|source| GateError::BlocklistRead {
        path: path.to_path_buf(),
        source,
    })?;
    BlockList::from_json(&text).map_err(|e| GateError::BlocklistParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
