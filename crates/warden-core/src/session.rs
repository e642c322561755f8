//! Single-session enforcement: each authenticated identity is bound to the
//! last client address it was allowed from.
//!
//! A request from the bound address refreshes the binding. A request from a
//! different address is denied and the binding is left as it was. With no
//! idle timeout configured a binding lives for the lifetime of the process.

use crate::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Outcome of [`SessionGuard::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionDecision {
    Allow,
    /// The identity is already bound to `bound`.
    Deny { bound: String },
}

impl SessionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SessionDecision::Allow)
    }
}

/// Identity → address table consulted for authenticated requests.
pub trait SessionGuard: Send + Sync {
    /// Allow and record `identity -> address`, or deny without recording.
    fn authorize(&self, identity: &str, address: &str) -> SessionDecision;

    /// The address `identity` is currently bound to.
    fn bound_address(&self, identity: &str) -> Option<String>;

    /// Drop expired bindings. Returns how many were removed.
    fn prune_expired(&self) -> usize;

    /// Number of bindings held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct Binding {
    address: String,
    last_seen: Instant,
}

/// In-memory [`SessionGuard`].
pub struct MemorySessionGuard {
    bindings: Mutex<HashMap<String, Binding>>,
    /// `None` keeps bindings forever.
    idle_timeout: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionGuard {
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self::with_clock(idle_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(idle_timeout: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            idle_timeout,
            clock,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        self.bindings.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_stale(&self, binding: &Binding, now: Instant) -> bool {
        match self.idle_timeout {
            Some(timeout) => now.saturating_duration_since(binding.last_seen) >= timeout,
            None => false,
        }
    }
}

impl SessionGuard for MemorySessionGuard {
    fn authorize(&self, identity: &str, address: &str) -> SessionDecision {
        let now = self.clock.now();
        let mut bindings = self.lock();

        if let Some(existing) = bindings.get(identity) {
            if existing.address != address && !self.is_stale(existing, now) {
                return SessionDecision::Deny {
                    bound: existing.address.clone(),
                };
            }
        }

        let previous = bindings.insert(
            identity.to_string(),
            Binding {
                address: address.to_string(),
                last_seen: now,
            },
        );
        match previous {
            None => info!(user = %identity, address = %address, "session bound"),
            Some(old) if old.address != address => {
                info!(user = %identity, old = %old.address, address = %address, "stale session rebound")
            }
            Some(_) => {}
        }

        SessionDecision::Allow
    }

    fn bound_address(&self, identity: &str) -> Option<String> {
        self.lock().get(identity).map(|b| b.address.clone())
    }

    fn prune_expired(&self) -> usize {
        if self.idle_timeout.is_none() {
            return 0;
        }
        let now = self.clock.now();
        let mut bindings = self.lock();
        let before = bindings.len();
        bindings.retain(|_, b| !self.is_stale(b, now));
        let removed = before - bindings.len();
        if removed > 0 {
            debug!(removed, "pruned idle sessions");
        }
        removed
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}
