//! Routing decision for every inbound request, upgrades included.

use crate::assets::MirrorTable;
use http::header::{CONNECTION, UPGRADE};
use http::request::Parts;
use http::Method;

/// The tunneling engine's own claim predicate. Opaque to warden.
pub trait TunnelPredicate: Send + Sync {
    fn should_route(&self, parts: &Parts) -> bool;
}

/// Whether the request asks to switch protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Standard,
    Upgrade,
}

impl ConnectionKind {
    /// `Upgrade` when the request carries an `Upgrade` header and lists
    /// `upgrade` among its `Connection` tokens.
    pub fn of(parts: &Parts) -> Self {
        let connection_upgrade = parts
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

        if connection_upgrade && parts.headers.contains_key(UPGRADE) {
            ConnectionKind::Upgrade
        } else {
            ConnectionKind::Standard
        }
    }
}

/// Where a request goes after the policy checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Tunnel,
    AssetProxy,
    Application,
    /// Upgrade not claimed by the tunnel engine: close the connection.
    Drop,
}

/// Picks a [`Route`] for each request.
#[derive(Debug, Clone)]
pub struct Classifier {
    mirrors: MirrorTable,
}

impl Classifier {
    pub fn new(mirrors: MirrorTable) -> Self {
        Self { mirrors }
    }

    /// Tunnel if the engine claims the request. Otherwise upgrades are
    /// dropped, GET and HEAD under a mirror prefix go to the asset proxy, and the
    /// rest goes to the application.
    pub fn classify<T>(&self, parts: &Parts, kind: ConnectionKind, tunnel: &T) -> Route
    where
        T: TunnelPredicate + ?Sized,
    {
        if tunnel.should_route(parts) {
            return Route::Tunnel;
        }

        match kind {
            ConnectionKind::Upgrade => Route::Drop,
            ConnectionKind::Standard
                if (parts.method == Method::GET || parts.method == Method::HEAD)
                    && self.mirrors.claims(parts.uri.path()) =>
            {
                Route::AssetProxy
            }
            ConnectionKind::Standard => Route::Application,
        }
    }
}
