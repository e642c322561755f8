//! Gateway dispatcher — runs the policy checks for each request and hands it
//! to the tunnel engine, the asset cache, or the application.
//!
//! # Check order
//!
//! ```text
//! banned address
//!   → blocklist, early form   (`url` query parameter, else body `url`, else path + query)
//!   → session guard           (valid credentials, not claimed by the engine)
//!   → blocklist, full form    ("<uri> <host> <referer>")
//!   → classify
//!       Tunnel      → TunnelEngine::route / route_upgrade
//!       Drop        → close the connection
//!       AssetProxy  → credentials → AssetCache (NotFound falls through)
//!       Application → credentials → Application::handle
//! ```
//!
//! Every denial is answered from memory before any upstream or file I/O.

use crate::app::Application;
use crate::auth::{Credentials, REALM};
use crate::response::{
    empty, forbidden, full, text, unauthorized, with_body, GateBody, ASSET_ERROR_MESSAGE,
    BANNED_MESSAGE, BLOCKED_MESSAGE, SESSION_IN_USE_MESSAGE,
};
use crate::tunnel::TunnelEngine;
use http::header::{HeaderName, CONTENT_TYPE, HOST, REFERER};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::{
    client_address, AssetCache, AssetError, BannedAddresses, BlocklistStore, Classifier,
    ConnectionKind, Route, SessionDecision, SessionGuard, TunnelPredicate,
};

/// Largest form or JSON body buffered for the `url` check.
const MAX_INSPECTED_BODY: usize = 1024 * 1024;

/// What the server should do with the connection.
pub enum Dispatch {
    Respond(Response<GateBody>),
    /// Close the connection without a response.
    Drop,
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Respond(r) => f.debug_tuple("Respond").field(&r.status()).finish(),
            Dispatch::Drop => f.write_str("Drop"),
        }
    }
}

/// Everything the dispatcher consults, injected at construction.
pub struct Gateway {
    banned: BannedAddresses,
    blocklist: Arc<BlocklistStore>,
    sessions: Arc<dyn SessionGuard>,
    /// `None` disables the Basic challenge; nobody is authenticated then.
    credentials: Option<Credentials>,
    classifier: Classifier,
    assets: Arc<AssetCache>,
    tunnel: Arc<dyn TunnelEngine>,
    app: Arc<dyn Application>,
}

impl Gateway {
    pub fn new(
        banned: BannedAddresses,
        blocklist: Arc<BlocklistStore>,
        sessions: Arc<dyn SessionGuard>,
        credentials: Option<Credentials>,
        assets: Arc<AssetCache>,
        tunnel: Arc<dyn TunnelEngine>,
        app: Arc<dyn Application>,
    ) -> Self {
        let classifier = Classifier::new(assets.mirrors().clone());
        Self {
            banned,
            blocklist,
            sessions,
            credentials,
            classifier,
            assets,
            tunnel,
            app,
        }
    }

    /// Run the checks for one request from `peer` and produce its outcome.
    pub async fn dispatch(&self, req: Request<GateBody>, peer: IpAddr) -> Dispatch {
        let address = client_address(req.headers(), peer);

        if self.banned.is_banned(&address) {
            info!(address = %address, "blocked banned address");
            return Dispatch::Respond(forbidden(BANNED_MESSAGE));
        }

        let (parts, body) = req.into_parts();
        let kind = ConnectionKind::of(&parts);
        let claimed = self.tunnel.should_route(&parts);

        // Bodies headed for the engine stream through untouched.
        let (body, body_url) = if claimed || kind == ConnectionKind::Upgrade {
            (body, None)
        } else {
            match inspect_body(&parts.headers, body).await {
                Ok(inspected) => inspected,
                Err(status) => {
                    debug!(address = %address, %status, "rejected request body");
                    let reason = status.canonical_reason().unwrap_or("Bad Request");
                    return Dispatch::Respond(text(status, reason));
                }
            }
        };

        let early = early_candidate(&parts.uri, body_url.as_deref());
        if let Some(entry) = self.blocklist.matching_entry(&early) {
            info!(address = %address, target = %early, entry = %entry, "blocked attempt");
            return Dispatch::Respond(forbidden(BLOCKED_MESSAGE));
        }

        let identity = self
            .credentials
            .as_ref()
            .and_then(|c| c.authenticate(&parts.headers));
        if let Some(user) = identity.as_deref().filter(|_| !claimed) {
            if let SessionDecision::Deny { bound } = self.sessions.authorize(user, &address) {
                info!(user = %user, bound = %bound, address = %address, "account already in use");
                return Dispatch::Respond(forbidden(SESSION_IN_USE_MESSAGE));
            }
        }

        let full_form = full_candidate(&parts.uri, &parts.headers);
        if let Some(entry) = self.blocklist.matching_entry(&full_form) {
            info!(address = %address, target = %full_form, entry = %entry, "blocked attempt");
            return Dispatch::Respond(forbidden(BLOCKED_MESSAGE));
        }

        let route = self.classifier.classify(&parts, kind, self.tunnel.as_ref());
        let req = Request::from_parts(parts, body);
        debug!(address = %address, path = %req.uri().path(), ?kind, ?route, "classified");

        match route {
            Route::Tunnel => Dispatch::Respond(self.to_tunnel(req, kind).await),
            Route::Drop => {
                debug!(address = %address, path = %req.uri().path(), "dropping unclaimed upgrade");
                Dispatch::Drop
            }
            Route::AssetProxy | Route::Application => {
                if self.credentials.is_some() && identity.is_none() {
                    return Dispatch::Respond(unauthorized(REALM));
                }
                if route == Route::AssetProxy {
                    match self.assets.fetch_asset(req.uri().path()).await {
                        Ok(asset) => {
                            let mut response =
                                with_body(StatusCode::OK, &asset.content_type, asset.bytes);
                            if req.method() == Method::HEAD {
                                *response.body_mut() = empty();
                            }
                            return Dispatch::Respond(response);
                        }
                        Err(AssetError::NotFound) => {}
                        Err(e @ AssetError::Upstream(_)) => {
                            warn!(path = %req.uri().path(), error = %e, "error fetching asset");
                            return Dispatch::Respond(text(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                ASSET_ERROR_MESSAGE,
                            ));
                        }
                    }
                }
                Dispatch::Respond(self.app.handle(req).await)
            }
        }
    }

    async fn to_tunnel(&self, req: Request<GateBody>, kind: ConnectionKind) -> Response<GateBody> {
        let path = req.uri().path().to_string();
        let routed = match kind {
            ConnectionKind::Upgrade => self.tunnel.route_upgrade(req).await,
            ConnectionKind::Standard => self.tunnel.route(req).await,
        };
        routed.unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "tunnel engine failed");
            text(StatusCode::BAD_GATEWAY, "Bad Gateway")
        })
    }
}

/// Early blocklist candidate: the first non-empty of the `url` query
/// parameter and the body `url` field, otherwise the path with its query.
pub fn early_candidate(uri: &Uri, body_url: Option<&str>) -> String {
    uri.query()
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())
        })
        .filter(|value| !value.is_empty())
        .or_else(|| body_url.filter(|value| !value.is_empty()).map(str::to_string))
        .unwrap_or_else(|| {
            uri.path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| uri.path().to_string())
        })
}

/// Body encodings whose `url` field is checked against the blocklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFormat {
    Form,
    Json,
}

impl BodyFormat {
    fn of(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
        let essence = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/x-www-form-urlencoded" => Some(BodyFormat::Form),
            "application/json" => Some(BodyFormat::Json),
            other if other.ends_with("+json") => Some(BodyFormat::Json),
            _ => None,
        }
    }

    fn url_field(self, bytes: &[u8]) -> Option<String> {
        match self {
            BodyFormat::Form => url::form_urlencoded::parse(bytes)
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned()),
            BodyFormat::Json => serde_json::from_slice::<serde_json::Value>(bytes)
                .ok()?
                .get("url")?
                .as_str()
                .map(str::to_string),
        }
    }
}

/// Buffer a form or JSON body and read its `url` field. The buffered bytes
/// are handed back as the new body; other bodies pass through unread.
async fn inspect_body(
    headers: &HeaderMap,
    body: GateBody,
) -> Result<(GateBody, Option<String>), StatusCode> {
    let Some(format) = BodyFormat::of(headers) else {
        return Ok((body, None));
    };

    let bytes = Limited::new(body, MAX_INSPECTED_BODY)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            }
        })?
        .to_bytes();

    let url = format.url_field(&bytes);
    Ok((full(bytes), url))
}

/// Full blocklist candidate: raw URI, `Host`, and `Referer`, space-separated.
pub fn full_candidate(uri: &Uri, headers: &HeaderMap) -> String {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    };
    format!("{} {} {}", uri, header(HOST), header(REFERER))
}
