//! Boundary to the external tunneling engine.
//!
//! The engine decides for itself which requests it handles
//! ([`TunnelPredicate::should_route`]); warden only asks, and hands claimed
//! requests over through [`TunnelEngine::route`] or
//! [`TunnelEngine::route_upgrade`].
//!
//! - **[`forward`]** — [`ForwardingEngine`], which relays claimed requests to
//!   an engine process listening on a local address.
//! - [`NullEngine`] — claims nothing; used when no engine is configured.

pub mod forward;

pub use forward::ForwardingEngine;

use crate::response::GateBody;
use http::request::Parts;
use http::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use warden_core::{GateError, GateResult, TunnelPredicate};

/// Future returned by the routing calls.
pub type RouteFuture<'a> = Pin<Box<dyn Future<Output = GateResult<Response<GateBody>>> + Send + 'a>>;

/// The tunneling engine as seen from the gateway.
pub trait TunnelEngine: TunnelPredicate {
    /// Handle a standard request the engine claimed.
    fn route(&self, req: Request<GateBody>) -> RouteFuture<'_>;

    /// Handle a protocol-upgrade request the engine claimed. The response is
    /// sent to the client as-is; on `101` the engine owns the upgraded stream.
    fn route_upgrade(&self, req: Request<GateBody>) -> RouteFuture<'_>;
}

/// Engine that never claims a request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEngine;

impl TunnelPredicate for NullEngine {
    fn should_route(&self, _parts: &Parts) -> bool {
        false
    }
}

impl TunnelEngine for NullEngine {
    fn route(&self, _req: Request<GateBody>) -> RouteFuture<'_> {
        Box::pin(async { Err(GateError::Other("no tunnel engine configured".to_string())) })
    }

    fn route_upgrade(&self, _req: Request<GateBody>) -> RouteFuture<'_> {
        Box::pin(async { Err(GateError::Other("no tunnel engine configured".to_string())) })
    }
}
