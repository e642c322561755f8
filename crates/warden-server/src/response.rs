//! Response bodies and the canned responses the gateway sends itself.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

/// Body type used on both sides of the gateway.
pub type GateBody = BoxBody<Bytes, hyper::Error>;

pub const BLOCKED_MESSAGE: &str = "This site is blocked.";
pub const BANNED_MESSAGE: &str = "Access denied.";
pub const SESSION_IN_USE_MESSAGE: &str = "Access denied: Account already in use.";
pub const ASSET_ERROR_MESSAGE: &str = "Error fetching the asset";

pub fn full(bytes: impl Into<Bytes>) -> GateBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

pub fn empty() -> GateBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// A response with the given status, content type, and body.
pub fn with_body(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<GateBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    let value = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    response.headers_mut().insert(CONTENT_TYPE, value);
    response
}

/// A `text/plain` response.
pub fn text(status: StatusCode, message: &'static str) -> Response<GateBody> {
    with_body(status, "text/plain; charset=utf-8", message)
}

pub fn forbidden(message: &'static str) -> Response<GateBody> {
    text(StatusCode::FORBIDDEN, message)
}

/// `401` asking the browser for Basic credentials.
pub fn unauthorized(realm: &str) -> Response<GateBody> {
    let mut response = text(StatusCode::UNAUTHORIZED, "Unauthorized");
    if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
        response.headers_mut().insert(WWW_AUTHENTICATE, value);
    }
    response
}
