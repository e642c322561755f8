//! HTTP Basic authentication against the configured user table.
//!
//! Only the identity is surfaced to the rest of the gateway; passwords never
//! leave this module and are never logged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

/// Realm announced in the `WWW-Authenticate` challenge.
pub const REALM: &str = "warden";

/// Username → password table.
#[derive(Clone, Default)]
pub struct Credentials {
    users: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Credentials {
    pub fn new(users: BTreeMap<String, String>) -> Self {
        Self { users }
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    /// The authenticated username for a request, if its `Authorization`
    /// header carries valid Basic credentials.
    pub fn authenticate(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;

        let expected = self.users.get(user)?;
        let matches: bool = expected.as_bytes().ct_eq(password.as_bytes()).into();
        matches.then(|| user.to_string())
    }
}
