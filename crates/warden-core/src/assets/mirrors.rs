//! Mirror table and content-type resolution.

use serde::{Deserialize, Serialize};

/// Content type used for unknown and forced-binary extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// One prefix → upstream mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    /// Request path prefix, e.g. `/e/2/`.
    pub prefix: String,
    /// Upstream base URL; the remainder of the path is appended verbatim.
    pub base_url: String,
}

impl Mirror {
    pub fn new(prefix: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            base_url: base_url.into(),
        }
    }
}

/// Ordered mirror table. The first matching prefix wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorTable {
    mirrors: Vec<Mirror>,
}

impl MirrorTable {
    pub fn new(mirrors: Vec<Mirror>) -> Self {
        Self { mirrors }
    }

    /// The upstream URL for `path`, or `None` when no prefix matches.
    pub fn resolve(&self, path: &str) -> Option<String> {
        self.mirrors.iter().find_map(|m| {
            path.strip_prefix(m.prefix.as_str())
                .map(|rest| format!("{}{}", m.base_url, rest))
        })
    }

    /// Whether some mirror claims `path`.
    pub fn claims(&self, path: &str) -> bool {
        self.mirrors.iter().any(|m| path.starts_with(m.prefix.as_str()))
    }

    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }
}

/// Extension of the last path segment of `url`, including the dot.
fn extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rfind('.').map(|i| &file[i..]).filter(|ext| ext.len() > 1)
}

/// Content type for an upstream URL.
///
/// Extensions listed in `forced_binary` (with leading dot, compared
/// case-insensitively) are always served as `application/octet-stream`.
/// Everything else goes through the MIME table, falling back to
/// `application/octet-stream` when the extension is unknown.
pub fn content_type_for(url: &str, forced_binary: &[String]) -> String {
    let Some(ext) = extension(url) else {
        return OCTET_STREAM.to_string();
    };

    if forced_binary.iter().any(|f| f.eq_ignore_ascii_case(ext)) {
        return OCTET_STREAM.to_string();
    }

    mime_guess::from_ext(&ext[1..])
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}
