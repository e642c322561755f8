//! Application layer — the fallback for every request not blocked, not
//! claimed by the tunnel engine, and not served by the asset proxy.
//!
//! [`StaticSite`] serves pre-built pages from a directory: first a matching
//! file under the root (a directory maps to its `index.html`), then the
//! route alias table, then `404.html` with status 404.

use crate::response::{empty, text, with_body, GateBody};
use http::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tracing::debug;

/// The opaque fallback handler.
pub trait Application: Send + Sync {
    fn handle(
        &self,
        req: Request<GateBody>,
    ) -> Pin<Box<dyn Future<Output = Response<GateBody>> + Send + '_>>;
}

/// Short paths that map onto pages in the site root.
pub fn default_routes() -> Vec<(String, String)> {
    [
        ("/b", "apps.html"),
        ("/a", "games.html"),
        ("/play.html", "games.html"),
        ("/c", "settings.html"),
        ("/d", "tabs.html"),
        ("/", "index.html"),
    ]
    .into_iter()
    .map(|(path, file)| (path.to_string(), file.to_string()))
    .collect()
}

/// Static file server over `root`.
#[derive(Debug, Clone)]
pub struct StaticSite {
    root: PathBuf,
    routes: Vec<(String, String)>,
}

impl StaticSite {
    pub fn new(root: impl Into<PathBuf>, routes: Vec<(String, String)>) -> Self {
        Self {
            root: root.into(),
            routes,
        }
    }

    /// Map a request path to a file under the root. Paths that try to climb
    /// out of the root resolve to nothing.
    fn file_for(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }

    async fn read_file(&self, path: &Path) -> Option<(Vec<u8>, String)> {
        let target = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => path.join("index.html"),
            Ok(_) => path.to_path_buf(),
            Err(_) => return None,
        };
        let bytes = tokio::fs::read(&target).await.ok()?;
        let content_type = mime_guess::from_path(&target)
            .first_or_octet_stream()
            .to_string();
        Some((bytes, content_type))
    }

    async fn lookup(&self, request_path: &str) -> Option<(Vec<u8>, String)> {
        if let Some(path) = self.file_for(request_path) {
            if let Some(found) = self.read_file(&path).await {
                return Some(found);
            }
        }

        let (_, file) = self.routes.iter().find(|(route, _)| route == request_path)?;
        self.read_file(&self.root.join(file)).await
    }

    async fn not_found(&self) -> Response<GateBody> {
        match tokio::fs::read(self.root.join("404.html")).await {
            Ok(page) => with_body(StatusCode::NOT_FOUND, "text/html; charset=utf-8", page),
            Err(_) => text(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    async fn serve(&self, req: Request<GateBody>) -> Response<GateBody> {
        let method = req.method().clone();
        if method != Method::GET && method != Method::HEAD {
            return self.not_found().await;
        }

        let path = req.uri().path().to_string();
        match self.lookup(&path).await {
            Some((bytes, content_type)) => {
                debug!(path = %path, content_type = %content_type, "serving static file");
                let mut response = with_body(StatusCode::OK, &content_type, bytes);
                if method == Method::HEAD {
                    *response.body_mut() = empty();
                }
                response
            }
            None => self.not_found().await,
        }
    }
}

impl Application for StaticSite {
    fn handle(
        &self,
        req: Request<GateBody>,
    ) -> Pin<Box<dyn Future<Output = Response<GateBody>> + Send + '_>> {
        Box::pin(self.serve(req))
    }
}
