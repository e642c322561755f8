//! Core server: builds the gateway from config, accepts connections and
//! serves each one over HTTP/1.1 with upgrade support.
//!
//! Owns the background tasks: the blocklist file watcher and, when an idle
//! timeout is configured, the session GC loop.

use crate::app::{default_routes, Application, StaticSite};
use crate::auth::Credentials;
use crate::config::ServerConfig;
use crate::dispatcher::{Dispatch, Gateway};
use crate::response::GateBody;
use crate::tunnel::{ForwardingEngine, NullEngine, TunnelEngine};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_core::assets::{MemoryAssetStore, ReqwestFetcher};
use warden_core::{
    AssetCache, AssetCacheConfig, BannedAddresses, BlocklistStore, GateError, GateResult,
    MemorySessionGuard, MirrorTable, SessionGuard,
};

/// Longest pause between session GC sweeps.
const MAX_GC_INTERVAL: Duration = Duration::from_secs(60);

/// The warden server instance.
pub struct WardenServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
    blocklist: Arc<BlocklistStore>,
    sessions: Arc<MemorySessionGuard>,
}

impl WardenServer {
    /// Build every component from `config`. Fails on a malformed blocklist.
    pub fn new(config: ServerConfig) -> GateResult<Self> {
        let blocklist = Arc::new(BlocklistStore::load(&config.blocklist_path)?);

        let sessions = Arc::new(MemorySessionGuard::new(config.session_idle_timeout));

        let credentials = if config.challenge {
            let credentials = Credentials::new(config.users.clone());
            let logins: Vec<&str> = credentials.usernames().collect();
            info!(logins = ?logins, "basic auth enabled");
            Some(credentials)
        } else {
            None
        };

        let assets = Arc::new(AssetCache::new(
            MirrorTable::new(config.mirrors.clone()),
            Arc::new(MemoryAssetStore::new()),
            Arc::new(ReqwestFetcher::default()),
            AssetCacheConfig {
                ttl: config.asset_ttl,
                fetch_timeout: config.fetch_timeout,
                forced_binary: config.forced_binary.clone(),
            },
        ));
        for mirror in assets.mirrors().mirrors() {
            debug!(prefix = %mirror.prefix, base_url = %mirror.base_url, "asset mirror");
        }

        let tunnel: Arc<dyn TunnelEngine> = match &config.tunnel_backend {
            Some(backend) => {
                let engine = ForwardingEngine::new(config.tunnel_prefix.clone(), backend.clone());
                info!(prefix = %config.tunnel_prefix, backend = %engine.backend(), "tunnel engine configured");
                Arc::new(engine)
            }
            None => {
                info!("no tunnel engine configured");
                Arc::new(NullEngine)
            }
        };

        if !config.static_dir.is_dir() {
            warn!(path = %config.static_dir.display(), "static directory not found");
        }
        let app: Arc<dyn Application> =
            Arc::new(StaticSite::new(config.static_dir.clone(), default_routes()));

        let banned = BannedAddresses::new(config.banned.iter().cloned());
        if !banned.is_empty() {
            info!(count = banned.len(), "banned addresses loaded");
        }

        let gateway = Arc::new(Gateway::new(
            banned,
            blocklist.clone(),
            sessions.clone(),
            credentials,
            assets,
            tunnel,
            app,
        ));

        Ok(Self {
            config,
            gateway,
            blocklist,
            sessions,
        })
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(self) -> GateResult<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`.
    pub async fn serve(self, listener: TcpListener) -> GateResult<()> {
        let local = listener.local_addr()?;
        let watcher = self.blocklist.spawn_watcher(self.config.blocklist_poll);
        let gc = self.spawn_session_gc();

        info!(addr = %local, "warden-server ready");

        let result = loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "accepted connection");
                    spawn_connection(self.gateway.clone(), stream, peer);
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    if is_fatal_accept_error(&e) {
                        break Err(GateError::Io(e));
                    }
                }
            }
        };

        watcher.abort();
        if let Some(gc) = gc {
            gc.abort();
        }
        result
    }

    /// Periodically drop idle session bindings. Nothing to do without a timeout.
    fn spawn_session_gc(&self) -> Option<JoinHandle<()>> {
        let idle = self.sessions.idle_timeout()?;
        let sessions = self.sessions.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(idle.min(MAX_GC_INTERVAL));
            loop {
                interval.tick().await;
                let removed = sessions.prune_expired();
                if removed > 0 {
                    info!(removed, remaining = sessions.len(), "session gc");
                }
            }
        }))
    }
}

/// Accept errors that will not clear up by retrying.
fn is_fatal_accept_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::InvalidInput | std::io::ErrorKind::PermissionDenied
    )
}

fn spawn_connection(gateway: Arc<Gateway>, stream: TcpStream, peer: SocketAddr) {
    tokio::spawn(async move {
        let service = service_fn(move |req: Request<Incoming>| {
            let gateway = gateway.clone();
            async move {
                let req = req.map(|body| body.boxed());
                match gateway.dispatch(req, peer.ip()).await {
                    Dispatch::Respond(response) => Ok::<Response<GateBody>, GateError>(response),
                    Dispatch::Drop => Err(GateError::Dropped(peer.to_string())),
                }
            }
        });

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await
        {
            debug!(peer = %peer, error = %e, "connection ended");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config_for(dir: &Path) -> ServerConfig {
        let static_dir = dir.join("static");
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(static_dir.join("404.html"), "<h1>lost</h1>").unwrap();

        let blocklist_path = dir.join("blocklist.json");
        std::fs::write(&blocklist_path, r#"["blocked.example/"]"#).unwrap();

        ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            static_dir,
            blocklist_path,
            blocklist_poll: Duration::from_millis(50),
            challenge: false,
            users: BTreeMap::new(),
            session_idle_timeout: None,
            banned: vec!["203.0.113.42".to_string()],
            asset_ttl: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(1),
            forced_binary: vec![".unityweb".to_string()],
            mirrors: Vec::new(),
            tunnel_prefix: "/ca/".to_string(),
            tunnel_backend: None,
        }
    }

    async fn start(config: ServerConfig) -> SocketAddr {
        let server = WardenServer::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));
        addr
    }

    async fn exchange(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn serves_static_index() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start(config_for(dir.path())).await;

        let reply = exchange(addr, "GET / HTTP/1.1\r\nHost: w\r\nConnection: close\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
        assert!(reply.ends_with("<h1>home</h1>"));
    }

    #[tokio::test]
    async fn blocked_referer_gets_403() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start(config_for(dir.path())).await;

        let reply = exchange(
            addr,
            "GET / HTTP/1.1\r\nHost: w\r\nReferer: https://blocked.example/x\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 403"), "{reply}");
        assert!(reply.ends_with("This site is blocked."));
    }

    #[tokio::test]
    async fn banned_forwarded_address_gets_403() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start(config_for(dir.path())).await;

        let reply = exchange(
            addr,
            "GET / HTTP/1.1\r\nHost: w\r\nX-Forwarded-For: 203.0.113.42\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 403"), "{reply}");
    }

    #[tokio::test]
    async fn unclaimed_upgrade_is_closed_without_response() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start(config_for(dir.path())).await;

        let reply = exchange(
            addr,
            "GET /socket HTTP/1.1\r\nHost: w\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
        )
        .await;
        assert!(reply.is_empty(), "{reply}");
    }

    #[tokio::test]
    async fn blocklist_edit_takes_effect() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let blocklist_path = config.blocklist_path.clone();
        let addr = start(config).await;

        let request = "GET /?url=https://newly-bad.example HTTP/1.1\r\nHost: w\r\nConnection: close\r\n\r\n";
        assert!(exchange(addr, request).await.starts_with("HTTP/1.1 200"));

        std::fs::write(&blocklist_path, r#"["blocked.example/", "newly-bad.example"]"#).unwrap();

        let mut blocked = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if exchange(addr, request).await.starts_with("HTTP/1.1 403") {
                blocked = true;
                break;
            }
        }
        assert!(blocked);
    }

    #[test]
    fn malformed_blocklist_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        std::fs::write(&config.blocklist_path, "{not json").unwrap();
        assert!(matches!(
            WardenServer::new(config),
            Err(GateError::BlocklistParse { .. })
        ));
    }
}
