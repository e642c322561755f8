//! Relay claimed requests to a tunneling engine reachable over TCP.
//!
//! Each routed request gets its own HTTP/1.1 client connection to the
//! engine. For upgrades, once the engine answers `101 Switching Protocols`
//! both sides are upgraded and spliced with `copy_bidirectional` in a
//! spawned task; the `101` response itself is returned to the client.

use super::{RouteFuture, TunnelEngine};
use crate::response::GateBody;
use http::request::Parts;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use warden_core::{GateError, GateResult, TunnelPredicate};

/// Forwards requests under `prefix` to the engine at `backend` (`host:port`).
#[derive(Debug, Clone)]
pub struct ForwardingEngine {
    prefix: String,
    backend: String,
}

impl ForwardingEngine {
    pub fn new(prefix: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            backend: backend.into(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    fn upstream_error(&self, message: impl ToString) -> GateError {
        GateError::Upstream {
            url: self.backend.clone(),
            message: message.to_string(),
        }
    }

    /// Open a client connection to the engine. The connection task is
    /// spawned with upgrade support so a `101` can be taken over afterwards.
    async fn connect(&self) -> GateResult<http1::SendRequest<GateBody>> {
        let stream = TcpStream::connect(&self.backend)
            .await
            .map_err(|e| self.upstream_error(e))?;
        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| self.upstream_error(e))?;

        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                debug!(backend = %backend, error = %e, "engine connection ended");
            }
        });

        Ok(sender)
    }
}

impl TunnelPredicate for ForwardingEngine {
    fn should_route(&self, parts: &Parts) -> bool {
        parts.uri.path().starts_with(self.prefix.as_str())
    }
}

impl TunnelEngine for ForwardingEngine {
    fn route(&self, req: Request<GateBody>) -> RouteFuture<'_> {
        Box::pin(async move {
            let mut sender = self.connect().await?;
            let response = sender
                .send_request(req)
                .await
                .map_err(|e| self.upstream_error(e))?;
            Ok(response.map(|body| body.boxed()))
        })
    }

    fn route_upgrade(&self, mut req: Request<GateBody>) -> RouteFuture<'_> {
        Box::pin(async move {
            let client_upgrade = hyper::upgrade::on(&mut req);
            let path = req.uri().path().to_string();

            let mut sender = self.connect().await?;
            let mut response = sender
                .send_request(req)
                .await
                .map_err(|e| self.upstream_error(e))?;

            if response.status() == StatusCode::SWITCHING_PROTOCOLS {
                let engine_upgrade = hyper::upgrade::on(&mut response);
                info!(path = %path, "upgrade handed to tunnel engine");
                tokio::spawn(async move {
                    match tokio::try_join!(client_upgrade, engine_upgrade) {
                        Ok((client, engine)) => {
                            let mut client = TokioIo::new(client);
                            let mut engine = TokioIo::new(engine);
                            match tokio::io::copy_bidirectional(&mut client, &mut engine).await {
                                Ok((up, down)) => {
                                    debug!(path = %path, up, down, "upgraded tunnel closed")
                                }
                                Err(e) => debug!(path = %path, error = %e, "upgraded tunnel ended"),
                            }
                        }
                        Err(e) => warn!(path = %path, error = %e, "upgrade handoff failed"),
                    }
                });
            }

            Ok(response.map(|body| body.boxed()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{empty, full};
    use bytes::Bytes;
    use http::Response;
    use hyper::body::Incoming;
    use hyper::service::service_fn;
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one-shot responses echoing the request path, like an engine would.
    async fn spawn_engine() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<Incoming>| async move {
                        let body = format!("engine saw {}", req.uri().path());
                        Ok::<_, Infallible>(Response::new(full(Bytes::from(body))))
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        addr.to_string()
    }

    /// Engine that accepts every upgrade and echoes the stream upper-cased.
    async fn spawn_upgrade_engine() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let service = service_fn(|mut req: Request<Incoming>| async move {
                        let on_upgrade = hyper::upgrade::on(&mut req);
                        tokio::spawn(async move {
                            let Ok(upgraded) = on_upgrade.await else {
                                return;
                            };
                            let mut io = TokioIo::new(upgraded);
                            let mut buf = [0u8; 64];
                            while let Ok(n) = io.read(&mut buf).await {
                                if n == 0 {
                                    break;
                                }
                                buf[..n].make_ascii_uppercase();
                                if io.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        });
                        let response = Response::builder()
                            .status(StatusCode::SWITCHING_PROTOCOLS)
                            .header("connection", "upgrade")
                            .header("upgrade", "echo")
                            .body(empty())
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .with_upgrades()
                        .await;
                });
            }
        });
        addr.to_string()
    }

    /// Front listener handing every request to `engine.route_upgrade`.
    async fn spawn_front(engine: ForwardingEngine) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let service = service_fn(move |req: Request<Incoming>| {
                let engine = engine.clone();
                async move { engine.route_upgrade(req.map(|body| body.boxed())).await }
            });
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await;
        });
        addr.to_string()
    }

    fn parts_for(uri: &str) -> Parts {
        Request::builder().uri(uri).body(()).unwrap().into_parts().0
    }

    #[test]
    fn claims_only_its_prefix() {
        let engine = ForwardingEngine::new("/ca/", "127.0.0.1:1");
        assert!(engine.should_route(&parts_for("/ca/v3/")));
        assert!(!engine.should_route(&parts_for("/cab")));
        assert!(!engine.should_route(&parts_for("/e/1/a.png")));
    }

    #[tokio::test]
    async fn routes_request_to_engine() {
        let backend = spawn_engine().await;
        let engine = ForwardingEngine::new("/ca/", backend);

        let req = Request::builder()
            .uri("/ca/v3/")
            .header("host", "gateway.local")
            .body(empty())
            .unwrap();
        let response = engine.route(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"engine saw /ca/v3/");
    }

    #[tokio::test]
    async fn unreachable_engine_is_upstream_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let engine = ForwardingEngine::new("/ca/", addr);
        let req = Request::builder().uri("/ca/x").body(empty()).unwrap();
        let err = engine.route(req).await.unwrap_err();
        assert!(matches!(err, GateError::Upstream { .. }));
    }

    #[tokio::test]
    async fn upgrade_is_spliced_to_engine() {
        let backend = spawn_upgrade_engine().await;
        let front = spawn_front(ForwardingEngine::new("/ca/", backend)).await;

        let exchange = async {
            let mut client = TcpStream::connect(&front).await.unwrap();
            client
                .write_all(
                    b"GET /ca/ws HTTP/1.1\r\nHost: w\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n",
                )
                .await
                .unwrap();

            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                client.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            let head = String::from_utf8_lossy(&head).into_owned();
            assert!(head.starts_with("HTTP/1.1 101"), "{head}");

            client.write_all(b"ping").await.unwrap();
            let mut echoed = [0u8; 4];
            client.read_exact(&mut echoed).await.unwrap();
            echoed
        };

        let echoed = tokio::time::timeout(Duration::from_secs(5), exchange)
            .await
            .unwrap();
        assert_eq!(&echoed, b"PING");
    }
}
