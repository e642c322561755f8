//! Upstream retrieval for the asset proxy.

use crate::error::{GateError, GateResult};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Result of a completed upstream exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 2xx response with its body.
    Found(Bytes),
    /// Any other status. Not an error: the request falls through.
    Missing(u16),
}

/// Fetches a resolved upstream URL.
///
/// Transport failures are returned as `Err`; HTTP-level failures are
/// [`FetchOutcome::Missing`].
pub trait AssetFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = GateResult<FetchOutcome>> + Send + 'a>>;
}

/// [`AssetFetcher`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl AssetFetcher for ReqwestFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = GateResult<FetchOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let upstream = |e: reqwest::Error| GateError::Upstream {
                url: url.to_string(),
                message: e.to_string(),
            };

            let response = self.client.get(url).send().await.map_err(upstream)?;
            let status = response.status();
            if !status.is_success() {
                debug!(url = %url, status = status.as_u16(), "upstream returned non-success");
                return Ok(FetchOutcome::Missing(status.as_u16()));
            }

            let body = response.bytes().await.map_err(upstream)?;
            debug!(url = %url, bytes = body.len(), "fetched upstream asset");
            Ok(FetchOutcome::Found(body))
        })
    }
}
