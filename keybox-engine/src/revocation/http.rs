use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{RevocationSnapshot, RevocationSource};
use crate::config::RevocationConfig;
use crate::error::{EngineError, EngineResult, RevocationError, RevocationResult};

/// Largest status list body accepted by default (16 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

struct CachedSnapshot {
    snapshot: Arc<RevocationSnapshot>,
    fetched_at: Instant,
}

/// Attestation status list fetched over HTTPS
///
/// A fetched list is reused until `cache_ttl` elapses. Concurrent callers
/// that find the cache stale wait for a single refresh; the cache is only
/// replaced once a fetch has completed and decoded successfully.
pub struct HttpRevocationSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    cache_ttl: Duration,
    max_body_bytes: usize,
    cache: RwLock<Option<CachedSnapshot>>,
    refresh: Mutex<()>,
}

impl std::fmt::Debug for HttpRevocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRevocationSource")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("cache_ttl", &self.cache_ttl)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl HttpRevocationSource {
    /// # Errors
    ///
    /// Returns [`EngineError::HttpClient`] when the TLS client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration, cache_ttl: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("keyboxer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
            cache_ttl,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
        })
    }

    /// # Errors
    ///
    /// As [`HttpRevocationSource::new`].
    pub fn from_config(config: &RevocationConfig) -> EngineResult<Self> {
        Self::new(config.url.clone(), config.timeout(), config.cache_ttl())
    }

    /// Reject status list bodies larger than `limit` bytes.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fresh_snapshot(&self) -> Option<Arc<RevocationSnapshot>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.cache_ttl)
            .map(|cached| Arc::clone(&cached.snapshot))
    }

    async fn fetch(&self) -> RevocationResult<RevocationSnapshot> {
        let request = async {
            let mut response = self
                .client
                .get(&self.url)
                .header(ACCEPT, "application/json")
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await
                .map_err(|e| RevocationError::Unavailable(format!("{}: {}", self.url, e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(RevocationError::Unavailable(format!(
                    "{} returned {}",
                    self.url, status
                )));
            }

            let limit = u64::try_from(self.max_body_bytes).unwrap_or(u64::MAX);
            if response.content_length().is_some_and(|length| length > limit) {
                return Err(self.body_too_large());
            }

            let mut body = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| RevocationError::Unavailable(format!("{}: {}", self.url, e)))?
            {
                if body.len().saturating_add(chunk.len()) > self.max_body_bytes {
                    return Err(self.body_too_large());
                }
                body.extend_from_slice(&chunk);
            }
            RevocationSnapshot::from_json(&body)
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| RevocationError::Timeout(self.timeout))?
    }

    fn body_too_large(&self) -> RevocationError {
        RevocationError::InvalidSnapshot(format!(
            "{} returned more than {} bytes",
            self.url, self.max_body_bytes
        ))
    }
}

#[async_trait]
impl RevocationSource for HttpRevocationSource {
    async fn snapshot(&self) -> RevocationResult<Arc<RevocationSnapshot>> {
        if let Some(snapshot) = self.fresh_snapshot().await {
            return Ok(snapshot);
        }

        let _refresh = self.refresh.lock().await;
        if let Some(snapshot) = self.fresh_snapshot().await {
            debug!("Status list refreshed by a concurrent caller");
            return Ok(snapshot);
        }

        let snapshot = match self.fetch().await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                warn!(url = %self.url, error = %e, "Failed to fetch attestation status list");
                return Err(e);
            }
        };

        *self.cache.write().await = Some(CachedSnapshot {
            snapshot: Arc::clone(&snapshot),
            fetched_at: Instant::now(),
        });
        info!(url = %self.url, entries = snapshot.len(), "Fetched attestation status list");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::SerialNumber;
    use crate::revocation::RevocationStatus;
    use keybox_testkit::status_list_json;
    use std::io::Write;

    fn source(url: String, ttl: Duration) -> HttpRevocationSource {
        HttpRevocationSource::new(url, Duration::from_secs(5), ttl).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/attestation/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(status_list_json(&[("1a2b3c4d", "REVOKED")]))
            .expect(1)
            .create_async()
            .await;

        let source = source(
            format!("{}/attestation/status", server.url()),
            Duration::from_secs(3600),
        );
        let first = source.snapshot().await.unwrap();
        let second = source.snapshot().await.unwrap();

        let serial = SerialNumber::from_hex("1a2b3c4d").unwrap();
        assert_eq!(first.lookup(&serial), RevocationStatus::Revoked);
        assert!(Arc::ptr_eq(&first, &second));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_zero_ttl_refetches() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_body(status_list_json(&[]))
            .expect(2)
            .create_async()
            .await;

        let source = source(format!("{}/status", server.url()), Duration::ZERO);
        source.snapshot().await.unwrap();
        source.snapshot().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_body(status_list_json(&[("ff", "SUSPENDED")]))
            .expect(1)
            .create_async()
            .await;

        let source = Arc::new(source(
            format!("{}/status", server.url()),
            Duration::from_secs(60),
        ));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let source = Arc::clone(&source);
            tasks.spawn(async move { source.snapshot().await.map(|s| s.len()) });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), 1);
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable_and_not_cached() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/status")
            .with_status(503)
            .create_async()
            .await;

        let source = source(format!("{}/status", server.url()), Duration::from_secs(60));
        assert!(matches!(
            source.snapshot().await,
            Err(RevocationError::Unavailable(_))
        ));
        failing.remove_async().await;

        server
            .mock("GET", "/status")
            .with_status(200)
            .with_body(status_list_json(&[]))
            .create_async()
            .await;
        assert!(source.snapshot().await.is_ok());
    }

    #[tokio::test]
    async fn test_undecodable_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let source = source(format!("{}/status", server.url()), Duration::from_secs(60));
        assert!(matches!(
            source.snapshot().await,
            Err(RevocationError::InvalidSnapshot(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let body = status_list_json(&[("1a2b3c4d", "REVOKED"), ("ff", "SUSPENDED")]);
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/declared")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;
        let streamed = body.clone();
        server
            .mock("GET", "/chunked")
            .with_status(200)
            .with_chunked_body(move |writer| writer.write_all(streamed.as_bytes()))
            .create_async()
            .await;

        for path in ["declared", "chunked"] {
            let source = source(format!("{}/{}", server.url(), path), Duration::from_secs(60))
                .with_max_body_bytes(body.len() - 1);
            assert!(
                matches!(source.snapshot().await, Err(RevocationError::InvalidSnapshot(_))),
                "{}",
                path
            );
        }

        let source = source(format!("{}/chunked", server.url()), Duration::from_secs(60))
            .with_max_body_bytes(body.len());
        assert_eq!(source.snapshot().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let source = source("http://127.0.0.1:1/status".to_string(), Duration::from_secs(60));
        assert!(matches!(
            source.snapshot().await,
            Err(RevocationError::Unavailable(_) | RevocationError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let source = HttpRevocationSource::new(
            format!("http://{}/status", addr),
            Duration::from_millis(200),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(matches!(
            source.snapshot().await,
            Err(RevocationError::Timeout(_))
        ));
    }
}
