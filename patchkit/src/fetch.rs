//! Remote byte-fetch collaborator and its TTL cache.
//!
//! The engine needs exactly one thing from the network layer: fetch a URL to
//! bytes, or report that the resource is absent. Everything else (auth, proxy
//! handling, mirrors) stays behind the [`RemoteSource`] contract.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// External byte-fetch contract used for both manifest and payload retrieval.
///
/// `Ok(None)` means the resource does not exist (HTTP 404); transport and
/// server failures are errors.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Streaming HTTP implementation of [`RemoteSource`].
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Option<Vec<u8>>> {
        use anyhow::{anyhow, Context};

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request '{}'", url))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "Request to '{}' failed with HTTP {}",
                url,
                response.status()
            ));
        }

        let mut data = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(next_chunk) = stream.next().await {
            let chunk = next_chunk
                .with_context(|| format!("Failed to stream response body for '{}'", url))?;
            data.extend_from_slice(&chunk);
        }
        Ok(Some(data))
    }
}

struct CachedBytes {
    data: Arc<Vec<u8>>,
    fetched_at: Instant,
}

/// TTL byte cache fronting a [`RemoteSource`].
///
/// Payloads are keyed by URL (which embeds the version string), so repeated
/// checks and retries within the TTL never re-download the same bytes.
pub struct FetchCache<S> {
    source: S,
    ttl: Duration,
    entries: DashMap<String, CachedBytes>,
}

impl<S: RemoteSource> FetchCache<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Fetch through the cache. Absent resources are not cached.
    pub async fn fetch(&self, url: &str) -> anyhow::Result<Option<Arc<Vec<u8>>>> {
        if let Some(entry) = self.entries.get(url) {
            if entry.fetched_at.elapsed() < self.ttl {
                tracing::debug!(url, "fetch cache hit");
                return Ok(Some(Arc::clone(&entry.data)));
            }
            drop(entry);
            self.entries.remove(url);
        }

        let Some(bytes) = self.source.fetch_bytes(url).await? else {
            return Ok(None);
        };
        let data = Arc::new(bytes);
        self.entries.insert(
            url.to_string(),
            CachedBytes {
                data: Arc::clone(&data),
                fetched_at: Instant::now(),
            },
        );
        Ok(Some(data))
    }

    /// Drop every cached entry, expired or not.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteSource for CountingSource {
        async fn fetch_bytes(&self, url: &str) -> anyhow::Result<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.ends_with("missing") {
                return Ok(None);
            }
            Ok(Some(url.as_bytes().to_vec()))
        }
    }

    #[tokio::test]
    async fn test_cache_avoids_duplicate_downloads() {
        let cache = FetchCache::new(
            CountingSource {
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(60),
        );

        let first = cache.fetch("https://x/1.2.3.zip").await.unwrap().unwrap();
        let second = cache.fetch("https://x/1.2.3.zip").await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_absent_resources_are_not_cached() {
        let cache = FetchCache::new(
            CountingSource {
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(60),
        );

        assert!(cache.fetch("https://x/missing").await.unwrap().is_none());
        assert!(cache.fetch("https://x/missing").await.unwrap().is_none());
        assert_eq!(cache.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_refetch() {
        let cache = FetchCache::new(
            CountingSource {
                calls: AtomicUsize::new(0),
            },
            Duration::from_millis(0),
        );

        cache.fetch("https://x/a.zip").await.unwrap();
        cache.fetch("https://x/a.zip").await.unwrap();
        assert_eq!(cache.source.calls.load(Ordering::SeqCst), 2);
    }
}
