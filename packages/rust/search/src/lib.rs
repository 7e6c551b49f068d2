//! Document search for the triage pipeline.
//!
//! [`SearchClient`] memoizes and time-bounds calls to any [`SearchBackend`];
//! [`ResultFormatter`] turns the raw results into [`triage_shared::DocumentHit`]s.

pub mod formatter;
mod yext;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use triage_shared::{CacheKey, CallCache, Result, TriageError};

pub use formatter::{ContentType, DEFAULT_PREVIEW_CHARS, ELLIPSIS, ResultFormatter, get_preview};
pub use yext::YextBackend;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Ranked raw results for one query, plus the full response body for the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<serde_json::Value>,
    pub raw: serde_json::Value,
}

/// A document-search service. Failures map onto [`TriageError::SearchBackend`].
pub trait SearchBackend: Send + Sync {
    /// Identifies the backend and index; part of the memoization key.
    fn name(&self) -> &str;

    fn search(&self, query: &str) -> impl Future<Output = Result<SearchResponse>> + Send;
}

/// Memoizing, time-bounded wrapper around a [`SearchBackend`].
pub struct SearchClient<S> {
    backend: S,
    cache: Arc<dyn CallCache<SearchResponse>>,
    timeout: Duration,
}

impl<S: SearchBackend> SearchClient<S> {
    pub fn new(backend: S, cache: Arc<dyn CallCache<SearchResponse>>) -> Self {
        Self {
            backend,
            cache,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    #[instrument(skip_all, fields(backend = self.backend.name(), query = %query))]
    pub async fn search(&self, query: &str) -> Result<SearchResponse> {
        let key = CacheKey::new("search", &[self.backend.name(), query]);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let response = match tokio::time::timeout(self.timeout, self.backend.search(query)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(TriageError::search(format!(
                    "no response within {}s for query '{query}'",
                    self.timeout.as_secs_f32()
                )));
            }
        };

        debug!(results = response.results.len(), "search complete");
        self.cache.put(key, response.clone());
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use triage_shared::{MemoryCache, NoopCache};

    use super::*;

    struct CountingBackend {
        calls: AtomicUsize,
    }

    impl SearchBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        async fn search(&self, query: &str) -> Result<SearchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let results = vec![json!({ "data": { "type": "helpArticle", "name": query } })];
            Ok(SearchResponse {
                raw: json!({ "response": { "results": results.clone() } }),
                results,
            })
        }
    }

    struct HangingBackend;

    impl SearchBackend for HangingBackend {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn search(&self, _query: &str) -> Result<SearchResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(TriageError::search("unreachable"))
        }
    }

    fn counting() -> CountingBackend {
        CountingBackend {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn repeated_query_is_served_from_cache() {
        let client = SearchClient::new(counting(), Arc::new(MemoryCache::new()));
        let a = client.search("location filters").await.unwrap();
        let b = client.search("location filters").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(client.backend().calls.load(Ordering::SeqCst), 1);

        client.search("other").await.unwrap();
        assert_eq!(client.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn seeded_cache_skips_backend() {
        let seeded = SearchResponse {
            results: vec![],
            raw: json!({ "seeded": true }),
        };
        let key = CacheKey::new("search", &["counting", "q"]);
        let cache = MemoryCache::seeded([(key, seeded.clone())]);

        let client = SearchClient::new(counting(), Arc::new(cache));
        assert_eq!(client.search("q").await.unwrap(), seeded);
        assert_eq!(client.backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn noop_cache_disables_memoization() {
        let client = SearchClient::new(counting(), Arc::new(NoopCache));
        client.search("q").await.unwrap();
        client.search("q").await.unwrap();
        assert_eq!(client.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_is_search_backend_error() {
        let client = SearchClient::new(HangingBackend, Arc::new(NoopCache))
            .with_timeout(Duration::from_millis(20));
        let err = client.search("q").await.unwrap_err();
        assert!(matches!(err, TriageError::SearchBackend { .. }));
    }
}
