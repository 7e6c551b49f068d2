//! Text-generation client for the triage pipeline.
//!
//! [`GenerationClient`] wraps any [`GenerationBackend`] with exact-argument
//! memoization and a bounded per-call timeout, and turns every call into a
//! [`GenerationRecord`] for the audit trail. It never retries: a failed call is
//! surfaced to the caller as-is.

mod openai;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use triage_shared::{BackendFailure, CacheKey, CallCache, GenerationRecord, Result, TriageError};

pub use openai::OpenAiBackend;

/// Default completion budget for a stage.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Default bound on a single backend call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// One completion request, fully specified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// What a backend returns: the generated text plus its raw response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub raw: serde_json::Value,
}

/// A text-generation service.
///
/// Implementations must map failures onto [`TriageError::GenerationBackend`]
/// (with the matching [`BackendFailure`]) or [`TriageError::GenerationQuotaExceeded`].
pub trait GenerationBackend: Send + Sync {
    /// Identifies the backend and model; part of the memoization key.
    fn name(&self) -> &str;

    fn complete(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<Completion>> + Send;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Memoizing, time-bounded wrapper around a [`GenerationBackend`].
pub struct GenerationClient<B> {
    backend: B,
    cache: Arc<dyn CallCache<Completion>>,
    temperature: f32,
    top_p: f32,
    timeout: Duration,
}

impl<B: GenerationBackend> GenerationClient<B> {
    pub fn new(backend: B, cache: Arc<dyn CallCache<Completion>>) -> Self {
        Self {
            backend,
            cache,
            temperature: 0.7,
            top_p: 1.0,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the sampling parameters sent with every request.
    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Generate a completion for `prompt` within `max_tokens`.
    ///
    /// Identical arguments within the cache's lifetime are served from the cache.
    #[instrument(skip_all, fields(backend = self.backend.name(), max_tokens = max_tokens, prompt_len = prompt.len()))]
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<GenerationRecord> {
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        };
        let key = self.cache_key(&request);

        let completion = match self.cache.get(&key) {
            Some(hit) => hit,
            None => {
                let completion = self.call_backend(&request).await?;
                self.cache.put(key, completion.clone());
                completion
            }
        };

        debug!(text_len = completion.text.len(), "generation complete");

        Ok(GenerationRecord {
            prompt: request.prompt,
            max_tokens,
            text: completion.text,
            raw_output: completion.raw,
        })
    }

    async fn call_backend(&self, request: &GenerationRequest) -> Result<Completion> {
        match tokio::time::timeout(self.timeout, self.backend.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(TriageError::generation(
                BackendFailure::Timeout,
                format!("no response within {}s", self.timeout.as_secs_f32()),
            )),
        }
    }

    fn cache_key(&self, request: &GenerationRequest) -> CacheKey {
        CacheKey::new(
            "generate",
            &[
                self.backend.name(),
                &request.prompt,
                &request.max_tokens.to_string(),
                &request.temperature.to_string(),
                &request.top_p.to_string(),
            ],
        )
    }
}
