//! OpenAI-compatible `/completions` backend.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use triage_shared::{BackendFailure, GenerationConfig, Result, TriageError, read_api_key};

use crate::{Completion, GenerationBackend, GenerationRequest};

const USER_AGENT: &str = concat!("ticket-triage/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in an error message.
const ERROR_BODY_CHARS: usize = 300;

/// Text completions over HTTP, against any OpenAI-compatible endpoint.
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    label: String,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

impl OpenAiBackend {
    /// Build a backend from config, reading the key from `config.api_key_env`.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = read_api_key(&config.api_key_env, "Generation")?;
        Self::new(config, api_key)
    }

    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                TriageError::generation(
                    BackendFailure::Transport,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            label: format!("openai:{}", config.model),
        })
    }
}

impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.label
    }

    #[instrument(skip_all, fields(model = %self.model, max_tokens = request.max_tokens))]
    async fn complete(&self, request: &GenerationRequest) -> Result<Completion> {
        let body = CompletionBody {
            model: &self.model,
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    BackendFailure::Timeout
                } else {
                    BackendFailure::Transport
                };
                TriageError::generation(reason, format!("{}: {e}", self.endpoint))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "generation request rejected");
            return Err(status_error(status, &text));
        }

        let raw: serde_json::Value = response.json().await.map_err(|e| {
            TriageError::generation(
                BackendFailure::Response,
                format!("undecodable completion body: {e}"),
            )
        })?;

        let text = raw
            .pointer("/choices/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TriageError::generation(
                    BackendFailure::Response,
                    "completion body has no choices[0].text",
                )
            })?
            .to_string();

        debug!(text_len = text.len(), "completion received");
        Ok(Completion { text, raw })
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> TriageError {
    let snippet: String = body.chars().take(ERROR_BODY_CHARS).collect();
    let message = format!("HTTP {status}: {snippet}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => TriageError::GenerationQuotaExceeded { message },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TriageError::generation(BackendFailure::Auth, message)
        }
        _ => TriageError::generation(BackendFailure::Response, message),
    }
}
