//! Yext Answers vertical-query backend.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument, warn};

use triage_shared::{Result, SearchConfig, TriageError, read_api_key};

use crate::{SearchBackend, SearchResponse};

const USER_AGENT: &str = concat!("ticket-triage/", env!("CARGO_PKG_VERSION"));

/// Queries one vertical of one Answers experience.
pub struct YextBackend {
    client: Client,
    config: SearchConfig,
    api_key: String,
    label: String,
}

impl YextBackend {
    /// Build a backend from config, reading the key from `config.api_key_env`.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let api_key = read_api_key(&config.api_key_env, "Search")?;
        Self::new(config, api_key)
    }

    pub fn new(config: &SearchConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TriageError::search(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            label: format!(
                "yext:{}/{}/{}",
                config.experience_key, config.vertical_key, config.version
            ),
            config: config.clone(),
            api_key,
        })
    }
}

impl SearchBackend for YextBackend {
    fn name(&self) -> &str {
        &self.label
    }

    #[instrument(skip_all, fields(vertical = %self.config.vertical_key, query = %query))]
    async fn search(&self, query: &str) -> Result<SearchResponse> {
        let params = [
            ("api_key", self.api_key.as_str()),
            ("v", self.config.api_version.as_str()),
            ("input", query),
            ("experienceKey", self.config.experience_key.as_str()),
            ("verticalKey", self.config.vertical_key.as_str()),
            ("version", self.config.version.as_str()),
            ("locale", self.config.locale.as_str()),
        ];

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                // The URL carries the api key; keep it out of the message.
                let what = if e.is_timeout() { "timed out" } else { "request failed" };
                TriageError::search(format!("query '{query}' {what}: {}", e.without_url()))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "search request rejected");
            return Err(TriageError::search(format!(
                "query '{query}' returned HTTP {status}"
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TriageError::search(format!("undecodable search body: {e}")))?;

        let results = raw
            .pointer("/response/results")
            .and_then(|v| v.as_array())
            .cloned()
            .ok_or_else(|| TriageError::search("search body has no response.results"))?;

        debug!(results = results.len(), "search results received");
        Ok(SearchResponse { results, raw })
    }
}
