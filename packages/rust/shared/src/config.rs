//! Application configuration for ticket triage.
//!
//! User config lives at `~/.ticket-triage/triage.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "triage.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".ticket-triage";

// ---------------------------------------------------------------------------
// Config structs (matching triage.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Text-generation backend settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Document-search backend settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Pipeline tunables.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Team roster, checklists, and prompt template locations.
    #[serde(default)]
    pub resources: ResourcesConfig,
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,

    /// Completion model id.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Token budget for every stage except the final composition.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Token budget for the final composition stage.
    #[serde(default = "default_compose_max_tokens")]
    pub compose_max_tokens: u32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            api_key_env: default_generation_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            compose_max_tokens: default_compose_max_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_generation_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-3.5-turbo-instruct".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    512
}
fn default_compose_max_tokens() -> u32 {
    1000
}
fn default_generation_timeout() -> u64 {
    60
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Vertical query endpoint.
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Name of the env var holding the search API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_vertical_key")]
    pub vertical_key: String,

    #[serde(default = "default_experience_key")]
    pub experience_key: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    /// Experience version label (e.g. `PRODUCTION`, `STAGING`).
    #[serde(default = "default_version")]
    pub version: String,

    /// API version date sent as `v=`.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            api_key_env: default_search_key_env(),
            vertical_key: default_vertical_key(),
            experience_key: default_experience_key(),
            locale: default_locale(),
            version: default_version(),
            api_version: default_api_version(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_base_url() -> String {
    "https://liveapi.yext.com/v2/accounts/me/answers/vertical/query".into()
}
fn default_search_key_env() -> String {
    "YEXT_API_KEY".into()
}
fn default_vertical_key() -> String {
    "everything".into()
}
fn default_experience_key() -> String {
    "yext-help-hh-react".into()
}
fn default_locale() -> String {
    "en".into()
}
fn default_version() -> String {
    "PRODUCTION".into()
}
fn default_api_version() -> String {
    "20190101".into()
}
fn default_search_timeout() -> u64 {
    30
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Soft cap on generated search queries; extras are dropped.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Hits kept per query during documentation lookup.
    #[serde(default = "default_max_results")]
    pub max_results_per_query: usize,

    /// Character budget for each hit's body preview.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// Collapse the final composition prompt onto one line to save tokens.
    #[serde(default = "default_true")]
    pub compact_final_prompt: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queries: default_max_queries(),
            max_results_per_query: default_max_results(),
            preview_chars: default_preview_chars(),
            compact_final_prompt: true,
        }
    }
}

fn default_max_queries() -> usize {
    3
}
fn default_max_results() -> usize {
    3
}
fn default_preview_chars() -> usize {
    250
}
fn default_true() -> bool {
    true
}

/// `[resources]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Directory of `<team>.md` team descriptions.
    #[serde(default = "default_descriptions_dir")]
    pub team_descriptions_dir: PathBuf,

    /// Directory of `<team>.md` checklists.
    #[serde(default = "default_checklists_dir")]
    pub team_checklists_dir: PathBuf,

    /// Optional directory of `<template>.md` files overriding the built-in prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts_dir: Option<PathBuf>,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            team_descriptions_dir: default_descriptions_dir(),
            team_checklists_dir: default_checklists_dir(),
            prompts_dir: None,
        }
    }
}

fn default_descriptions_dir() -> PathBuf {
    PathBuf::from("team_descriptions")
}
fn default_checklists_dir() -> PathBuf {
    PathBuf::from("team_checklists")
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.ticket-triage/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| TriageError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.ticket-triage/triage.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TriageError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TriageError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TriageError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TriageError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TriageError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a non-empty API key from the named env var.
pub fn read_api_key(var_name: &str, service: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(TriageError::config(format!(
            "{service} API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that both backend API key env vars are set and non-empty.
pub fn validate_api_keys(config: &AppConfig) -> Result<()> {
    read_api_key(&config.generation.api_key_env, "Generation")?;
    read_api_key(&config.search.api_key_env, "Search")?;
    Ok(())
}
