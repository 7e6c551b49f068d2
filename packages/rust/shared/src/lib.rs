//! Shared types, error model, configuration, and call cache for ticket triage.
//!
//! This crate is the foundation depended on by all other triage crates.
//! It provides:
//! - [`TriageError`], the unified error type
//! - Domain types ([`TicketTriage`], [`TicketClassification`], [`DocumentHit`], [`Stage`])
//! - Configuration ([`AppConfig`], config loading)
//! - [`CallCache`], the injectable memoization store used by the backend clients

pub mod cache;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use cache::{CacheKey, CacheStats, CallCache, MemoryCache, NoopCache};
pub use config::{
    AppConfig, GenerationConfig, PipelineConfig, ResourcesConfig, SearchConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, read_api_key,
    validate_api_keys,
};
pub use error::{BackendFailure, ErrorKind, Result, TriageError};
pub use types::{
    DocumentHit, DocumentationPreview, GenerationRecord, RunId, SearchLog, SearchQueryList, Stage,
    TicketClassification, TicketTriage, UNKNOWN_TEAM, UnstructuredResponse,
};
