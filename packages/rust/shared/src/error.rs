//! Error types for ticket triage.
//!
//! Library crates use [`TriageError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Why a call to the generation backend failed (other than rate limiting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFailure {
    /// Credentials were rejected (HTTP 401/403).
    Auth,
    /// The request never produced a response (DNS, connect, TLS, reset).
    Transport,
    /// The bounded call timeout elapsed.
    Timeout,
    /// The backend answered, but with a non-success status or an undecodable body.
    Response,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Response => "response",
        };
        f.write_str(s)
    }
}

/// Top-level error type for all triage operations.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    /// The named prompt template could not be located.
    #[error("template '{name}' not found")]
    TemplateMissing { name: String },

    /// A template references a variable the caller did not supply.
    #[error("template '{template}' references missing variable '{variable}'")]
    TemplateVariableMissing { template: String, variable: String },

    /// Model output for the classification stage was not `{team, rationale}`.
    #[error("malformed classification: {reason}")]
    MalformedClassification { reason: String, raw_output: String },

    /// Model output for the query stage was not `{searchQueries: [...]}`.
    #[error("malformed query list: {reason}")]
    MalformedQueryList { reason: String, raw_output: String },

    /// The query stage produced no usable queries.
    #[error("query list is empty, nothing to search for")]
    EmptyQueryList,

    /// A raw search result carries no content-type discriminator.
    #[error("search result has no type field")]
    MissingTypeField,

    /// Generation backend transport, auth, timeout, or response failure.
    #[error("generation backend error ({reason}): {message}")]
    GenerationBackend {
        reason: BackendFailure,
        message: String,
    },

    /// The generation backend signalled rate limiting or an exhausted quota.
    #[error("generation quota exceeded: {message}")]
    GenerationQuotaExceeded { message: String },

    /// Search backend transport or response failure (timeouts included).
    #[error("search backend error: {message}")]
    SearchBackend { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Rejected caller input.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TriageError>;

/// Field-less discriminant of [`TriageError`], for display and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    TemplateMissing,
    TemplateVariableMissing,
    MalformedClassification,
    MalformedQueryList,
    EmptyQueryList,
    MissingTypeField,
    GenerationBackendError,
    GenerationQuotaExceeded,
    SearchBackendError,
    Config,
    Io,
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl TriageError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a generation backend error.
    pub fn generation(reason: BackendFailure, msg: impl Into<String>) -> Self {
        Self::GenerationBackend {
            reason,
            message: msg.into(),
        }
    }

    /// Create a search backend error.
    pub fn search(msg: impl Into<String>) -> Self {
        Self::SearchBackend {
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TemplateMissing { .. } => ErrorKind::TemplateMissing,
            Self::TemplateVariableMissing { .. } => ErrorKind::TemplateVariableMissing,
            Self::MalformedClassification { .. } => ErrorKind::MalformedClassification,
            Self::MalformedQueryList { .. } => ErrorKind::MalformedQueryList,
            Self::EmptyQueryList => ErrorKind::EmptyQueryList,
            Self::MissingTypeField => ErrorKind::MissingTypeField,
            Self::GenerationBackend { .. } => ErrorKind::GenerationBackendError,
            Self::GenerationQuotaExceeded { .. } => ErrorKind::GenerationQuotaExceeded,
            Self::SearchBackend { .. } => ErrorKind::SearchBackendError,
            Self::Config { .. } => ErrorKind::Config,
            Self::Io { .. } => ErrorKind::Io,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    /// The model text that failed to parse, for structural parse failures.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::MalformedClassification { raw_output, .. }
            | Self::MalformedQueryList { raw_output, .. } => Some(raw_output),
            _ => None,
        }
    }
}
