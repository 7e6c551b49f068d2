//! Core domain types for a triage run.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel team id for tickets the classifier could not route.
pub const UNKNOWN_TEAM: &str = "Unknown";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one triage run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the fixed six-step pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    GenerateQueries,
    LookupDocumentation,
    RefineDocumentation,
    ScreenChecklist,
    ComposeResponse,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Classify,
        Stage::GenerateQueries,
        Stage::LookupDocumentation,
        Stage::RefineDocumentation,
        Stage::ScreenChecklist,
        Stage::ComposeResponse,
    ];

    /// 1-based position in the pipeline.
    pub fn number(self) -> usize {
        match self {
            Self::Classify => 1,
            Self::GenerateQueries => 2,
            Self::LookupDocumentation => 3,
            Self::RefineDocumentation => 4,
            Self::ScreenChecklist => 5,
            Self::ComposeResponse => 6,
        }
    }

    /// Human-readable label for progress output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Classify => "Classifying engineering team",
            Self::GenerateQueries => "Generating search queries",
            Self::LookupDocumentation => "Searching documentation",
            Self::RefineDocumentation => "Refining documentation",
            Self::ScreenChecklist => "Checking ticket against checklist",
            Self::ComposeResponse => "Composing final response",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Stage records
// ---------------------------------------------------------------------------

/// Audit record of a single call to the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// The exact prompt sent.
    pub prompt: String,
    /// Token budget requested for the completion.
    pub max_tokens: u32,
    /// Generated text extracted from the response.
    pub text: String,
    /// The backend's response body, untouched.
    pub raw_output: serde_json::Value,
}

/// Which team a ticket should be routed to, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketClassification {
    /// A roster team id, or [`UNKNOWN_TEAM`].
    pub team: String,
    pub rationale: String,
    pub log: GenerationRecord,
}

impl TicketClassification {
    pub fn is_unknown(&self) -> bool {
        self.team.eq_ignore_ascii_case(UNKNOWN_TEAM)
    }
}

/// Documentation search queries proposed by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQueryList {
    /// Non-empty, trimmed queries in model order.
    pub queries: Vec<String>,
    pub log: GenerationRecord,
}

/// A single normalized search result ready for preview display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHit {
    pub title: String,
    pub url: String,
    pub body_preview: String,
}

/// The raw backend response for one documentation query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchLog {
    pub query: String,
    pub raw_response: serde_json::Value,
}

/// Aggregated top hits across all queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentationPreview {
    /// Query order, then within-query rank order. Not deduplicated.
    pub hits: Vec<DocumentHit>,
    /// One entry per query, in query order.
    pub raw_search_logs: Vec<SearchLog>,
}

impl DocumentationPreview {
    /// Render the hits as a numbered Markdown list, one heading per hit.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        for (i, hit) in self.hits.iter().enumerate() {
            let _ = writeln!(md, "##### {}. [{}]({})", i + 1, hit.title, hit.url);
            let _ = writeln!(md, "{}", hit.body_preview);
            md.push('\n');
        }
        md
    }
}

/// Output of any stage whose result is free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnstructuredResponse {
    pub text: String,
    pub log: GenerationRecord,
}

// ---------------------------------------------------------------------------
// TicketTriage
// ---------------------------------------------------------------------------

/// Everything one full pipeline run produced. Assembled once, at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTriage {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ticket: String,
    pub classification: TicketClassification,
    pub search_queries: SearchQueryList,
    pub documentation_preview: DocumentationPreview,
    pub refined_documentation: UnstructuredResponse,
    pub checklist_screening: UnstructuredResponse,
    pub final_response: UnstructuredResponse,
}
