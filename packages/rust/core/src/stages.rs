//! The six pipeline stages.
//!
//! Generation-backed stages come in two halves: a `*_prompt` function that
//! renders the template, and an async function that sends the prompt and
//! validates the output. The orchestrator keeps the rendered prompt so a
//! failure can be reported together with what triggered it.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use triage_generation::{GenerationBackend, GenerationClient};
use triage_prompts::{TemplateStore, Variables, names};
use triage_search::{ResultFormatter, SearchBackend, SearchClient};
use triage_shared::{
    DocumentationPreview, Result, SearchLog, SearchQueryList, TicketClassification, TriageError,
    UnstructuredResponse,
};

use crate::resources::TeamRoster;

// ---------------------------------------------------------------------------
// Classify
// ---------------------------------------------------------------------------

pub fn classify_prompt(prompts: &TemplateStore, roster: &TeamRoster, ticket: &str) -> Result<String> {
    let descriptions = roster.descriptions_markdown();
    let vars = Variables::from([("team_descriptions", descriptions.as_str()), ("ticket_text", ticket)]);
    prompts.render(names::CLASSIFY, &vars)
}

#[instrument(skip_all, fields(max_tokens = max_tokens))]
pub async fn classify<G: GenerationBackend>(
    generation: &GenerationClient<G>,
    roster: &TeamRoster,
    prompt: &str,
    max_tokens: u32,
) -> Result<TicketClassification> {
    let log = generation.generate(prompt, max_tokens).await?;
    let (team, rationale) = parse_classification(&log.text, roster)?;
    debug!(%team, "ticket classified");
    Ok(TicketClassification {
        team,
        rationale,
        log,
    })
}

#[derive(Deserialize)]
struct RawClassification {
    team: String,
    rationale: String,
}

/// Parse `{"team": ..., "rationale": ...}` and canonicalize the team against `roster`.
pub fn parse_classification(text: &str, roster: &TeamRoster) -> Result<(String, String)> {
    let malformed = |reason: String| TriageError::MalformedClassification {
        reason,
        raw_output: text.to_string(),
    };

    let raw: RawClassification = first_json_object(text)
        .ok_or_else(|| malformed("no JSON object in output".into()))?
        .map_err(|e| malformed(format!("invalid JSON: {e}")))?;

    if raw.team.trim().is_empty() {
        return Err(malformed("team is empty".into()));
    }
    if raw.rationale.trim().is_empty() {
        return Err(malformed("rationale is empty".into()));
    }
    let team = roster
        .resolve(&raw.team)
        .ok_or_else(|| malformed(format!("'{}' is not a known team", raw.team.trim())))?;

    Ok((team.to_string(), raw.rationale.trim().to_string()))
}

// ---------------------------------------------------------------------------
// Generate queries
// ---------------------------------------------------------------------------

pub fn queries_prompt(prompts: &TemplateStore, ticket: &str) -> Result<String> {
    prompts.render(names::SEARCH_QUERIES, &Variables::from([("ticket_text", ticket)]))
}

/// Ask for search queries. An empty list is returned as-is; the lookup stage
/// rejects it.
#[instrument(skip_all, fields(max_tokens = max_tokens, max_queries = max_queries))]
pub async fn generate_queries<G: GenerationBackend>(
    generation: &GenerationClient<G>,
    prompt: &str,
    max_tokens: u32,
    max_queries: usize,
) -> Result<SearchQueryList> {
    let log = generation.generate(prompt, max_tokens).await?;
    let queries = parse_queries(&log.text, max_queries)?;
    debug!(count = queries.len(), "search queries generated");
    Ok(SearchQueryList { queries, log })
}

#[derive(Deserialize)]
struct RawQueries {
    #[serde(rename = "searchQueries", alias = "search_queries", alias = "queries")]
    queries: Vec<String>,
}

/// Parse `{"searchQueries": [...]}`, dropping blank entries and anything past `max_queries`.
pub fn parse_queries(text: &str, max_queries: usize) -> Result<Vec<String>> {
    let malformed = |reason: String| TriageError::MalformedQueryList {
        reason,
        raw_output: text.to_string(),
    };

    let raw: RawQueries = first_json_object(text)
        .ok_or_else(|| malformed("no JSON object in output".into()))?
        .map_err(|e| malformed(format!("invalid JSON: {e}")))?;

    let total = raw.queries.len();
    let mut queries: Vec<String> = raw
        .queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if queries.len() < total {
        warn!(dropped = total - queries.len(), "dropped blank search queries");
    }
    if queries.len() > max_queries {
        warn!(
            dropped = queries.len() - max_queries,
            max_queries, "too many search queries, keeping the first ones"
        );
        queries.truncate(max_queries);
    }
    Ok(queries)
}

// ---------------------------------------------------------------------------
// Lookup documentation
// ---------------------------------------------------------------------------

/// Search every query in order and keep the top `max_results_per_query` hits of each.
///
/// Hits are not deduplicated across queries.
#[instrument(skip_all, fields(queries = queries.queries.len(), max_results_per_query = max_results_per_query))]
pub async fn lookup_documentation<S: SearchBackend>(
    search: &SearchClient<S>,
    formatter: &ResultFormatter,
    queries: &SearchQueryList,
    max_results_per_query: usize,
) -> Result<DocumentationPreview> {
    if queries.queries.is_empty() {
        return Err(TriageError::EmptyQueryList);
    }

    let mut preview = DocumentationPreview::default();
    for query in &queries.queries {
        let response = search.search(query).await?;
        for raw in response.results.iter().take(max_results_per_query) {
            preview.hits.push(formatter.to_hit(raw)?);
        }
        preview.raw_search_logs.push(SearchLog {
            query: query.clone(),
            raw_response: response.raw,
        });
    }

    debug!(hits = preview.hits.len(), "documentation collected");
    Ok(preview)
}

// ---------------------------------------------------------------------------
// Free-text stages
// ---------------------------------------------------------------------------

pub fn refine_prompt(
    prompts: &TemplateStore,
    ticket: &str,
    preview: &DocumentationPreview,
) -> Result<String> {
    let markdown = preview.to_markdown();
    let vars = Variables::from([("ticket_text", ticket), ("documentation_preview", markdown.as_str())]);
    prompts.render(names::REFINE, &vars)
}

pub fn checklist_prompt(
    prompts: &TemplateStore,
    ticket: &str,
    team: &str,
    checklist: &str,
) -> Result<String> {
    let vars = Variables::from([("team", team), ("ticket_text", ticket), ("checklist", checklist)]);
    prompts.render(names::CHECKLIST, &vars)
}

/// Inputs to the final composition prompt.
pub struct ComposeInputs<'a> {
    pub ticket: &'a str,
    pub team: &'a str,
    pub checklist: &'a str,
    pub refined_documentation: &'a str,
    pub screening: &'a str,
}

/// Render the composition prompt; `single_line` strips every newline.
pub fn response_prompt(
    prompts: &TemplateStore,
    inputs: &ComposeInputs<'_>,
    single_line: bool,
) -> Result<String> {
    let vars = Variables::from([
        ("ticket_text", inputs.ticket),
        ("team", inputs.team),
        ("refined_documentation", inputs.refined_documentation),
        ("checklist", inputs.checklist),
        ("screening", inputs.screening),
    ]);
    if single_line {
        prompts.render_single_line(names::RESPONSE, &vars)
    } else {
        prompts.render(names::RESPONSE, &vars)
    }
}

/// Send `prompt` and keep the output as free text.
pub async fn complete_text<G: GenerationBackend>(
    generation: &GenerationClient<G>,
    prompt: &str,
    max_tokens: u32,
) -> Result<UnstructuredResponse> {
    let log = generation.generate(prompt, max_tokens).await?;
    Ok(UnstructuredResponse {
        text: log.text.trim().to_string(),
        log,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Decode the first JSON value starting at the first `{`, ignoring whatever
/// surrounds it. `None` when the output has no `{` at all.
fn first_json_object<T: DeserializeOwned>(text: &str) -> Option<serde_json::Result<T>> {
    let start = text.find('{')?;
    serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<T>()
        .next()
}
