//! End-to-end triage: classify → queries → lookup → refine → screen → compose.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use triage_generation::{GenerationBackend, GenerationClient};
use triage_prompts::TemplateStore;
use triage_search::{ResultFormatter, SearchBackend, SearchClient};
use triage_shared::{AppConfig, ErrorKind, RunId, Stage, TicketTriage, TriageError};

use crate::resources::{ChecklistStore, TeamRoster};
use crate::stages::{self, ComposeInputs};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Per-run knobs, usually taken from the `[generation]` and `[pipeline]` config sections.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_tokens: u32,
    pub compose_max_tokens: u32,
    pub max_queries: usize,
    pub max_results_per_query: usize,
    /// Strip newlines from the composition prompt.
    pub compact_final_prompt: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            compose_max_tokens: 1000,
            max_queries: 3,
            max_results_per_query: 3,
            compact_final_prompt: true,
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_tokens: config.generation.max_tokens,
            compose_max_tokens: config.generation.compose_max_tokens,
            max_queries: config.pipeline.max_queries,
            max_results_per_query: config.pipeline.max_results_per_query,
            compact_final_prompt: config.pipeline.compact_final_prompt,
        }
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// A run that stopped at `stage`. No partial [`TicketTriage`] is produced.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: TriageError,
    /// The prompt that was sent, when the stage got that far.
    pub prompt: Option<String>,
    /// Offending model output, for parse failures.
    pub raw_output: Option<String>,
}

impl StageFailure {
    fn new(stage: Stage, error: TriageError, prompt: Option<String>) -> Self {
        let raw_output = error.raw_output().map(str::to_string);
        Self {
            stage,
            error,
            prompt,
            raw_output,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Attach `stage` to an error raised before anything was sent.
fn failed(stage: Stage) -> impl FnOnce(TriageError) -> StageFailure {
    move |error| StageFailure::new(stage, error, None)
}

/// Attach `stage` and the prompt that was sent to a stage error.
fn failed_after(stage: Stage, prompt: &str) -> impl FnOnce(TriageError) -> StageFailure {
    let prompt = prompt.to_string();
    move |error| StageFailure::new(stage, error, Some(prompt))
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting stage transitions.
pub trait TriageProgress: Send + Sync {
    fn stage_started(&self, stage: Stage);
    fn stage_finished(&self, stage: Stage, elapsed: Duration);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl TriageProgress for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _stage: Stage, _elapsed: Duration) {}
}

/// Times one stage and reports it.
struct StageTimer<'a> {
    stage: Stage,
    started: std::time::Instant,
    progress: &'a dyn TriageProgress,
}

impl<'a> StageTimer<'a> {
    fn start(stage: Stage, progress: &'a dyn TriageProgress) -> Self {
        progress.stage_started(stage);
        Self {
            stage,
            started: std::time::Instant::now(),
            progress,
        }
    }

    fn finish(self) {
        self.progress.stage_finished(self.stage, self.started.elapsed());
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Everything a triage run needs. Holds no per-run state, so one pipeline can
/// serve many tickets concurrently; the clients' caches are the only shared
/// mutable state.
pub struct TriagePipeline<G, S> {
    generation: GenerationClient<G>,
    search: SearchClient<S>,
    prompts: TemplateStore,
    roster: TeamRoster,
    checklists: ChecklistStore,
    formatter: ResultFormatter,
    settings: PipelineSettings,
}

impl<G: GenerationBackend, S: SearchBackend> TriagePipeline<G, S> {
    pub fn new(
        generation: GenerationClient<G>,
        search: SearchClient<S>,
        prompts: TemplateStore,
        roster: TeamRoster,
        checklists: ChecklistStore,
    ) -> Self {
        Self {
            generation,
            search,
            prompts,
            roster,
            checklists,
            formatter: ResultFormatter::default(),
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_formatter(mut self, formatter: ResultFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn generation(&self) -> &GenerationClient<G> {
        &self.generation
    }

    pub fn search(&self) -> &SearchClient<S> {
        &self.search
    }

    pub fn roster(&self) -> &TeamRoster {
        &self.roster
    }

    /// Triage `ticket` without progress reporting.
    pub async fn triage(&self, ticket: &str) -> Result<TicketTriage, StageFailure> {
        self.triage_with_progress(ticket, &SilentProgress).await
    }

    /// Run all six stages in order. The first failure ends the run.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, ticket_len = ticket.len()))]
    pub async fn triage_with_progress(
        &self,
        ticket: &str,
        progress: &dyn TriageProgress,
    ) -> Result<TicketTriage, StageFailure> {
        let run_id = RunId::new();
        tracing::Span::current().record("run_id", tracing::field::display(&run_id));
        let started_at = Utc::now();
        let settings = &self.settings;

        let ticket = ticket.trim();
        if ticket.is_empty() {
            return Err(failed(Stage::Classify)(TriageError::validation(
                "ticket text is empty",
            )));
        }

        info!(%run_id, "starting triage");

        // --- Stage 1: Classify ---
        let timer = StageTimer::start(Stage::Classify, progress);
        let prompt = stages::classify_prompt(&self.prompts, &self.roster, ticket)
            .map_err(failed(Stage::Classify))?;
        let classification =
            stages::classify(&self.generation, &self.roster, &prompt, settings.max_tokens)
                .await
                .map_err(failed_after(Stage::Classify, &prompt))?;
        timer.finish();
        info!(team = %classification.team, "classified");

        // --- Stage 2: Generate queries ---
        let timer = StageTimer::start(Stage::GenerateQueries, progress);
        let prompt = stages::queries_prompt(&self.prompts, ticket)
            .map_err(failed(Stage::GenerateQueries))?;
        let search_queries = stages::generate_queries(
            &self.generation,
            &prompt,
            settings.max_tokens,
            settings.max_queries,
        )
        .await
        .map_err(failed_after(Stage::GenerateQueries, &prompt))?;
        timer.finish();

        // --- Stage 3: Lookup documentation ---
        let timer = StageTimer::start(Stage::LookupDocumentation, progress);
        let documentation_preview = stages::lookup_documentation(
            &self.search,
            &self.formatter,
            &search_queries,
            settings.max_results_per_query,
        )
        .await
        .map_err(failed(Stage::LookupDocumentation))?;
        timer.finish();
        if documentation_preview.hits.is_empty() {
            warn!("search returned no documentation");
        }

        // --- Stage 4: Refine documentation ---
        let timer = StageTimer::start(Stage::RefineDocumentation, progress);
        let prompt = stages::refine_prompt(&self.prompts, ticket, &documentation_preview)
            .map_err(failed(Stage::RefineDocumentation))?;
        let refined_documentation =
            stages::complete_text(&self.generation, &prompt, settings.max_tokens)
                .await
                .map_err(failed_after(Stage::RefineDocumentation, &prompt))?;
        timer.finish();

        // --- Stage 5: Screen checklist ---
        let timer = StageTimer::start(Stage::ScreenChecklist, progress);
        let checklist = self
            .checklists
            .checklist_for(&classification.team)
            .map_err(failed(Stage::ScreenChecklist))?;
        let prompt =
            stages::checklist_prompt(&self.prompts, ticket, &classification.team, &checklist)
                .map_err(failed(Stage::ScreenChecklist))?;
        let checklist_screening =
            stages::complete_text(&self.generation, &prompt, settings.max_tokens)
                .await
                .map_err(failed_after(Stage::ScreenChecklist, &prompt))?;
        timer.finish();

        // --- Stage 6: Compose response ---
        let timer = StageTimer::start(Stage::ComposeResponse, progress);
        let inputs = ComposeInputs {
            ticket,
            team: &classification.team,
            checklist: &checklist,
            refined_documentation: &refined_documentation.text,
            screening: &checklist_screening.text,
        };
        let prompt = stages::response_prompt(&self.prompts, &inputs, settings.compact_final_prompt)
            .map_err(failed(Stage::ComposeResponse))?;
        let final_response =
            stages::complete_text(&self.generation, &prompt, settings.compose_max_tokens)
                .await
                .map_err(failed_after(Stage::ComposeResponse, &prompt))?;
        timer.finish();

        info!(%run_id, hits = documentation_preview.hits.len(), "triage complete");

        Ok(TicketTriage {
            run_id,
            started_at,
            finished_at: Utc::now(),
            ticket: ticket.to_string(),
            classification,
            search_queries,
            documentation_preview,
            refined_documentation,
            checklist_screening,
            final_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use triage_generation::{Completion, GenerationRequest};
    use triage_search::SearchResponse;
    use triage_shared::{MemoryCache, NoopCache, UNKNOWN_TEAM};

    use super::*;

    const TICKET: &str = "Search results differ based on keyword order for location filtering";

    /// Replies from a script, one entry per call; counts calls and keeps prompts.
    struct ScriptedGeneration {
        replies: Mutex<VecDeque<Result<String, TriageError>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedGeneration {
        fn new(replies: Vec<Result<String, TriageError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn ok(replies: &[&str]) -> Self {
            Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
        }
    }

    impl GenerationBackend for ScriptedGeneration {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &GenerationRequest) -> triage_shared::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("(script exhausted)".into()))?;
            Ok(Completion {
                raw: json!({ "choices": [{ "text": reply }] }),
                text: reply,
            })
        }
    }

    #[derive(Clone, Copy)]
    enum SearchMode {
        Typed,
        Untyped,
        Down,
    }

    /// Returns `per_query` results for any query; counts calls.
    struct FakeSearch {
        per_query: usize,
        mode: SearchMode,
        calls: AtomicUsize,
    }

    impl FakeSearch {
        fn new(per_query: usize) -> Self {
            Self::with_mode(per_query, SearchMode::Typed)
        }

        fn with_mode(per_query: usize, mode: SearchMode) -> Self {
            Self {
                per_query,
                mode,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SearchBackend for FakeSearch {
        fn name(&self) -> &str {
            "fake"
        }

        async fn search(&self, query: &str) -> triage_shared::Result<SearchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let results: Vec<serde_json::Value> = match self.mode {
                SearchMode::Down => return Err(TriageError::search("503 Service Unavailable")),
                SearchMode::Untyped => (0..self.per_query)
                    .map(|i| json!({ "data": { "name": format!("{query} #{i}") } }))
                    .collect(),
                SearchMode::Typed => (0..self.per_query)
                    .map(|i| {
                        json!({ "data": {
                            "type": "ce_hhGuide",
                            "name": format!("{query} #{i}"),
                            "shortDescription": "## Filters\nHow location filters rank results.",
                            "landingPageUrl": format!("https://hitchhikers.yext.com/guides/{i}")
                        }})
                    })
                    .collect(),
            };
            Ok(SearchResponse {
                raw: json!({ "response": { "results": results.clone() } }),
                results,
            })
        }
    }

    fn happy_script() -> Vec<&'static str> {
        vec![
            r#"{"team": "WATSON", "rationale": "This is about search ranking."}"#,
            r#"{"searchQueries": ["keyword order ranking", "location filter search"]}"#,
            "1. Filters guide is the most relevant.",
            "The ticket includes the search query and the experience.",
            "Hi! Location filters rank by ...",
        ]
    }

    fn pipeline(
        generation: ScriptedGeneration,
        search: FakeSearch,
        checklists: &std::path::Path,
    ) -> TriagePipeline<ScriptedGeneration, FakeSearch> {
        TriagePipeline::new(
            GenerationClient::new(generation, Arc::new(MemoryCache::new())),
            SearchClient::new(search, Arc::new(MemoryCache::new())),
            TemplateStore::builtin(),
            TeamRoster::builtin(),
            ChecklistStore::new(checklists),
        )
    }

    /// Records stage events in order.
    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<(Stage, bool)>>,
    }

    impl TriageProgress for RecordingProgress {
        fn stage_started(&self, stage: Stage) {
            self.events.lock().unwrap().push((stage, false));
        }
        fn stage_finished(&self, stage: Stage, _elapsed: Duration) {
            self.events.lock().unwrap().push((stage, true));
        }
    }

    #[tokio::test]
    async fn end_to_end_search_ranking_ticket() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("watson.md"), "- Experience key\n- Search query").unwrap();

        let p = pipeline(ScriptedGeneration::ok(&happy_script()), FakeSearch::new(5), dir.path());
        let progress = RecordingProgress::default();
        let triage = p.triage_with_progress(TICKET, &progress).await.unwrap();

        assert_eq!(triage.classification.team, "WATSON");
        assert!(!triage.classification.rationale.is_empty());

        let queries = &triage.search_queries.queries;
        assert!(!queries.is_empty() && queries.len() <= 3);

        let hits = &triage.documentation_preview.hits;
        assert!(hits.len() <= 3 * queries.len());
        assert_eq!(hits.len(), 6);
        assert_eq!(hits[0].title, "keyword order ranking #0");
        assert_eq!(hits[3].title, "location filter search #0");
        assert_eq!(triage.documentation_preview.raw_search_logs.len(), 2);

        assert!(!triage.final_response.text.is_empty());
        assert!(triage.finished_at >= triage.started_at);
        assert_eq!(p.generation().backend().calls.load(Ordering::SeqCst), 5);

        // Checklist reaches both the screening and composition prompts.
        let prompts = p.generation().backend().prompts.lock().unwrap().clone();
        assert!(prompts[3].contains("Experience key"));
        assert!(prompts[4].contains("Experience key"));
        assert!(!prompts[4].contains('\n'));

        let events = progress.events.lock().unwrap().clone();
        let expected: Vec<(Stage, bool)> =
            Stage::ALL.iter().flat_map(|&s| [(s, false), (s, true)]).collect();
        assert_eq!(events, expected);
    }

    #[tokio::test]
    async fn quota_on_first_call_stops_at_classify() {
        let generation = ScriptedGeneration::new(vec![Err(TriageError::GenerationQuotaExceeded {
            message: "429".into(),
        })]);
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(generation, FakeSearch::new(3), dir.path());

        let failure = p.triage(TICKET).await.unwrap_err();

        assert_eq!(failure.stage, Stage::Classify);
        assert_eq!(failure.kind(), ErrorKind::GenerationQuotaExceeded);
        assert!(failure.prompt.as_deref().is_some_and(|p| p.contains(TICKET)));
        assert_eq!(p.generation().backend().calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.search().backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_classification_surfaces_raw_output() {
        let generation = ScriptedGeneration::ok(&["I think Watson should take this."]);
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(generation, FakeSearch::new(3), dir.path());

        let failure = p.triage(TICKET).await.unwrap_err();

        assert_eq!(failure.stage, Stage::Classify);
        assert_eq!(failure.kind(), ErrorKind::MalformedClassification);
        assert_eq!(
            failure.raw_output.as_deref(),
            Some("I think Watson should take this.")
        );
        assert_eq!(p.generation().backend().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_query_list_fails_at_lookup() {
        let generation = ScriptedGeneration::ok(&[
            r#"{"team": "Unknown", "rationale": "Not clear."}"#,
            r#"{"searchQueries": []}"#,
        ]);
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(generation, FakeSearch::new(3), dir.path());

        let failure = p.triage(TICKET).await.unwrap_err();

        assert_eq!(failure.stage, Stage::LookupDocumentation);
        assert!(matches!(failure.error, TriageError::EmptyQueryList));
        assert_eq!(p.search().backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn search_outage_fails_at_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            ScriptedGeneration::ok(&happy_script()),
            FakeSearch::with_mode(3, SearchMode::Down),
            dir.path(),
        );

        let failure = p.triage(TICKET).await.unwrap_err();

        assert_eq!(failure.stage, Stage::LookupDocumentation);
        assert_eq!(failure.kind(), ErrorKind::SearchBackendError);
        assert_eq!(p.search().backend().calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.generation().backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn untyped_search_result_fails_at_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(
            ScriptedGeneration::ok(&happy_script()),
            FakeSearch::with_mode(2, SearchMode::Untyped),
            dir.path(),
        );

        let failure = p.triage(TICKET).await.unwrap_err();

        assert_eq!(failure.stage, Stage::LookupDocumentation);
        assert!(matches!(failure.error, TriageError::MissingTypeField));
        assert_eq!(p.generation().backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn generation_failure_in_free_text_stages_names_stage_and_prompt() {
        let cases = [
            (2, Stage::RefineDocumentation),
            (3, Stage::ScreenChecklist),
            (4, Stage::ComposeResponse),
        ];
        for (ok_calls, stage) in cases {
            let mut script: Vec<Result<String, TriageError>> = happy_script()[..ok_calls]
                .iter()
                .map(|r| Ok(r.to_string()))
                .collect();
            script.push(Err(TriageError::generation(
                triage_shared::BackendFailure::Timeout,
                "timed out",
            )));
            let dir = tempfile::tempdir().unwrap();
            let p = pipeline(ScriptedGeneration::new(script), FakeSearch::new(1), dir.path());

            let failure = p.triage(TICKET).await.unwrap_err();

            assert_eq!(failure.stage, stage);
            assert_eq!(failure.kind(), ErrorKind::GenerationBackendError);
            let sent = p.generation().backend().prompts.lock().unwrap().clone();
            assert_eq!(sent.len(), ok_calls + 1);
            assert_eq!(failure.prompt.as_deref(), sent.last().map(String::as_str));
        }
    }

    #[tokio::test]
    async fn malformed_query_list_fails_at_generate_queries() {
        let generation = ScriptedGeneration::ok(&[
            r#"{"team": "FUSION", "rationale": "Front end."}"#,
            "location filters, keyword order",
        ]);
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(generation, FakeSearch::new(3), dir.path());

        let failure = p.triage(TICKET).await.unwrap_err();
        assert_eq!(failure.stage, Stage::GenerateQueries);
        assert_eq!(failure.kind(), ErrorKind::MalformedQueryList);
    }

    #[tokio::test]
    async fn unknown_team_screens_against_placeholder_checklist() {
        let mut script = happy_script();
        script[0] = r#"{"team": "Unknown", "rationale": "Not clear."}"#;
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(ScriptedGeneration::ok(&script), FakeSearch::new(1), dir.path());

        let triage = p.triage(TICKET).await.unwrap();
        assert_eq!(triage.classification.team, UNKNOWN_TEAM);
        assert!(triage.classification.is_unknown());

        let prompts = p.generation().backend().prompts.lock().unwrap().clone();
        assert!(prompts[3].contains(crate::resources::MISSING_CHECKLIST));
    }

    #[tokio::test]
    async fn empty_ticket_is_rejected_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(ScriptedGeneration::ok(&happy_script()), FakeSearch::new(1), dir.path());

        let failure = p.triage("   \n").await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Validation);
        assert_eq!(p.generation().backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_ticket_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(ScriptedGeneration::ok(&happy_script()), FakeSearch::new(2), dir.path());

        let first = p.triage(TICKET).await.unwrap();
        let second = p.triage(TICKET).await.unwrap();

        assert_eq!(first.final_response.text, second.final_response.text);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(p.generation().backend().calls.load(Ordering::SeqCst), 5);
        assert_eq!(p.search().backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn uncached_pipeline_calls_backends_every_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut script = happy_script();
        script.extend(happy_script());
        let p = TriagePipeline::new(
            GenerationClient::new(ScriptedGeneration::ok(&script), Arc::new(NoopCache)),
            SearchClient::new(FakeSearch::new(1), Arc::new(NoopCache)),
            TemplateStore::builtin(),
            TeamRoster::builtin(),
            ChecklistStore::new(dir.path()),
        );

        p.triage(TICKET).await.unwrap();
        p.triage(TICKET).await.unwrap();
        assert_eq!(p.generation().backend().calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn settings_cap_results_per_query() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(ScriptedGeneration::ok(&happy_script()), FakeSearch::new(5), dir.path())
            .with_settings(PipelineSettings {
                max_results_per_query: 1,
                ..PipelineSettings::default()
            });

        let triage = p.triage(TICKET).await.unwrap();
        assert_eq!(triage.documentation_preview.hits.len(), 2);
    }
}
