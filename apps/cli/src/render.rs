//! Human-readable and JSON rendering of triage results.

use std::fmt::Write as _;

use triage_core::StageFailure;
use triage_shared::{GenerationRecord, TicketTriage};

/// The six numbered sections of a completed triage, as Markdown.
pub(crate) fn render_text(triage: &TicketTriage, show_prompts: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Triage {}\n", triage.run_id);

    let c = &triage.classification;
    let _ = writeln!(out, "## 1. Engineering Team\n");
    let _ = writeln!(out, "**Team:** {}", c.team);
    let _ = writeln!(out, "**Rationale:** {}\n", c.rationale);
    if show_prompts {
        details(&mut out, &c.log);
    }

    let _ = writeln!(out, "## 2. Search Queries\n");
    for query in &triage.search_queries.queries {
        let _ = writeln!(out, "- {query}");
    }
    out.push('\n');
    if show_prompts {
        details(&mut out, &triage.search_queries.log);
    }

    let docs = &triage.documentation_preview;
    let _ = writeln!(out, "## 3. Relevant Documentation\n");
    if docs.hits.is_empty() {
        let _ = writeln!(out, "_No documentation found._\n");
    } else {
        out.push_str(&docs.to_markdown());
    }
    if show_prompts {
        for log in &docs.raw_search_logs {
            let _ = writeln!(out, "### Search results for \"{}\"\n", log.query);
            json_block(&mut out, &log.raw_response);
        }
    }

    let sections = [
        ("4. Refined Documentation", &triage.refined_documentation),
        ("5. Checklist Screening", &triage.checklist_screening),
        ("6. Final Response", &triage.final_response),
    ];
    for (title, response) in sections {
        let _ = writeln!(out, "## {title}\n");
        let _ = writeln!(out, "{}\n", response.text);
        if show_prompts {
            details(&mut out, &response.log);
        }
    }

    out
}

/// Stage, kind and trigger of a failed run.
pub(crate) fn render_failure(failure: &StageFailure) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Triage failed at stage {} ({}): {}",
        failure.stage.number(),
        failure.stage,
        failure.stage.label()
    );
    let _ = writeln!(out, "  kind:  {}", failure.kind());
    let _ = writeln!(out, "  error: {}", failure.error);
    if let Some(prompt) = &failure.prompt {
        let _ = writeln!(out, "\n--- prompt ---\n{prompt}");
    }
    if let Some(raw) = &failure.raw_output {
        let _ = writeln!(out, "\n--- raw output ---\n{raw}");
    }
    out
}

pub(crate) fn failure_json(failure: &StageFailure) -> serde_json::Value {
    serde_json::json!({
        "stage": failure.stage,
        "kind": failure.kind(),
        "message": failure.error.to_string(),
        "prompt": failure.prompt,
        "raw_output": failure.raw_output,
    })
}

fn details(out: &mut String, log: &GenerationRecord) {
    let _ = writeln!(out, "### Prompt\n\n```text\n{}\n```\n", log.prompt.trim_end());
    let _ = writeln!(out, "### Backend response\n");
    json_block(out, &log.raw_output);
}

fn json_block(out: &mut String, value: &serde_json::Value) {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    let _ = writeln!(out, "```json\n{pretty}\n```\n");
}

#[cfg(test)]
mod tests {
    use fixture::triage;
    use triage_shared::{Stage, TriageError};

    use super::*;

    /// Builds a finished triage without touching any backend.
    mod fixture {
        use triage_shared::{
            DocumentHit, DocumentationPreview, GenerationRecord, RunId, SearchLog,
            SearchQueryList, TicketClassification, TicketTriage, UnstructuredResponse,
        };

        fn record(prompt: &str, text: &str) -> GenerationRecord {
            GenerationRecord {
                prompt: prompt.into(),
                max_tokens: 512,
                text: text.into(),
                raw_output: serde_json::json!({ "choices": [{ "text": text }] }),
            }
        }

        fn response(prompt: &str, text: &str) -> UnstructuredResponse {
            UnstructuredResponse {
                text: text.into(),
                log: record(prompt, text),
            }
        }

        pub(super) fn triage() -> TicketTriage {
            let now = "2026-01-05T10:00:00Z".parse().unwrap();
            TicketTriage {
                run_id: RunId::new(),
                started_at: now,
                finished_at: now,
                ticket: "keyword order changes results".into(),
                classification: TicketClassification {
                    team: "WATSON".into(),
                    rationale: "Ranking.".into(),
                    log: record("classify prompt", "{}"),
                },
                search_queries: SearchQueryList {
                    queries: vec!["location filter".into(), "keyword order".into()],
                    log: record("queries prompt", "{}"),
                },
                documentation_preview: DocumentationPreview {
                    hits: vec![DocumentHit {
                        title: "Filters".into(),
                        url: "https://docs/filters".into(),
                        body_preview: "How filters work".into(),
                    }],
                    raw_search_logs: vec![
                        SearchLog {
                            query: "location filter".into(),
                            raw_response: serde_json::json!({ "q": 1 }),
                        },
                        SearchLog {
                            query: "keyword order".into(),
                            raw_response: serde_json::json!({ "q": 2 }),
                        },
                    ],
                },
                refined_documentation: response("refine prompt", "Use the filters guide."),
                checklist_screening: response("checklist prompt", "All items present."),
                final_response: response("compose prompt", "Hi there!"),
            }
        }
    }

    #[test]
    fn text_has_six_numbered_sections() {
        let text = render_text(&triage(), false);
        for heading in [
            "## 1. Engineering Team",
            "## 2. Search Queries",
            "## 3. Relevant Documentation",
            "## 4. Refined Documentation",
            "## 5. Checklist Screening",
            "## 6. Final Response",
        ] {
            assert!(text.contains(heading), "missing {heading}");
        }
        assert!(text.contains("**Team:** WATSON"));
        assert!(text.contains("- keyword order"));
        assert!(text.contains("##### 1. [Filters](https://docs/filters)"));
        assert!(!text.contains("### Prompt"));
    }

    #[test]
    fn show_prompts_includes_each_query_own_results() {
        let text = render_text(&triage(), true);
        assert!(text.contains("compose prompt"));
        let first = text.find("### Search results for \"location filter\"").unwrap();
        let second = text.find("### Search results for \"keyword order\"").unwrap();
        assert!(first < second);
        assert!(text[first..second].contains("\"q\": 1"));
        assert!(text[second..].contains("\"q\": 2"));
    }

    fn failure() -> StageFailure {
        let error = TriageError::MalformedClassification {
            reason: "invalid JSON".into(),
            raw_output: "Watson, probably".into(),
        };
        StageFailure {
            stage: Stage::Classify,
            raw_output: error.raw_output().map(str::to_string),
            error,
            prompt: Some("route this ticket".into()),
        }
    }

    #[test]
    fn failure_text_names_stage_kind_and_trigger() {
        let text = render_failure(&failure());
        assert!(text.contains("stage 1 (Classify)"));
        assert!(text.contains("route this ticket"));
        assert!(text.contains("Watson, probably"));
    }

    #[test]
    fn failure_json_is_machine_readable() {
        let value = failure_json(&failure());
        assert_eq!(value["stage"], "classify");
        assert_eq!(value["prompt"], "route this ticket");
        assert_eq!(value["raw_output"], "Watson, probably");
    }
}
