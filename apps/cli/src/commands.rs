//! CLI command definitions, routing, and tracing setup.

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use triage_core::{
    ChecklistStore, PipelineSettings, StageFailure, TeamRoster, TriagePipeline, TriageProgress,
};
use triage_generation::{GenerationClient, OpenAiBackend};
use triage_prompts::TemplateStore;
use triage_search::{ResultFormatter, SearchClient, YextBackend};
use triage_shared::{
    AppConfig, MemoryCache, Stage, TicketTriage, init_config, load_config, load_config_from,
    validate_api_keys,
};

use crate::render;

const SAMPLE_TICKET: &str = include_str!("sample_ticket.md");

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Ticket triage: route a support ticket, find documentation, draft a reply.
#[derive(Parser)]
#[command(
    name = "triage",
    version,
    about = "Triage support tickets with a text-generation model and documentation search.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.ticket-triage/triage.toml.
    #[arg(long, global = true, env = "TRIAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Result output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Triage one ticket.
    Run {
        /// Ticket text. Read from --file or stdin when omitted.
        ticket: Option<String>,

        /// Read the ticket from a file.
        #[arg(short, long, conflicts_with = "ticket")]
        file: Option<PathBuf>,

        /// Triage the built-in sample ticket.
        #[arg(long, conflicts_with_all = ["ticket", "file"])]
        sample: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include every prompt and raw backend response.
        #[arg(long)]
        show_prompts: bool,
    },

    /// Triage several ticket files concurrently.
    Batch {
        /// Ticket files, one ticket per file.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "triage=warn",
        1 => "triage=info",
        2 => "triage=debug",
        _ => "triage=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run {
            ticket,
            file,
            sample,
            format,
            show_prompts,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            let ticket = read_ticket(ticket, file.as_deref(), sample)?;
            cmd_run(&config, &ticket, format, show_prompts).await
        }
        Command::Batch { files, format } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_batch(&config, &files, format).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn read_ticket(ticket: Option<String>, file: Option<&Path>, sample: bool) -> Result<String> {
    if sample {
        return Ok(SAMPLE_TICKET.to_string());
    }
    if let Some(text) = ticket {
        return Ok(text);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read ticket file '{}': {e}", path.display()));
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(eyre!(
            "no ticket given: pass it as an argument, with --file, on stdin, or use --sample"
        ));
    }
    let mut text = String::new();
    stdin.lock().read_to_string(&mut text)?;
    Ok(text)
}

type LivePipeline = TriagePipeline<OpenAiBackend, YextBackend>;

/// Wire the HTTP backends, caches and resources described by `config`.
fn build_pipeline(config: &AppConfig) -> Result<LivePipeline> {
    validate_api_keys(config)?;

    let generation = GenerationClient::new(
        OpenAiBackend::from_config(&config.generation)?,
        Arc::new(MemoryCache::new()),
    )
    .with_sampling(config.generation.temperature, config.generation.top_p)
    .with_timeout(Duration::from_secs(config.generation.timeout_secs));

    let search = SearchClient::new(
        YextBackend::from_config(&config.search)?,
        Arc::new(MemoryCache::new()),
    )
    .with_timeout(Duration::from_secs(config.search.timeout_secs));

    let resources = &config.resources;
    let prompts = match &resources.prompts_dir {
        Some(dir) => TemplateStore::with_overrides(dir),
        None => TemplateStore::builtin(),
    };
    let roster = TeamRoster::load(&resources.team_descriptions_dir)?;
    let checklists = ChecklistStore::new(&resources.team_checklists_dir);

    info!(teams = roster.teams().len(), model = %config.generation.model, "pipeline ready");

    Ok(TriagePipeline::new(generation, search, prompts, roster, checklists)
        .with_settings(PipelineSettings::from(config))
        .with_formatter(ResultFormatter::new(config.pipeline.preview_chars)))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    ticket: &str,
    format: OutputFormat,
    show_prompts: bool,
) -> Result<()> {
    let pipeline = build_pipeline(config)?;

    let reporter = CliProgress::new();
    let outcome = pipeline.triage_with_progress(ticket, &reporter).await;
    reporter.finish();

    match outcome {
        Ok(triage) => {
            print_triage(&triage, format, show_prompts)?;
            Ok(())
        }
        Err(failure) => {
            print_failure(&failure, format)?;
            Err(failure_summary(&failure))
        }
    }
}

async fn cmd_batch(config: &AppConfig, files: &[PathBuf], format: OutputFormat) -> Result<()> {
    let tickets = files
        .iter()
        .map(|path| {
            std::fs::read_to_string(path)
                .map(|text| (path, text))
                .map_err(|e| eyre!("cannot read ticket file '{}': {e}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let pipeline = build_pipeline(config)?;
    info!(tickets = tickets.len(), "starting batch");

    let runs = tickets.iter().map(|(_, text)| pipeline.triage(text));
    let outcomes = futures::future::join_all(runs).await;

    let mut failed = 0;
    for ((path, _), outcome) in tickets.iter().zip(outcomes) {
        if format == OutputFormat::Text {
            println!("==> {} <==\n", path.display());
        }
        match outcome {
            Ok(triage) => print_triage(&triage, format, false)?,
            Err(failure) => {
                failed += 1;
                print_failure(&failure, format)?;
            }
        }
    }

    if failed > 0 {
        return Err(eyre!("{failed} of {} tickets failed", tickets.len()));
    }
    Ok(())
}

fn print_triage(triage: &TicketTriage, format: OutputFormat, show_prompts: bool) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", render::render_text(triage, show_prompts)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(triage)?),
    }
    Ok(())
}

/// Exit error for a failed run. The details were already printed.
fn failure_summary(failure: &StageFailure) -> Report {
    eyre!(
        "triage failed at stage {} ({})",
        failure.stage.number(),
        failure.stage
    )
}

fn print_failure(failure: &StageFailure, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => eprintln!("{}", render::render_failure(failure)),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&render::failure_json(failure))?
        ),
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Stage spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl TriageProgress for CliProgress {
    fn stage_started(&self, stage: Stage) {
        self.spinner.set_message(format!(
            "Step {}/{}: {}",
            stage.number(),
            Stage::ALL.len(),
            stage.label()
        ));
    }

    fn stage_finished(&self, stage: Stage, elapsed: Duration) {
        self.spinner.println(format!(
            "  ✓ {} ({:.1}s)",
            stage.label(),
            elapsed.as_secs_f64()
        ));
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use triage_shared::TriageError;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_sample_and_json() {
        let cli = Cli::try_parse_from(["triage", "run", "--sample", "--format", "json"]).unwrap();
        match cli.command {
            Command::Run { sample, format, .. } => {
                assert!(sample);
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn sample_conflicts_with_inline_ticket() {
        assert!(Cli::try_parse_from(["triage", "run", "text", "--sample"]).is_err());
    }

    #[test]
    fn batch_requires_files() {
        assert!(Cli::try_parse_from(["triage", "batch"]).is_err());
        let cli = Cli::try_parse_from(["triage", "-vv", "batch", "a.txt", "b.txt"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn sample_ticket_is_used_verbatim() {
        let ticket = read_ticket(None, None, true).unwrap();
        assert!(ticket.contains("NLP Location Filter"));
    }

    #[test]
    fn failed_run_exit_error_does_not_repeat_details() {
        let error = TriageError::MalformedClassification {
            reason: "invalid JSON".into(),
            raw_output: "Watson, probably".into(),
        };
        let failure = StageFailure {
            stage: Stage::Classify,
            raw_output: error.raw_output().map(str::to_string),
            error,
            prompt: Some("route this ticket".into()),
        };

        let report = failure_summary(&failure);

        assert_eq!(report.to_string(), "triage failed at stage 1 (Classify)");
        assert_eq!(report.chain().count(), 1);
    }

    #[test]
    fn inline_ticket_wins_over_stdin() {
        let ticket = read_ticket(Some("hello".into()), None, false).unwrap();
        assert_eq!(ticket, "hello");
    }
}
