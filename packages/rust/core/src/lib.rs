//! Pipeline stages and orchestration for ticket triage.
//!
//! This crate ties the prompt renderer, generation client and search client
//! together into the six-stage [`TriagePipeline`].

pub mod pipeline;
pub mod resources;
pub mod stages;

pub use pipeline::{PipelineSettings, SilentProgress, StageFailure, TriagePipeline, TriageProgress};
pub use resources::{ChecklistStore, MISSING_CHECKLIST, Team, TeamRoster};
