//! Team roster and per-team checklists.
//!
//! The roster is a directory of `<team>.md` description files; checklists are
//! `<team>.md` files keyed by the lower-cased team id.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use triage_shared::{Result, TriageError, UNKNOWN_TEAM};

/// Used when a team has no checklist file.
pub const MISSING_CHECKLIST: &str =
    "No checklist is defined for this team. Judge only whether the ticket is clear enough to act on.";

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// One engineering team a ticket may be routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    /// Canonical id, upper case (e.g. `WATSON`).
    pub id: String,
    /// Title-cased name shown in prompts (e.g. `Watson`).
    pub display_name: String,
    pub description: String,
}

impl Team {
    fn from_stem(stem: &str, description: impl Into<String>) -> Self {
        Self {
            id: stem.to_uppercase(),
            display_name: title_case(stem),
            description: description.into().trim().to_string(),
        }
    }
}

/// The closed set of teams, in prompt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRoster {
    teams: Vec<Team>,
}

impl TeamRoster {
    pub fn new(teams: Vec<Team>) -> Self {
        Self { teams }
    }

    /// The three teams the tool shipped with.
    pub fn builtin() -> Self {
        Self::new(vec![
            Team::from_stem(
                "slapshot",
                "Owns the Knowledge Graph: entities, fields, connectors and the content APIs.",
            ),
            Team::from_stem(
                "watson",
                "Owns Search: query understanding, ranking, relevance, filters and vertical configuration.",
            ),
            Team::from_stem(
                "fusion",
                "Owns Pages and front-end experiences: site templates, deployments and the search UI.",
            ),
        ])
    }

    /// Load every `*.md` file in `dir`, sorted by file name.
    ///
    /// Falls back to [`TeamRoster::builtin`] when `dir` does not exist.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no team descriptions directory, using built-in roster");
            return Ok(Self::builtin());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| TriageError::io(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        files.sort();

        let mut teams = Vec::with_capacity(files.len());
        for path in files {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let description =
                std::fs::read_to_string(&path).map_err(|e| TriageError::io(&path, e))?;
            teams.push(Team::from_stem(stem, description));
        }

        if teams.is_empty() {
            return Err(TriageError::config(format!(
                "no team descriptions found in {}",
                dir.display()
            )));
        }

        debug!(count = teams.len(), dir = %dir.display(), "loaded team roster");
        Ok(Self::new(teams))
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    /// `"{n}. **{Display}:** {description}\n"` per team, for the classification prompt.
    pub fn descriptions_markdown(&self) -> String {
        let mut out = String::new();
        for (i, team) in self.teams.iter().enumerate() {
            let _ = writeln!(out, "{}. **{}:** {}", i + 1, team.display_name, team.description);
        }
        out
    }

    /// Canonical id for `name`, matched case-insensitively against team ids
    /// and the `Unknown` sentinel.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        if name.eq_ignore_ascii_case(UNKNOWN_TEAM) {
            return Some(UNKNOWN_TEAM);
        }
        self.teams
            .iter()
            .find(|t| t.id.eq_ignore_ascii_case(name))
            .map(|t| t.id.as_str())
    }
}

fn title_case(stem: &str) -> String {
    stem.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Checklists
// ---------------------------------------------------------------------------

/// Reads `<dir>/<team id lower-cased>.md`.
#[derive(Debug, Clone)]
pub struct ChecklistStore {
    dir: PathBuf,
}

impl ChecklistStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The checklist for `team`, or [`MISSING_CHECKLIST`] when there is none.
    pub fn checklist_for(&self, team: &str) -> Result<String> {
        let path = self.dir.join(format!("{}.md", team.to_lowercase()));
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(team, path = %path.display(), "no checklist for team, using placeholder");
                Ok(MISSING_CHECKLIST.to_string())
            }
            Err(e) => Err(TriageError::io(path, e)),
        }
    }
}
