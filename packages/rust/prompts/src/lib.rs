//! Prompt templates and rendering for the triage stages.
//!
//! Templates ship built into the binary (`templates/*.md`) and can be
//! overridden per name by dropping a `<name>.md` file into a prompts directory.

mod render;

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use triage_shared::{Result, TriageError};

/// Template names used by the pipeline stages.
pub mod names {
    pub const CLASSIFY: &str = "classify";
    pub const SEARCH_QUERIES: &str = "search_queries";
    pub const REFINE: &str = "refine";
    pub const CHECKLIST: &str = "checklist";
    pub const RESPONSE: &str = "response";
}

/// Built-in templates, keyed by name.
const BUILTIN: &[(&str, &str)] = &[
    (names::CLASSIFY, include_str!("../templates/classify.md")),
    (names::SEARCH_QUERIES, include_str!("../templates/search_queries.md")),
    (names::REFINE, include_str!("../templates/refine.md")),
    (names::CHECKLIST, include_str!("../templates/checklist.md")),
    (names::RESPONSE, include_str!("../templates/response.md")),
];

/// Variables supplied to a template, by name.
pub type Variables<'a> = HashMap<&'a str, &'a str>;

/// Locates templates and renders them into prompts.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    overrides_dir: Option<PathBuf>,
    builtins_enabled: bool,
}

impl TemplateStore {
    /// Store serving only the built-in templates.
    pub fn builtin() -> Self {
        Self {
            overrides_dir: None,
            builtins_enabled: true,
        }
    }

    /// Built-in templates, with `<dir>/<name>.md` taking precedence when present.
    pub fn with_overrides(dir: impl Into<PathBuf>) -> Self {
        Self {
            overrides_dir: Some(dir.into()),
            builtins_enabled: true,
        }
    }

    /// Store serving only files from `dir`; names without a file are missing.
    pub fn directory_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            overrides_dir: Some(dir.into()),
            builtins_enabled: false,
        }
    }

    /// Fetch the raw template text for `name`.
    pub fn template(&self, name: &str) -> Result<Cow<'static, str>> {
        if let Some(dir) = &self.overrides_dir {
            if let Some(body) = read_override(dir, name)? {
                debug!(template = name, dir = %dir.display(), "using template override");
                return Ok(Cow::Owned(body));
            }
        }

        if self.builtins_enabled {
            if let Some((_, body)) = BUILTIN.iter().find(|(n, _)| *n == name) {
                return Ok(Cow::Borrowed(body));
            }
        }

        Err(TriageError::TemplateMissing {
            name: name.to_string(),
        })
    }

    /// Render the named template with `vars`.
    pub fn render(&self, name: &str, vars: &Variables<'_>) -> Result<String> {
        let body = self.template(name)?;
        render::substitute(name, &body, vars)
    }

    /// Render the named template, then replace every newline with a space.
    ///
    /// Only the final composition prompt asks for this, to save tokens.
    pub fn render_single_line(&self, name: &str, vars: &Variables<'_>) -> Result<String> {
        Ok(self.render(name, vars)?.replace('\n', " "))
    }

    /// Variables the named template references, in first-use order.
    pub fn variables(&self, name: &str) -> Result<Vec<String>> {
        Ok(render::referenced_variables(&self.template(name)?))
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Read `<dir>/<name>.md`, or `None` if it does not exist.
fn read_override(dir: &Path, name: &str) -> Result<Option<String>> {
    let path = dir.join(format!("{name}.md"));
    match std::fs::read_to_string(&path) {
        Ok(body) => Ok(Some(body)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TriageError::io(path, e)),
    }
}
