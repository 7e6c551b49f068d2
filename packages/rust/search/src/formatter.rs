//! Normalizes raw search results into [`DocumentHit`]s.
//!
//! Each content type maps to a strategy for its body and URL: either read a
//! named field from `data`, or derive the value from several fields. Gaps
//! degrade to empty strings with a warning; only a missing `type` is an error.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use triage_shared::{DocumentHit, Result, TriageError};

/// Default preview budget, in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 250;

/// Appended to a preview that was truncated.
pub const ELLIPSIS: &str = "...";

const COMMUNITY_TOPIC_BASE: &str = "https://hitchhikers.yext.com/community/t/";

/// Field used for the body when a content type has no specific mapping.
const DEFAULT_BODY_FIELD: &str = "body";

/// Field used for the URL when a content type has no specific mapping.
const DEFAULT_URL_FIELD: &str = "url";

// ---------------------------------------------------------------------------
// Content types
// ---------------------------------------------------------------------------

/// Content-type discriminator carried in `data.type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    DiscourseTopic,
    HitchhikerUnit,
    HitchhikerGuide,
    ReferenceDoc,
    Blog,
    HelpArticle,
    Other(String),
}

/// How to obtain one string from a result's `data` object.
enum FieldSource {
    Field(&'static str),
    Derive(fn(&Map<String, Value>) -> Option<String>),
}

impl ContentType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "discourse_discourseTopic" => Self::DiscourseTopic,
            "ce_hHUnit" => Self::HitchhikerUnit,
            "ce_hhGuide" => Self::HitchhikerGuide,
            "ce_referenceDoc" => Self::ReferenceDoc,
            "ce_blog" => Self::Blog,
            "helpArticle" => Self::HelpArticle,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::DiscourseTopic => "discourse_discourseTopic",
            Self::HitchhikerUnit => "ce_hHUnit",
            Self::HitchhikerGuide => "ce_hhGuide",
            Self::ReferenceDoc => "ce_referenceDoc",
            Self::Blog => "ce_blog",
            Self::HelpArticle => "helpArticle",
            Self::Other(tag) => tag,
        }
    }

    fn body_source(&self) -> FieldSource {
        match self {
            Self::DiscourseTopic => FieldSource::Derive(discourse_body),
            Self::HitchhikerUnit => FieldSource::Field("body"),
            Self::HitchhikerGuide => FieldSource::Field("shortDescription"),
            Self::ReferenceDoc => FieldSource::Field("body"),
            Self::Blog => FieldSource::Field("description"),
            Self::HelpArticle => FieldSource::Field("body"),
            Self::Other(_) => FieldSource::Field(DEFAULT_BODY_FIELD),
        }
    }

    fn url_source(&self) -> FieldSource {
        match self {
            Self::DiscourseTopic => FieldSource::Derive(discourse_url),
            Self::HitchhikerUnit => FieldSource::Field("website"),
            Self::HitchhikerGuide | Self::ReferenceDoc | Self::Blog => {
                FieldSource::Field("landingPageUrl")
            }
            Self::HelpArticle | Self::Other(_) => FieldSource::Field(DEFAULT_URL_FIELD),
        }
    }
}

/// Accepted answer when there is one, otherwise the opening post.
fn discourse_body(data: &Map<String, Value>) -> Option<String> {
    let text_of = |key: &str| {
        data.get(key)
            .and_then(|post| post.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    text_of("discourse_answerAccepted").or_else(|| text_of("discourse_firstDiscoursePost"))
}

fn discourse_url(data: &Map<String, Value>) -> Option<String> {
    let slug = data.get("discourse_slug")?.as_str()?;
    Some(format!("{COMMUNITY_TOPIC_BASE}{slug}"))
}

fn resolve(source: FieldSource, data: &Map<String, Value>) -> Option<String> {
    match source {
        FieldSource::Field(name) => data.get(name).and_then(Value::as_str).map(str::to_string),
        FieldSource::Derive(derive) => derive(data),
    }
}

// ---------------------------------------------------------------------------
// Formatter
// ---------------------------------------------------------------------------

/// Turns raw search results into previewable hits.
#[derive(Debug, Clone, Copy)]
pub struct ResultFormatter {
    preview_chars: usize,
}

impl ResultFormatter {
    pub fn new(preview_chars: usize) -> Self {
        Self { preview_chars }
    }

    /// Normalize one raw result.
    ///
    /// Fails with [`TriageError::MissingTypeField`] only when `data.type` is absent.
    pub fn to_hit(&self, raw: &Value) -> Result<DocumentHit> {
        let data = raw
            .get("data")
            .and_then(Value::as_object)
            .ok_or(TriageError::MissingTypeField)?;
        let tag = data
            .get("type")
            .and_then(Value::as_str)
            .ok_or(TriageError::MissingTypeField)?;
        let content_type = ContentType::from_tag(tag);

        let title = data
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                warn!(content_type = tag, "search result has no name");
                String::new()
            });

        let body = resolve(content_type.body_source(), data).unwrap_or_else(|| {
            warn!(content_type = tag, title = %title, "search result has no body field");
            String::new()
        });

        let url = resolve(content_type.url_source(), data).unwrap_or_else(|| {
            warn!(content_type = tag, title = %title, "search result has no url field");
            String::new()
        });

        Ok(DocumentHit {
            title,
            url,
            body_preview: get_preview(&body, self.preview_chars),
        })
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_CHARS)
    }
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// Single-line, link-free preview of `text` of at most `n_chars` characters
/// plus [`ELLIPSIS`].
pub fn get_preview(text: &str, n_chars: usize) -> String {
    static NEWLINES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[\r\n]+").expect("valid regex"));
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    let text = text.replace('#', "");
    let text = NEWLINES_RE.replace_all(&text, " | ");
    let text = LINK_RE.replace_all(&text, "");

    if text.chars().count() <= n_chars {
        return text.into_owned();
    }

    let head: String = text.chars().take(n_chars).collect();
    let cut = match head.rfind(' ') {
        Some(pos) => &head[..pos],
        None => head.as_str(),
    };
    format!("{cut}{ELLIPSIS}")
}
