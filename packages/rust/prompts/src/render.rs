//! `{variable}` substitution for prompt templates.
//!
//! `{name}` is replaced by the matching variable, `{{` and `}}` produce literal
//! braces. A brace group whose contents is not an identifier (for example an
//! unescaped JSON example) is copied through untouched.

use std::collections::HashMap;

use triage_shared::{Result, TriageError};

/// Fill `body` with `vars`, failing on the first referenced variable that is absent.
pub(crate) fn substitute(
    template: &str,
    body: &str,
    vars: &HashMap<&str, &str>,
) -> Result<String> {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
        } else {
            match placeholder(tail) {
                Some(name) => {
                    let value = vars.get(name).ok_or_else(|| {
                        TriageError::TemplateVariableMissing {
                            template: template.to_string(),
                            variable: name.to_string(),
                        }
                    })?;
                    out.push_str(value);
                    rest = &tail[name.len() + 2..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Every variable name `body` references, in first-use order.
pub(crate) fn referenced_variables(body: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = body;

    while let Some(pos) = rest.find('{') {
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            rest = &tail[2..];
            continue;
        }
        match placeholder(tail) {
            Some(name) => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
                rest = &tail[name.len() + 2..];
            }
            None => rest = &tail[1..],
        }
    }

    names
}

/// If `tail` starts with `{ident}`, return `ident`.
fn placeholder(tail: &str) -> Option<&str> {
    let inner = tail.strip_prefix('{')?;
    let end = inner.find('}')?;
    let name = &inner[..end];
    let is_ident = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    is_ident.then_some(name)
}
