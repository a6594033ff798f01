//! PowerShell literal escaping and the script wrapper.
//!
//! The compiler only ever emits text; these helpers decide how raw values are
//! quoted when they are spliced into a generated script.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Comment emitted when the flow produced no statements.
pub const EMPTY_BODY_PLACEHOLDER: &str = "# Flow contains no executable steps";

/// Comment emitted when the workspace has no nodes at all.
pub const EMPTY_WORKSPACE_PLACEHOLDER: &str = "# No nodes in the workspace";

const HEADER_TITLE: &str = "# Generated with NodeFlow";
const BOOTSTRAP: &str = "Set-StrictMode -Version Latest\n$ErrorActionPreference = 'Stop'";

static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$[A-Za-z0-9_]+$").expect("valid variable regex"));

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:0x[0-9A-Fa-f]+|[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)$")
        .expect("valid number regex")
});

/// Quote a raw value so it can be pasted into a script as an expression.
///
/// Values that already read as an expression (quoted strings, `$variables`,
/// numbers) pass through untouched.
pub fn to_powershell_literal(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "''".to_string();
    }
    if is_quoted(trimmed) || VARIABLE_PATTERN.is_match(trimmed) || NUMBER_PATTERN.is_match(trimmed)
    {
        return trimmed.to_string();
    }
    format!("'{}'", value.replace('\'', "''"))
}

/// Boolean literal form.
pub fn bool_literal(value: bool) -> &'static str {
    if value { "$true" } else { "$false" }
}

/// Inverse of [`to_powershell_literal`] for quoted literals.
///
/// Single-quoted text has its doubled quotes collapsed; anything unquoted is
/// returned trimmed.
pub fn extract_literal_raw(value: &str) -> String {
    let text = value.trim();
    if text.is_empty() {
        return String::new();
    }
    if !is_quoted(text) {
        return text.to_string();
    }
    let inner = &text[1..text.len() - 1];
    if text.starts_with('\'') {
        inner.replace("''", "'")
    } else {
        inner.to_string()
    }
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\''))
            || (text.starts_with('"') && text.ends_with('"')))
}

/// Sanitize `${node_id}_${output}` into a script variable name (with `$`).
pub fn variable_name(node_id: &str, output: &str) -> String {
    let sanitized: String = format!("{node_id}_{output}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("${sanitized}")
}

/// Wrap a compiled body with the header comment and strict-mode prologue.
pub fn wrap_powershell_script(body: &str, generated_at: DateTime<Utc>) -> String {
    let header = format!(
        "{HEADER_TITLE}\n# {}",
        generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    let body = match body.trim() {
        "" => EMPTY_BODY_PLACEHOLDER,
        trimmed => trimmed,
    };
    let mut script = [header.as_str(), BOOTSTRAP, body].join("\n\n").trim().to_string();
    script.push('\n');
    script
}
