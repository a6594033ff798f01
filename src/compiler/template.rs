//! `{{scope.key}}` placeholder expansion for text script templates.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use indexmap::IndexMap;

static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(input|output|config)\.([A-Za-z0-9_]+)\s*\}\}")
        .expect("valid placeholder regex")
});

/// Values available to a template while a node is emitted.
#[derive(Debug, Clone, Copy)]
pub struct ScriptContext<'a> {
    /// Resolved input expressions keyed by input port name.
    pub inputs: &'a IndexMap<String, String>,
    /// Bound script variables keyed by output port name.
    pub outputs: &'a IndexMap<String, String>,
    /// The node's configuration.
    pub config: &'a BTreeMap<String, String>,
}

/// Replace every known placeholder in one pass.
///
/// Unknown keys stay verbatim so partially filled templates still render.
pub fn expand_template(template: &str, ctx: &ScriptContext<'_>) -> String {
    PLACEHOLDER_PATTERN
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[2];
            let value = match &caps[1] {
                "input" => ctx.inputs.get(key),
                "output" => ctx.outputs.get(key),
                _ => ctx.config.get(key),
            };
            match value {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Keys referenced by a template, grouped as `(scope, key)` in order of appearance.
pub fn placeholders(template: &str) -> Vec<(String, String)> {
    PLACEHOLDER_PATTERN
        .captures_iter(template)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}
