//! Node catalog providers: user-authored specs, bundled samples and the
//! built-in UI nodes.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};

use crate::compiler::template::{ScriptContext, expand_template, placeholders};
use crate::error::Result;
use crate::executor::AutoExecContext;
use crate::graph::NodeInstance;
use crate::node_types::{
    AutoExecute, ConfigPatch, ControlKind, ControlSpec, ExecutionMode, Library, NodeDefinition,
    RenderHook, UiHandle,
};
use crate::palette::{PaletteHost, RemoveOutcome};
use crate::storage::{CUSTOM_NODES_KEY, PersistenceStore};

pub const DEFAULT_CONSTANT_PLACEHOLDER: &str = "# TODO: set value";
const DEFAULT_LABEL: &str = "Untitled node";
const DEFAULT_CATEGORY: &str = "Custom";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Trim, collapse whitespace runs to `_`, replace anything else non-alphanumeric with `_`.
pub fn sanitize_id(value: &str) -> String {
    WHITESPACE
        .replace_all(value.trim(), "_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// A constant field of a custom node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantSpec {
    #[serde(default, alias = "id")]
    pub key: String,
    #[serde(default, alias = "value")]
    pub default: String,
}

/// User-authored node description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(alias = "identifier")]
    pub id: String,
    pub label: String,
    pub category: String,
    #[serde(deserialize_with = "deserialize_list")]
    pub inputs: Vec<String>,
    #[serde(deserialize_with = "deserialize_list")]
    pub outputs: Vec<String>,
    pub constants: Vec<ConstantSpec>,
    pub script: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Port lists are stored either as arrays or as newline separated text.
fn deserialize_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrText {
        List(Vec<Option<String>>),
        Text(String),
        Other(serde_json::Value),
    }

    let items: Vec<String> = match ListOrText::deserialize(deserializer)? {
        ListOrText::List(items) => items.into_iter().flatten().collect(),
        ListOrText::Text(text) => text.lines().map(str::to_string).collect(),
        ListOrText::Other(_) => Vec::new(),
    };
    Ok(unique_trimmed(items))
}

fn unique_trimmed(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl NodeSpec {
    /// Fill defaults and sanitize. Timestamps come from `previous` when given.
    pub fn normalized(&self, previous: Option<&NodeSpec>) -> NodeSpec {
        let label = self.label.trim();
        let category = self.category.trim();
        let mut id = sanitize_id(&self.id);
        if id.is_empty() {
            id = sanitize_id(label);
        }
        if id.is_empty() {
            id = format!("custom_node_{}", Utc::now().timestamp_millis());
        }

        let mut seen = HashSet::new();
        let constants = self
            .constants
            .iter()
            .filter_map(|constant| {
                let key = sanitize_id(&constant.key);
                if key.is_empty() || !seen.insert(key.clone()) {
                    return None;
                }
                let default = if constant.default.trim().is_empty() {
                    DEFAULT_CONSTANT_PLACEHOLDER.to_string()
                } else {
                    constant.default.clone()
                };
                Some(ConstantSpec { key, default })
            })
            .collect();

        let now = now_iso();
        NodeSpec {
            id,
            label: if label.is_empty() { DEFAULT_LABEL.to_string() } else { label.to_string() },
            category: if category.is_empty() { DEFAULT_CATEGORY.to_string() } else { category.to_string() },
            inputs: unique_trimmed(self.inputs.iter().cloned()),
            outputs: unique_trimmed(self.outputs.iter().cloned()),
            constants,
            script: self.script.replace("\r\n", "\n"),
            description: self.description.clone(),
            created_at: previous
                .and_then(|p| p.created_at.clone())
                .or_else(|| self.created_at.clone())
                .or_else(|| Some(now.clone())),
            updated_at: self
                .updated_at
                .clone()
                .or_else(|| previous.and_then(|p| p.updated_at.clone()))
                .or(Some(now)),
        }
    }

    /// Build the definition this spec describes.
    pub fn to_definition(&self) -> NodeDefinition {
        let spec = self.normalized(Some(self));
        for (scope, key) in placeholders(&spec.script) {
            let declared = match scope.as_str() {
                "input" => spec.inputs.contains(&key),
                "output" => spec.outputs.contains(&key),
                _ => spec.constants.iter().any(|c| c.key == key),
            };
            if !declared {
                log::warn!("Node '{}' references undeclared {scope} '{key}'", spec.id);
            }
        }

        let mut definition = NodeDefinition::new(spec.id.clone(), spec.label.clone())
            .category(spec.category.clone())
            .inputs(spec.inputs.clone())
            .outputs(spec.outputs.clone());
        for constant in &spec.constants {
            definition = definition.control(
                ControlSpec::new(constant.key.clone(), ControlKind::TextBox)
                    .with_default(constant.default.clone())
                    .with_placeholder(constant.default.clone()),
            );
        }
        if !spec.script.trim().is_empty() {
            definition = definition.template(spec.script.clone());
        }
        definition.spec_id = Some(spec.id.clone());
        definition.description = spec.description;
        definition
    }
}

/// Convert specs, keeping the first of any repeated id.
pub fn specs_to_definitions(specs: &[NodeSpec]) -> Vec<NodeDefinition> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .map(NodeSpec::to_definition)
        .filter(|definition| seen.insert(definition.id.clone()))
        .collect()
}

fn sample(
    id: &str,
    label: &str,
    description: &str,
    inputs: &[&str],
    outputs: &[&str],
    constant: (&str, &str),
    script: &[&str],
) -> NodeSpec {
    NodeSpec {
        id: id.to_string(),
        label: label.to_string(),
        category: "Samples".to_string(),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        constants: vec![ConstantSpec {
            key: constant.0.to_string(),
            default: constant.1.to_string(),
        }],
        script: script.join("\n"),
        description: description.to_string(),
        created_at: None,
        updated_at: None,
    }
}

/// Bundled starting points for custom nodes.
pub fn sample_specs() -> Vec<NodeSpec> {
    vec![
        sample(
            "sample_log_message",
            "Sample: Log Message",
            "Emits a message from a constant and returns the same value as an output.",
            &[],
            &["LoggedMessage"],
            ("message", "\"Hello from custom node\""),
            &[
                "# This script writes a message and keeps a reference to it.",
                "Write-Host {{config.message}}",
                "{{output.LoggedMessage}} = {{config.message}}",
            ],
        ),
        sample(
            "sample_math_add",
            "Sample: Sum Inputs",
            "Combines two incoming values and exposes the result.",
            &["FirstValue", "SecondValue"],
            &["Total"],
            ("castAsInt", "# TODO: $true or $false"),
            &[
                "# Sample math operation",
                "if ({{config.castAsInt}} -eq '$true') {",
                "  $first = [int]({{input.FirstValue}})",
                "  $second = [int]({{input.SecondValue}})",
                "} else {",
                "  $first = {{input.FirstValue}}",
                "  $second = {{input.SecondValue}}",
                "}",
                "{{output.Total}} = $first + $second",
            ],
        ),
        sample(
            "sample_invoke_command",
            "Sample: Invoke ScriptBlock",
            "Runs a script block with one input argument and exposes the result.",
            &["ScriptInput"],
            &["Result"],
            ("scriptBlock", "[ScriptBlock]::Create(\"param($value) $value\")"),
            &[
                "# Invoke a script block with one input argument",
                "$__sb = {{config.scriptBlock}}",
                "{{output.Result}} = $__sb.Invoke({{input.ScriptInput}})",
            ],
        ),
    ]
}

pub fn import_sample(id: &str) -> Option<NodeSpec> {
    sample_specs().into_iter().find(|spec| spec.id == id)
}

/// Template shown when authoring a new node.
pub fn empty_spec() -> NodeSpec {
    NodeSpec {
        category: DEFAULT_CATEGORY.to_string(),
        constants: vec![ConstantSpec {
            key: "note".to_string(),
            default: "# TODO: describe behavior".to_string(),
        }],
        script: [
            "# Use {{input.Name}} to reference incoming values,",
            "# {{config.key}} for constant fields, and {{output.Result}} for outputs.",
            "# Remove these lines and write your PowerShell snippet here.",
        ]
        .join("\n"),
        ..Default::default()
    }
}

/// User-authored specs kept in a [`PersistenceStore`].
#[derive(Clone)]
pub struct CustomNodeStore {
    store: Arc<dyn PersistenceStore>,
}

impl CustomNodeStore {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    /// Stored specs, normalized, de-duplicated and sorted by label.
    ///
    /// Unreadable storage yields an empty list.
    pub fn list(&self) -> Vec<NodeSpec> {
        let stored = match self.store.load(CUSTOM_NODES_KEY) {
            Ok(Some(stored)) => stored,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::error!("Failed to read custom node specs: {e}");
                return Vec::new();
            }
        };
        let specs: Vec<NodeSpec> = match serde_json::from_str(&stored) {
            Ok(specs) => specs,
            Err(e) => {
                log::error!("Failed to parse custom node specs: {e}");
                return Vec::new();
            }
        };
        let mut seen = HashSet::new();
        let mut specs: Vec<NodeSpec> = specs
            .iter()
            .map(|spec| spec.normalized(Some(spec)))
            .filter(|spec| seen.insert(spec.id.clone()))
            .collect();
        specs.sort_by_key(|spec| spec.label.to_lowercase());
        specs
    }

    fn write(&self, specs: &[NodeSpec]) -> Result<()> {
        self.store.save(CUSTOM_NODES_KEY, &serde_json::to_string(specs)?)
    }

    /// Insert or update a spec, keeping the original creation time.
    pub fn save(&self, spec: &NodeSpec) -> Result<NodeSpec> {
        let mut specs = self.list();
        let candidate_id = spec.normalized(None).id;
        let previous = specs.iter().position(|s| s.id == candidate_id);
        let mut normalized = spec.normalized(previous.map(|i| &specs[i]));
        normalized.updated_at = Some(now_iso());
        match previous {
            Some(index) => {
                normalized.created_at = specs[index].created_at.clone();
                specs[index] = normalized.clone();
            }
            None => specs.push(normalized.clone()),
        }
        self.write(&specs)?;
        log::info!("Saved custom node '{}'", normalized.id);
        Ok(normalized)
    }

    /// Remove a spec and return what remains.
    pub fn delete(&self, id: &str) -> Result<Vec<NodeSpec>> {
        let specs: Vec<NodeSpec> = self.list().into_iter().filter(|spec| spec.id != id).collect();
        self.write(&specs)?;
        Ok(specs)
    }

    /// Copy a spec under a fresh id; `None` when `id` is not a stored spec.
    pub fn duplicate(&self, id: &str) -> Result<Option<NodeSpec>> {
        let specs = self.list();
        let Some(source) = specs.iter().find(|spec| spec.id == id) else {
            return Ok(None);
        };
        let taken: HashSet<&str> = specs.iter().map(|spec| spec.id.as_str()).collect();
        let mut new_id = format!("{id}_copy");
        let mut n = 2;
        while taken.contains(new_id.as_str()) {
            new_id = format!("{id}_copy{n}");
            n += 1;
        }
        let copy = NodeSpec {
            id: new_id,
            label: format!("{} (copy)", source.label),
            created_at: None,
            updated_at: None,
            ..source.clone()
        };
        self.save(&copy).map(Some)
    }

    pub fn definitions(&self) -> Vec<NodeDefinition> {
        specs_to_definitions(&self.list())
    }
}

#[async_trait]
impl PaletteHost for CustomNodeStore {
    async fn duplicate_definition(&self, definition_id: &str) -> anyhow::Result<Option<Arc<NodeDefinition>>> {
        let copy = self.duplicate(definition_id)?;
        Ok(copy.map(|spec| Arc::new(spec.to_definition())))
    }

    async fn remove_definitions(&self, definition_ids: &[String]) -> anyhow::Result<RemoveOutcome> {
        let stored: HashSet<String> = self.list().into_iter().map(|spec| spec.id).collect();
        let mut removed = Vec::new();
        for id in definition_ids.iter().filter(|id| stored.contains(*id)) {
            self.delete(id)?;
            removed.push(id.clone());
        }
        if removed.len() == definition_ids.len() {
            Ok(RemoveOutcome::RemovedAll)
        } else {
            Ok(RemoveOutcome::Removed(removed))
        }
    }
}

pub const TEXT_VALUE_ID: &str = "ui_text_value";
pub const SCRIPT_QUERY_ID: &str = "ui_script_query";

/// Mirrors the `text` control into the `Value` output.
struct TextValueHook;

impl RenderHook for TextValueHook {
    fn mount(&self, node: &NodeInstance, patch: &mut ConfigPatch) -> Option<UiHandle> {
        let text = node.config_value("text");
        if node.config_value("Value__raw") != text {
            patch.set_output("Value", text);
        }
        None
    }

    fn on_config_changed(&self, _node: &NodeInstance, key: &str, value: &str, patch: &mut ConfigPatch) {
        if key == "text" {
            patch.set_output("Value", value);
        }
    }
}

/// Sends `Command` to the script host and keeps the trimmed output.
struct ScriptQueryHook;

#[async_trait]
impl AutoExecute for ScriptQueryHook {
    async fn execute(&self, ctx: AutoExecContext) -> anyhow::Result<ConfigPatch> {
        let inputs: IndexMap<String, String> = ctx
            .inputs
            .iter()
            .map(|(name, input)| (name.clone(), input.value.clone()))
            .collect();
        let outputs = IndexMap::new();
        let script = expand_template(
            ctx.config_value("Command"),
            &ScriptContext {
                inputs: &inputs,
                outputs: &outputs,
                config: &ctx.config,
            },
        );
        if script.trim().is_empty() {
            anyhow::bail!("Command is empty");
        }
        let response = ctx.host()?.run_script(&script).await?;
        if !response.ok {
            anyhow::bail!("script host reported failure: {}", response.errors.trim());
        }
        let mut patch = ConfigPatch::new();
        patch.set_output("Output", response.output.trim());
        Ok(patch)
    }
}

/// UI nodes shipped with the editor.
pub fn builtin_definitions() -> Vec<NodeDefinition> {
    vec![
        NodeDefinition::new(TEXT_VALUE_ID, "Text Value")
            .category("UI")
            .execution(ExecutionMode::Ui)
            .outputs(["Value"])
            .control(ControlSpec::text("text", "").with_label("Text"))
            .initial("Value", "")
            .initial("Value__raw", "")
            .render_hook(TextValueHook),
        NodeDefinition::new(SCRIPT_QUERY_ID, "Script Query")
            .category("UI")
            .execution(ExecutionMode::Ui)
            .inputs(["Input"])
            .outputs(["Output"])
            .control(
                ControlSpec::text("Command", "")
                    .with_placeholder("Get-Date -Format o"),
            )
            .initial("Output", "")
            .initial("Output__raw", "")
            .auto_execute(ScriptQueryHook)
            .chain_execution(true),
    ]
}

/// Built-ins followed by the stored custom nodes.
pub fn load_library(custom: &CustomNodeStore) -> Library {
    Library::new(builtin_definitions().into_iter().chain(custom.definitions()))
}

/// Config a fresh instance would start with.
pub fn default_config_of(definition: &NodeDefinition) -> BTreeMap<String, String> {
    definition.default_config()
}
