//! Node definitions: the immutable templates nodes are instantiated from.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::compiler::powershell::to_powershell_literal;
use crate::compiler::template::{ScriptContext, expand_template};
use crate::executor::AutoExecContext;
use crate::graph::NodeInstance;

/// Suffix of the config key holding the unescaped form of a value.
pub const RAW_SUFFIX: &str = "__raw";

/// `key__raw`
pub fn raw_key(key: &str) -> String {
    format!("{key}{RAW_SUFFIX}")
}

/// How a node participates in code generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Emits script text from its template.
    #[default]
    Script,
    /// Emits nothing; its outputs are live config values.
    Ui,
}

/// Kind of user-editable field a control renders as.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlKind {
    #[default]
    TextBox,
    /// File or directory path.
    Reference,
    CheckBox,
    RadioButton,
    SelectBox,
}

/// Direction of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Input,
    Output,
}

impl PortKind {
    pub fn opposite(self) -> Self {
        match self {
            PortKind::Input => PortKind::Output,
            PortKind::Output => PortKind::Input,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PortKind::Input => "input",
            PortKind::Output => "output",
        }
    }
}

/// A configuration field on a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub kind: ControlKind,
    #[serde(default)]
    pub default: String,
    /// Choices for `SelectBox` and `RadioButton`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Input port whose upstream UI value drives this control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binds_to_input: Option<String>,
}

impl ControlSpec {
    pub fn new(key: impl Into<String>, kind: ControlKind) -> Self {
        Self {
            key: key.into(),
            label: None,
            kind,
            default: String::new(),
            options: Vec::new(),
            placeholder: None,
            binds_to_input: None,
        }
    }

    pub fn text(key: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(key, ControlKind::TextBox).with_default(default)
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn binds_to(mut self, input: impl Into<String>) -> Self {
        self.binds_to_input = Some(input.into());
        self
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

/// A single config write requested by a hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: String,
    /// Silent writes do not mark the graph dirty.
    pub silent: bool,
}

/// Ordered batch of config writes produced by render and auto-execute hooks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    updates: Vec<ConfigUpdate>,
}

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(key, value, false)
    }

    pub fn set_silent(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(key, value, true)
    }

    /// Store an output in both forms: `name__raw` silently, `name` as a literal.
    pub fn set_output(&mut self, name: &str, raw: &str) -> &mut Self {
        let literal = if raw.is_empty() {
            String::new()
        } else {
            to_powershell_literal(raw)
        };
        self.set_silent(raw_key(name), raw);
        self.set(name, literal)
    }

    fn push(&mut self, key: impl Into<String>, value: impl Into<String>, silent: bool) -> &mut Self {
        self.updates.push(ConfigUpdate {
            key: key.into(),
            value: value.into(),
            silent,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigUpdate> {
        self.updates.iter()
    }

    pub fn extend(&mut self, other: ConfigPatch) {
        self.updates.extend(other.updates);
    }
}

impl IntoIterator for ConfigPatch {
    type Item = ConfigUpdate;
    type IntoIter = std::vec::IntoIter<ConfigUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.into_iter()
    }
}

/// Disposer returned by a render hook.
///
/// Runs its teardown exactly once: on [`UiHandle::dispose`] or when dropped.
pub struct UiHandle {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl UiHandle {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn dispose(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for UiHandle {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl fmt::Debug for UiHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiHandle")
            .field("armed", &self.teardown.is_some())
            .finish()
    }
}

/// Custom behaviour for `ui` nodes.
pub trait RenderHook: Send + Sync {
    /// Called whenever the node is (re)mounted. Writes placed in `patch` are
    /// applied right after mounting.
    fn mount(&self, node: &NodeInstance, patch: &mut ConfigPatch) -> Option<UiHandle>;

    /// Called after a config value of the node changed.
    fn on_config_changed(
        &self,
        _node: &NodeInstance,
        _key: &str,
        _value: &str,
        _patch: &mut ConfigPatch,
    ) {
    }
}

/// Side-effecting refresh run before every export for nodes that expose it.
#[async_trait]
pub trait AutoExecute: Send + Sync {
    async fn execute(&self, ctx: AutoExecContext) -> anyhow::Result<ConfigPatch>;
}

pub type ScriptFn = Arc<dyn Fn(&ScriptContext<'_>) -> String + Send + Sync>;

/// How a script node turns its bindings into text.
#[derive(Clone, Default)]
pub enum ScriptTemplate {
    /// Emits nothing.
    #[default]
    Empty,
    /// Text with `{{input.X}}`, `{{output.X}}` and `{{config.X}}` placeholders.
    Text(String),
    /// Arbitrary generator.
    Native(ScriptFn),
}

impl ScriptTemplate {
    pub fn render(&self, ctx: &ScriptContext<'_>) -> String {
        match self {
            ScriptTemplate::Empty => String::new(),
            ScriptTemplate::Text(template) => expand_template(template, ctx),
            ScriptTemplate::Native(generate) => generate(ctx),
        }
    }
}

impl fmt::Debug for ScriptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptTemplate::Empty => f.write_str("Empty"),
            ScriptTemplate::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ScriptTemplate::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// Immutable template describing a reusable graph building block.
#[derive(Clone)]
pub struct NodeDefinition {
    pub id: String,
    pub label: String,
    pub category: String,
    pub execution: ExecutionMode,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub controls: Vec<ControlSpec>,
    pub initial_config: BTreeMap<String, String>,
    /// Keys kept across library reloads even though no default declares them.
    pub preserve_config_keys: Vec<String>,
    pub script: ScriptTemplate,
    pub render: Option<Arc<dyn RenderHook>>,
    pub auto_execute: Option<Arc<dyn AutoExecute>>,
    /// Entry point of the auto-execution walk before every export.
    pub chain_execution: bool,
    /// Id of the user-authored spec this was built from, if any.
    pub spec_id: Option<String>,
    pub description: String,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            category: "Custom".to_string(),
            execution: ExecutionMode::Script,
            inputs: Vec::new(),
            outputs: Vec::new(),
            controls: Vec::new(),
            initial_config: BTreeMap::new(),
            preserve_config_keys: Vec::new(),
            script: ScriptTemplate::Empty,
            render: None,
            auto_execute: None,
            chain_execution: false,
            spec_id: None,
            description: String::new(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn control(mut self, control: ControlSpec) -> Self {
        self.controls.push(control);
        self
    }

    pub fn initial(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.initial_config.insert(key.into(), value.into());
        self
    }

    pub fn preserve(mut self, key: impl Into<String>) -> Self {
        self.preserve_config_keys.push(key.into());
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.script = ScriptTemplate::Text(template.into());
        self
    }

    pub fn script_fn(
        mut self,
        generate: impl Fn(&ScriptContext<'_>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.script = ScriptTemplate::Native(Arc::new(generate));
        self
    }

    pub fn render_hook(mut self, hook: impl RenderHook + 'static) -> Self {
        self.render = Some(Arc::new(hook));
        self
    }

    pub fn auto_execute(mut self, hook: impl AutoExecute + 'static) -> Self {
        self.auto_execute = Some(Arc::new(hook));
        self
    }

    pub fn chain_execution(mut self, chain: bool) -> Self {
        self.chain_execution = chain;
        self
    }

    pub fn is_ui(&self) -> bool {
        self.execution == ExecutionMode::Ui
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|input| input == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|output| output == name)
    }

    pub fn has_port(&self, kind: PortKind, name: &str) -> bool {
        match kind {
            PortKind::Input => self.has_input(name),
            PortKind::Output => self.has_output(name),
        }
    }

    pub fn ports(&self, kind: PortKind) -> &[String] {
        match kind {
            PortKind::Input => &self.inputs,
            PortKind::Output => &self.outputs,
        }
    }

    pub fn has_control(&self, key: &str) -> bool {
        self.controls.iter().any(|control| control.key == key)
    }

    /// Control that substitutes for a missing wire on `input`.
    pub fn control_for_input(&self, input: &str) -> Option<&ControlSpec> {
        self.controls
            .iter()
            .find(|control| control.binds_to_input.as_deref() == Some(input))
    }

    /// Initial config overlaid with control defaults.
    pub fn default_config(&self) -> BTreeMap<String, String> {
        let mut config = self.initial_config.clone();
        for control in &self.controls {
            config.insert(control.key.clone(), control.default.clone());
        }
        config
    }
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("category", &self.category)
            .field("execution", &self.execution)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("controls", &self.controls)
            .field("script", &self.script)
            .field("auto_execute", &self.auto_execute.is_some())
            .field("chain_execution", &self.chain_execution)
            .finish()
    }
}

/// The definition catalog the editor instantiates nodes from.
#[derive(Clone, Debug, Default)]
pub struct Library {
    definitions: IndexMap<String, Arc<NodeDefinition>>,
}

impl Library {
    /// Build a catalog; definitions without an id are dropped, the first of
    /// duplicate ids wins.
    pub fn new(definitions: impl IntoIterator<Item = NodeDefinition>) -> Self {
        Self::from_shared(definitions.into_iter().map(Arc::new))
    }

    pub fn from_shared(definitions: impl IntoIterator<Item = Arc<NodeDefinition>>) -> Self {
        let mut map = IndexMap::new();
        for definition in definitions {
            if definition.id.trim().is_empty() || map.contains_key(&definition.id) {
                continue;
            }
            map.insert(definition.id.clone(), definition);
        }
        Self { definitions: map }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<NodeDefinition>> {
        self.definitions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<NodeDefinition>> {
        self.definitions.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Add or replace a definition, keeping its position when replacing.
    pub fn upsert(&mut self, definition: Arc<NodeDefinition>) {
        self.definitions.insert(definition.id.clone(), definition);
    }

    pub fn without<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut next = self.clone();
        for id in ids {
            next.definitions.shift_remove(id);
        }
        next
    }

    /// Definitions that can be wired to a port named `port` of kind `kind`.
    pub fn compatible_with(&self, kind: PortKind, port: &str) -> Vec<Arc<NodeDefinition>> {
        self.iter()
            .filter(|definition| definition.has_port(kind.opposite(), port))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_config_overlays_control_defaults() {
        let def = NodeDefinition::new("n", "N")
            .initial("mode", "fast")
            .initial("message", "initial")
            .control(ControlSpec::text("message", "hello"));
        let config = def.default_config();
        assert_eq!(config.get("mode").map(String::as_str), Some("fast"));
        assert_eq!(config.get("message").map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_control_for_input() {
        let def = NodeDefinition::new("n", "N")
            .inputs(["Target"])
            .control(ControlSpec::text("target", "").binds_to("Target"));
        assert_eq!(def.control_for_input("Target").map(|c| c.key.as_str()), Some("target"));
        assert!(def.control_for_input("Other").is_none());
    }

    #[test]
    fn test_library_drops_blank_and_duplicate_ids() {
        let library = Library::new([
            NodeDefinition::new("a", "First"),
            NodeDefinition::new("", "Blank"),
            NodeDefinition::new("a", "Second"),
            NodeDefinition::new("b", "B"),
        ]);
        assert_eq!(library.ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(library.get("a").map(|d| d.label.as_str()), Some("First"));
    }

    #[test]
    fn test_compatible_with_port() {
        let library = Library::new([
            NodeDefinition::new("src", "Source").outputs(["Value"]),
            NodeDefinition::new("dst", "Sink").inputs(["Value"]),
        ]);
        let for_output = library.compatible_with(PortKind::Output, "Value");
        assert_eq!(for_output.len(), 1);
        assert_eq!(for_output[0].id, "dst");
        let for_input = library.compatible_with(PortKind::Input, "Value");
        assert_eq!(for_input[0].id, "src");
    }

    #[test]
    fn test_set_output_writes_raw_and_literal() {
        let mut patch = ConfigPatch::new();
        patch.set_output("Name", "server01");
        let updates: Vec<_> = patch.iter().cloned().collect();
        assert_eq!(updates[0].key, "Name__raw");
        assert_eq!(updates[0].value, "server01");
        assert!(updates[0].silent);
        assert_eq!(updates[1].key, "Name");
        assert_eq!(updates[1].value, "'server01'");
        assert!(!updates[1].silent);
    }

    #[test]
    fn test_ui_handle_runs_teardown_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = UiHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let c = count.clone();
        {
            let _handle = UiHandle::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_native_script_template() {
        let def = NodeDefinition::new("n", "N").script_fn(|ctx| {
            format!("Write-Host {}", ctx.config.get("msg").cloned().unwrap_or_default())
        });
        let inputs = IndexMap::new();
        let outputs = IndexMap::new();
        let mut config = BTreeMap::new();
        config.insert("msg".to_string(), "'x'".to_string());
        let ctx = ScriptContext { inputs: &inputs, outputs: &outputs, config: &config };
        assert_eq!(def.script.render(&ctx), "Write-Host 'x'");
    }
}
