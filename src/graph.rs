//! Graph model: node instances, connections and the persisted JSON shape.

use egui::Pos2;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::compiler::powershell::{extract_literal_raw, to_powershell_literal};
use crate::error::{NodeFlowError, Result};
use crate::node_types::{ConfigPatch, Library, NodeDefinition, PortKind, RAW_SUFFIX, raw_key};

/// Two positions closer than this on both axes count as the same spot.
const POSITION_EPSILON: f32 = 1e-3;

/// A placed occurrence of a [`NodeDefinition`].
#[derive(Clone, Debug)]
pub struct NodeInstance {
    pub id: String,
    pub definition: Arc<NodeDefinition>,
    pub position: Pos2,
    pub config: BTreeMap<String, String>,
}

impl NodeInstance {
    pub fn new(definition: Arc<NodeDefinition>, id: String, position: Pos2) -> Self {
        let config = definition.default_config();
        Self {
            id,
            definition,
            position,
            config,
        }
    }

    /// Rebuild from persisted data; stored config wins over definition defaults.
    pub fn hydrate(definition: Arc<NodeDefinition>, data: &PersistedNode) -> Self {
        let mut node = Self::new(definition, data.id.clone(), data.position);
        node.config
            .extend(data.config.iter().map(|(k, v)| (k.clone(), v.clone())));
        node
    }

    pub fn type_id(&self) -> &str {
        &self.definition.id
    }

    pub fn config_value(&self, key: &str) -> &str {
        self.config.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn serialize(&self) -> PersistedNode {
        PersistedNode {
            id: self.id.clone(),
            node_type: self.definition.id.clone(),
            position: self.position,
            config: self.config.clone(),
        }
    }
}

/// Directed edge from an output port to an input port.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from_node: String,
    pub from_port: String,
    pub to_node: String,
    pub to_port: String,
}

impl Connection {
    pub fn new(
        from_node: impl Into<String>,
        from_port: impl Into<String>,
        to_node: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            from_port: from_port.into(),
            to_node: to_node.into(),
            to_port: to_port.into(),
        }
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.from_node == node_id || self.to_node == node_id
    }
}

/// Persisted node record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Pos2,
    #[serde(default, deserialize_with = "deserialize_config")]
    pub config: BTreeMap<String, String>,
}

/// Persisted graph: `{ nodes: [...], connections: [...] }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedGraph {
    #[serde(default)]
    pub nodes: Vec<PersistedNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Config values are strings; other JSON scalars saved by older builds are stringified.
fn deserialize_config<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}

/// What a library reload changed in the graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LibraryReconcile {
    pub removed_nodes: Vec<String>,
    pub pruned_connections: Vec<Connection>,
}

impl LibraryReconcile {
    pub fn changed(&self) -> bool {
        !self.removed_nodes.is_empty() || !self.pruned_connections.is_empty()
    }
}

/// All node instances keyed by id plus the connections between them.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: IndexMap<String, NodeInstance>,
    connections: Vec<Connection>,
    node_counter: u64,
    dirty: bool,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInstance> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Place a fresh instance of `definition`.
    ///
    /// The counter wraps instead of overflowing; ids already in use are skipped.
    pub fn create_node(&mut self, definition: Arc<NodeDefinition>, position: Pos2) -> &NodeInstance {
        let id = loop {
            self.node_counter = self.node_counter.wrapping_add(1);
            let candidate = format!("{}_{}", definition.id, self.node_counter);
            if !self.nodes.contains_key(&candidate) {
                break candidate;
            }
        };
        let node = NodeInstance::new(definition, id.clone(), position);
        log::debug!("Created node {id}");
        self.dirty = true;
        self.nodes.entry(id).or_insert(node)
    }

    pub(crate) fn set_node_position(&mut self, id: &str, position: Pos2) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.position = position;
                true
            }
            None => false,
        }
    }

    pub fn is_position_occupied(&self, position: Pos2) -> bool {
        self.nodes.values().any(|node| {
            (node.position.x - position.x).abs() <= POSITION_EPSILON
                && (node.position.y - position.y).abs() <= POSITION_EPSILON
        })
    }

    /// Connect `from_node.from_port` to `to_node.to_port`.
    ///
    /// An occupied input is rewired. Returns `Ok(false)` when the identical edge
    /// already exists.
    pub fn add_connection(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<bool> {
        self.check_port(from_node, from_port, PortKind::Output)?;
        self.check_port(to_node, to_port, PortKind::Input)?;

        let connection = Connection::new(from_node, from_port, to_node, to_port);
        if self.connections.contains(&connection) {
            return Ok(false);
        }
        self.connections
            .retain(|c| !(c.to_node == to_node && c.to_port == to_port));
        self.connections.push(connection);

        let source_is_ui = self
            .nodes
            .get(from_node)
            .is_some_and(|node| node.definition.is_ui());
        if source_is_ui {
            let (value, raw) = {
                let source = &self.nodes[from_node];
                (
                    source.config.get(from_port).cloned(),
                    source.config.get(&raw_key(from_port)).cloned(),
                )
            };
            self.propagate_ui_output(from_node, from_port, value.as_deref(), raw.as_deref());
        }
        self.dirty = true;
        Ok(true)
    }

    fn check_port(&self, node_id: &str, port: &str, kind: PortKind) -> Result<()> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| NodeFlowError::UnknownNode(node_id.to_string()))?;
        if node.definition.has_port(kind, port) {
            Ok(())
        } else {
            Err(NodeFlowError::UnknownPort {
                node_id: node_id.to_string(),
                port: port.to_string(),
                kind: kind.as_str(),
            })
        }
    }

    pub fn remove_connection(&mut self, connection: &Connection) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c != connection);
        let removed = self.connections.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Remove a node and every connection touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<NodeInstance> {
        let node = self.nodes.shift_remove(id)?;
        self.connections.retain(|c| !c.touches(id));
        self.dirty = true;
        Some(node)
    }

    /// Connection feeding `input` of `node_id`, if any.
    pub fn input_connection(&self, node_id: &str, input: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.to_node == node_id && c.to_port == input)
    }

    pub fn upstream_of(&self, node_id: &str) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.to_node == node_id)
    }

    /// Write one config value and run the follow-up reactions.
    ///
    /// Returns `false` when the node is gone or the value did not change.
    pub fn update_config(&mut self, node_id: &str, key: &str, value: &str, silent: bool) -> bool {
        let Some(node) = self.nodes.get_mut(node_id) else {
            return false;
        };
        if node.config.get(key).map(String::as_str) == Some(value) {
            return false;
        }
        node.config.insert(key.to_string(), value.to_string());
        if !silent {
            self.dirty = true;
        }

        let node = &self.nodes[node_id];
        let mut patch = ConfigPatch::new();
        if let Some(hook) = node.definition.render.clone() {
            hook.on_config_changed(node, key, value, &mut patch);
        }
        self.apply_patch(node_id, patch);
        self.handle_config_mutation(node_id, key, value);
        true
    }

    /// Apply hook writes in order. Returns `false` if the node no longer exists.
    pub fn apply_patch(&mut self, node_id: &str, patch: ConfigPatch) -> bool {
        if !self.nodes.contains_key(node_id) {
            if !patch.is_empty() {
                log::debug!("Discarding {} config writes for removed node {node_id}", patch.len());
            }
            return false;
        }
        for update in patch {
            self.update_config(node_id, &update.key, &update.value, update.silent);
        }
        true
    }

    fn handle_config_mutation(&mut self, node_id: &str, key: &str, value: &str) {
        let Some(node) = self.nodes.get(node_id) else {
            return;
        };
        if !node.definition.is_ui() || node.definition.outputs.is_empty() {
            return;
        }
        if let Some(base) = key.strip_suffix(RAW_SUFFIX) {
            if node.definition.has_output(base) {
                let base = base.to_string();
                self.propagate_ui_output(node_id, &base, None, Some(value));
            }
            return;
        }
        if node.definition.has_output(key) {
            self.propagate_ui_output(node_id, key, Some(value), None);
        }
    }

    /// Push a UI node's output into the bound controls of every wired target.
    fn propagate_ui_output(
        &mut self,
        source: &str,
        output: &str,
        value: Option<&str>,
        raw: Option<&str>,
    ) {
        let targets: Vec<(String, String)> = self
            .connections
            .iter()
            .filter(|c| c.from_node == source && c.from_port == output)
            .filter_map(|c| {
                let target = self.nodes.get(&c.to_node)?;
                let control = target.definition.control_for_input(&c.to_port)?;
                Some((c.to_node.clone(), control.key.clone()))
            })
            .collect();
        if targets.is_empty() {
            return;
        }
        let raw = match raw {
            Some(raw) => raw.to_string(),
            None => extract_literal_raw(value.unwrap_or("")),
        };
        let literal = to_powershell_literal(&raw);
        for (target, control_key) in targets {
            self.update_config(&target, &raw_key(&control_key), &raw, true);
            self.update_config(&target, &control_key, &literal, false);
        }
    }

    /// Value a hook sees for `input`: a UI upstream's live output, or the node's own config.
    pub fn resolve_input_value(&self, node_id: &str, input: &str, prefer_raw: bool) -> String {
        let Some(node) = self.nodes.get(node_id) else {
            return String::new();
        };
        let Some(connection) = self.input_connection(node_id, input) else {
            let own_raw = raw_key(input);
            if prefer_raw {
                if let Some(raw) = node.config.get(&own_raw) {
                    return raw.clone();
                }
            }
            return node.config_value(input).to_string();
        };
        let Some(source) = self.nodes.get(&connection.from_node) else {
            return String::new();
        };
        if !source.definition.is_ui() {
            return String::new();
        }
        let source_raw = raw_key(&connection.from_port);
        if prefer_raw {
            if let Some(raw) = source.config.get(&source_raw) {
                return raw.clone();
            }
        }
        if let Some(value) = source.config.get(&connection.from_port) {
            return value.clone();
        }
        if prefer_raw {
            source.config_value(&source_raw).to_string()
        } else {
            String::new()
        }
    }

    /// Script expression for a UI node output: stored literal, else the escaped raw form.
    pub fn ui_output_for_script(&self, node_id: &str, output: &str) -> String {
        let Some(node) = self.nodes.get(node_id) else {
            return String::new();
        };
        let stored = node.config_value(output);
        if !stored.is_empty() {
            return stored.to_string();
        }
        match node.config.get(&raw_key(output)) {
            Some(raw) => to_powershell_literal(raw),
            None => String::new(),
        }
    }

    /// Re-point nodes at a new catalog, dropping what no longer fits.
    pub fn reconcile_library(&mut self, library: &Library) -> LibraryReconcile {
        let mut report = LibraryReconcile::default();

        let orphaned: Vec<String> = self
            .nodes
            .values()
            .filter(|node| !library.contains(node.type_id()))
            .map(|node| node.id.clone())
            .collect();
        for id in &orphaned {
            self.nodes.shift_remove(id);
        }
        report.removed_nodes = orphaned;

        for node in self.nodes.values_mut() {
            let Some(definition) = library.get(node.type_id()) else {
                continue;
            };
            node.definition = definition.clone();
            let defaults = definition.default_config();
            let preserved: HashSet<&str> = definition
                .preserve_config_keys
                .iter()
                .map(|key| key.trim())
                .filter(|key| !key.is_empty())
                .collect();
            let mut merged = defaults.clone();
            merged.extend(std::mem::take(&mut node.config));
            merged.retain(|key, _| {
                defaults.contains_key(key)
                    || definition.has_control(key)
                    || preserved.contains(key.as_str())
            });
            node.config = merged;
        }

        let nodes = &self.nodes;
        let mut pruned = Vec::new();
        self.connections.retain(|c| {
            let valid = match (nodes.get(&c.from_node), nodes.get(&c.to_node)) {
                (Some(from), Some(to)) => {
                    from.definition.has_output(&c.from_port) && to.definition.has_input(&c.to_port)
                }
                _ => false,
            };
            if !valid {
                pruned.push(c.clone());
            }
            valid
        });
        report.pruned_connections = pruned;
        if report.changed() {
            log::info!(
                "Library reload removed {} node(s) and {} connection(s)",
                report.removed_nodes.len(),
                report.pruned_connections.len()
            );
        }
        report
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.connections.clear();
        self.node_counter = 0;
    }

    pub fn snapshot(&self) -> PersistedGraph {
        PersistedGraph {
            nodes: self.nodes.values().map(NodeInstance::serialize).collect(),
            connections: self.connections.clone(),
        }
    }

    /// Rebuild a graph from persisted data against `library`.
    ///
    /// Nodes of unknown type are dropped together with the connections that
    /// referenced them.
    pub fn hydrate(library: &Library, data: &PersistedGraph) -> Self {
        let mut graph = Graph::new();
        for record in &data.nodes {
            let Some(definition) = library.get(&record.node_type) else {
                log::warn!("Dropping node {} of unknown type {}", record.id, record.node_type);
                continue;
            };
            if graph.nodes.contains_key(&record.id) {
                continue;
            }
            let suffix = record
                .id
                .rsplit('_')
                .next()
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0);
            graph.node_counter = graph.node_counter.max(suffix);
            let node = NodeInstance::hydrate(definition.clone(), record);
            graph.nodes.insert(node.id.clone(), node);
        }
        for connection in &data.connections {
            let valid = match (
                graph.nodes.get(&connection.from_node),
                graph.nodes.get(&connection.to_node),
            ) {
                (Some(from), Some(to)) => {
                    from.definition.has_output(&connection.from_port)
                        && to.definition.has_input(&connection.to_port)
                }
                _ => false,
            };
            let occupied = graph
                .input_connection(&connection.to_node, &connection.to_port)
                .is_some();
            if valid && !occupied {
                graph.connections.push(connection.clone());
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_types::{ControlSpec, ExecutionMode};

    fn library() -> Library {
        Library::new([
            NodeDefinition::new("source", "Source")
                .outputs(["Value"])
                .control(ControlSpec::text("value", "5")),
            NodeDefinition::new("sink", "Sink")
                .inputs(["Value", "Other"])
                .outputs(["Sum"])
                .control(ControlSpec::text("target", "").binds_to("Value")),
            NodeDefinition::new("picker", "Picker")
                .execution(ExecutionMode::Ui)
                .outputs(["Name"])
                .initial("Name", "")
                .initial("Name__raw", ""),
        ])
    }

    fn create(graph: &mut Graph, library: &Library, id: &str) -> String {
        let def = library.get(id).unwrap().clone();
        graph.create_node(def, Pos2::ZERO).id.clone()
    }

    #[test]
    fn test_create_node_ids_are_monotonic() {
        let lib = library();
        let mut graph = Graph::new();
        let a = create(&mut graph, &lib, "source");
        let b = create(&mut graph, &lib, "sink");
        let c = create(&mut graph, &lib, "source");
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("source_1", "sink_2", "source_3"));
        assert!(graph.is_dirty());
        assert_eq!(graph.node(&a).unwrap().config_value("value"), "5");
    }

    #[test]
    fn test_connection_to_occupied_input_replaces() {
        let lib = library();
        let mut graph = Graph::new();
        let a = create(&mut graph, &lib, "source");
        let b = create(&mut graph, &lib, "source");
        let sink = create(&mut graph, &lib, "sink");
        assert!(graph.add_connection(&a, "Value", &sink, "Value").unwrap());
        assert!(graph.add_connection(&b, "Value", &sink, "Value").unwrap());
        let into: Vec<_> = graph
            .connections()
            .iter()
            .filter(|c| c.to_node == sink && c.to_port == "Value")
            .collect();
        assert_eq!(into.len(), 1);
        assert_eq!(into[0].from_node, b);
    }

    #[test]
    fn test_identical_connection_is_noop() {
        let lib = library();
        let mut graph = Graph::new();
        let a = create(&mut graph, &lib, "source");
        let sink = create(&mut graph, &lib, "sink");
        assert!(graph.add_connection(&a, "Value", &sink, "Value").unwrap());
        graph.clear_dirty();
        assert!(!graph.add_connection(&a, "Value", &sink, "Value").unwrap());
        assert_eq!(graph.connections().len(), 1);
        assert!(!graph.is_dirty());
    }

    #[test]
    fn test_connection_rejects_undeclared_ports() {
        let lib = library();
        let mut graph = Graph::new();
        let a = create(&mut graph, &lib, "source");
        let sink = create(&mut graph, &lib, "sink");
        assert!(matches!(
            graph.add_connection(&a, "Missing", &sink, "Value"),
            Err(NodeFlowError::UnknownPort { .. })
        ));
        assert!(matches!(
            graph.add_connection("ghost", "Value", &sink, "Value"),
            Err(NodeFlowError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_remove_node_drops_touching_connections() {
        let lib = library();
        let mut graph = Graph::new();
        let a = create(&mut graph, &lib, "source");
        let sink = create(&mut graph, &lib, "sink");
        let other = create(&mut graph, &lib, "source");
        graph.add_connection(&a, "Value", &sink, "Value").unwrap();
        graph.add_connection(&other, "Value", &sink, "Other").unwrap();
        assert!(graph.remove_node(&a).is_some());
        assert_eq!(graph.connections().len(), 1);
        assert_eq!(graph.connections()[0].from_node, other);
        assert!(graph.remove_node(&a).is_none());
    }

    #[test]
    fn test_ui_connection_propagates_to_bound_control() {
        let lib = library();
        let mut graph = Graph::new();
        let picker = create(&mut graph, &lib, "picker");
        let sink = create(&mut graph, &lib, "sink");
        graph.update_config(&picker, "Name__raw", "server01", true);
        graph.update_config(&picker, "Name", "'server01'", false);
        graph.add_connection(&picker, "Name", &sink, "Value").unwrap();
        let node = graph.node(&sink).unwrap();
        assert_eq!(node.config_value("target__raw"), "server01");
        assert_eq!(node.config_value("target"), "'server01'");

        graph.update_config(&picker, "Name__raw", "db02", true);
        assert_eq!(graph.node(&sink).unwrap().config_value("target"), "'db02'");
    }

    #[test]
    fn test_resolve_input_value_prefers_raw() {
        let lib = library();
        let mut graph = Graph::new();
        let picker = create(&mut graph, &lib, "picker");
        let sink = create(&mut graph, &lib, "sink");
        graph.update_config(&picker, "Name__raw", "server01", true);
        graph.update_config(&picker, "Name", "'server01'", true);
        graph.add_connection(&picker, "Name", &sink, "Value").unwrap();
        assert_eq!(graph.resolve_input_value(&sink, "Value", true), "server01");
        assert_eq!(graph.resolve_input_value(&sink, "Value", false), "'server01'");
        graph.update_config(&sink, "Other", "local", false);
        assert_eq!(graph.resolve_input_value(&sink, "Other", false), "local");
    }

    #[test]
    fn test_ui_output_for_script_falls_back_to_escaped_raw() {
        let lib = library();
        let mut graph = Graph::new();
        let picker = create(&mut graph, &lib, "picker");
        graph.update_config(&picker, "Name__raw", "it's", true);
        assert_eq!(graph.ui_output_for_script(&picker, "Name"), "'it''s'");
    }

    #[test]
    fn test_reconcile_drops_orphans_and_merges_config() {
        let lib = library();
        let mut graph = Graph::new();
        let a = create(&mut graph, &lib, "source");
        let sink = create(&mut graph, &lib, "sink");
        graph.add_connection(&a, "Value", &sink, "Value").unwrap();
        graph.update_config(&sink, "target", "kept", false);
        graph.update_config(&sink, "stale", "gone", false);

        let next = Library::new([NodeDefinition::new("sink", "Sink")
            .inputs(["Value"])
            .control(ControlSpec::text("target", ""))
            .control(ControlSpec::text("fresh", "new"))]);
        let report = graph.reconcile_library(&next);
        assert_eq!(report.removed_nodes, vec![a.clone()]);
        assert_eq!(report.pruned_connections.len(), 1);
        let node = graph.node(&sink).unwrap();
        assert_eq!(node.config_value("target"), "kept");
        assert_eq!(node.config_value("fresh"), "new");
        assert!(!node.config.contains_key("stale"));
    }

    #[test]
    fn test_reconcile_prunes_connections_to_removed_ports() {
        let lib = library();
        let mut graph = Graph::new();
        let a = create(&mut graph, &lib, "source");
        let sink = create(&mut graph, &lib, "sink");
        graph.add_connection(&a, "Value", &sink, "Other").unwrap();
        let next = Library::new([
            NodeDefinition::new("source", "Source").outputs(["Value"]),
            NodeDefinition::new("sink", "Sink").inputs(["Value"]),
        ]);
        let report = graph.reconcile_library(&next);
        assert!(report.removed_nodes.is_empty());
        assert_eq!(report.pruned_connections.len(), 1);
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let lib = library();
        let mut graph = Graph::new();
        let a = create(&mut graph, &lib, "source");
        let sink = create(&mut graph, &lib, "sink");
        graph.set_node_position(&sink, Pos2::new(120.5, -40.0));
        graph.update_config(&a, "value", "7", false);
        graph.add_connection(&a, "Value", &sink, "Value").unwrap();

        let json = serde_json::to_string(&graph.snapshot()).unwrap();
        let data: PersistedGraph = serde_json::from_str(&json).unwrap();
        let restored = Graph::hydrate(&lib, &data);

        assert_eq!(restored.snapshot(), graph.snapshot());
        assert!(!restored.is_dirty());
    }

    #[test]
    fn test_hydrate_drops_unknown_types_and_resumes_counter() {
        let lib = library();
        let data: PersistedGraph = serde_json::from_value(serde_json::json!({
            "nodes": [
                {"id": "source_4", "type": "source", "position": {"x": 1.0, "y": 2.0}, "config": {"value": 9, "flag": true, "none": null}},
                {"id": "old_node_7", "type": "old_node", "position": {"x": 0.0, "y": 0.0}, "config": {}}
            ],
            "connections": [
                {"fromNode": "old_node_7", "fromPort": "Value", "toNode": "source_4", "toPort": "Value"}
            ]
        }))
        .unwrap();
        let mut graph = Graph::hydrate(&lib, &data);
        assert_eq!(graph.len(), 1);
        assert!(graph.connections().is_empty());
        let node = graph.node("source_4").unwrap();
        assert_eq!(node.config_value("value"), "9");
        assert_eq!(node.config_value("flag"), "true");
        assert_eq!(node.config_value("none"), "");
        assert_eq!(node.position, Pos2::new(1.0, 2.0));

        let def = lib.get("sink").unwrap().clone();
        assert_eq!(graph.create_node(def, Pos2::ZERO).id, "sink_5");
    }

    #[test]
    fn test_create_after_max_suffix_does_not_overflow() {
        let lib = library();
        let data: PersistedGraph = serde_json::from_value(serde_json::json!({
            "nodes": [
                {"id": "source_18446744073709551615", "type": "source", "position": {"x": 0.0, "y": 0.0}, "config": {}},
                {"id": "source_0", "type": "source", "position": {"x": 10.0, "y": 0.0}, "config": {}}
            ],
            "connections": []
        }))
        .unwrap();
        let mut graph = Graph::hydrate(&lib, &data);
        let def = lib.get("source").unwrap().clone();
        let id = graph.create_node(def, Pos2::ZERO).id.clone();
        assert_eq!(id, "source_1");
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_position_occupancy_uses_epsilon() {
        let lib = library();
        let mut graph = Graph::new();
        let def = lib.get("source").unwrap().clone();
        graph.create_node(def, Pos2::new(10.0, 10.0));
        assert!(graph.is_position_occupied(Pos2::new(10.0005, 9.9995)));
        assert!(!graph.is_position_occupied(Pos2::new(10.01, 10.0)));
    }
}
