//! Graph to PowerShell compilation.
//!
//! Scheduling is Kahn's algorithm over the connection edges. Every script node
//! then gets its inputs resolved (UI upstreams contribute their live literal,
//! script upstreams their bound variable) and its template expanded.

pub mod powershell;
pub mod template;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

use crate::error::{NodeFlowError, Result};
use crate::graph::{Graph, NodeInstance};
use powershell::{EMPTY_WORKSPACE_PLACEHOLDER, variable_name, wrap_powershell_script};
use template::ScriptContext;

/// Order node ids so every connection's source precedes its target.
///
/// Zero in-degree nodes are seeded in insertion order.
pub fn topological_sort(graph: &Graph) -> Result<Vec<String>> {
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut indegree: IndexMap<&str, usize> = IndexMap::new();
    for id in graph.node_ids() {
        edges.insert(id, Vec::new());
        indegree.insert(id, 0);
    }
    for connection in graph.connections() {
        let (from, to) = (connection.from_node.as_str(), connection.to_node.as_str());
        if !indegree.contains_key(from) || !indegree.contains_key(to) {
            continue;
        }
        if let Some(targets) = edges.get_mut(from) {
            targets.push(to);
        }
        if let Some(count) = indegree.get_mut(to) {
            *count += 1;
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(indegree.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        for &next in edges.get(id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(count) = indegree.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if order.len() != graph.len() {
        return Err(NodeFlowError::CycleDetected);
    }
    Ok(order)
}

/// Per-pass output variable table.
#[derive(Default)]
struct Bindings {
    names: HashMap<(String, String), String>,
}

impl Bindings {
    fn output_var(&mut self, node_id: &str, output: &str) -> String {
        self.names
            .entry((node_id.to_string(), output.to_string()))
            .or_insert_with(|| variable_name(node_id, output))
            .clone()
    }
}

fn resolve_input(graph: &Graph, bindings: &mut Bindings, node: &NodeInstance, input: &str) -> String {
    if let Some(connection) = graph.input_connection(&node.id, input) {
        let source_is_ui = graph
            .node(&connection.from_node)
            .is_some_and(|source| source.definition.is_ui());
        if source_is_ui {
            return graph.ui_output_for_script(&connection.from_node, &connection.from_port);
        }
        return bindings.output_var(&connection.from_node, &connection.from_port);
    }
    match node.definition.control_for_input(input) {
        Some(control) => node.config_value(&control.key).to_string(),
        None => node.config_value(input).to_string(),
    }
}

/// Compile the graph body without the wrapper.
///
/// Returns `None` for an empty graph.
pub fn compile_body(graph: &Graph) -> Result<Option<String>> {
    if graph.is_empty() {
        return Ok(None);
    }
    let order = topological_sort(graph)?;
    let mut bindings = Bindings::default();
    let mut sections = Vec::new();

    for id in &order {
        let Some(node) = graph.node(id) else {
            continue;
        };
        let definition = &node.definition;
        if definition.is_ui() {
            continue;
        }

        let inputs: IndexMap<String, String> = definition
            .inputs
            .iter()
            .map(|input| (input.clone(), resolve_input(graph, &mut bindings, node, input)))
            .collect();
        let outputs: IndexMap<String, String> = definition
            .outputs
            .iter()
            .map(|output| (output.clone(), bindings.output_var(id, output)))
            .collect();

        let missing: Vec<String> = inputs
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(NodeFlowError::MissingInput {
                label: definition.label.clone(),
                inputs: missing,
            });
        }

        let ctx = ScriptContext {
            inputs: &inputs,
            outputs: &outputs,
            config: &node.config,
        };
        let text = definition.script.render(&ctx);
        if !text.is_empty() {
            sections.push(text);
        }
    }
    Ok(Some(sections.join("\n\n")))
}

/// Compile and wrap with an explicit header timestamp.
pub fn compile_at(graph: &Graph, generated_at: DateTime<Utc>) -> Result<String> {
    let body = compile_body(graph)?;
    let body = body.as_deref().unwrap_or(EMPTY_WORKSPACE_PLACEHOLDER);
    Ok(wrap_powershell_script(body, generated_at))
}

/// Compile the current graph into a complete script.
pub fn generate_script(graph: &Graph) -> Result<String> {
    compile_at(graph, Utc::now())
}
