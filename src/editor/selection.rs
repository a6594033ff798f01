//! Selection model: a set of nodes or a single connection, never both.

use indexmap::IndexSet;
use std::collections::HashSet;

use crate::graph::{Connection, Graph};

#[derive(Debug, Clone, Default)]
pub struct Selection {
    nodes: IndexSet<String>,
    connection: Option<Connection>,
    /// Nodes under an in-progress box selection.
    preview: HashSet<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.connection.is_none()
    }

    /// Select a node, clearing any selected connection.
    ///
    /// Additive selection adds to the set; with `toggle` an already selected
    /// node is removed instead. Returns whether the node ends up selected.
    pub fn select_node(&mut self, id: &str, additive: bool, toggle: bool) -> bool {
        self.connection = None;
        if !additive {
            self.nodes.clear();
            self.nodes.insert(id.to_string());
            return true;
        }
        if toggle && self.nodes.contains(id) {
            self.nodes.shift_remove(id);
            return false;
        }
        self.nodes.insert(id.to_string());
        true
    }

    /// Select a connection, clearing the node selection.
    pub fn select_connection(&mut self, connection: Connection) {
        self.nodes.clear();
        self.connection = Some(connection);
    }

    /// Replace the node selection, or add to it when `additive`.
    pub fn set_nodes(&mut self, ids: impl IntoIterator<Item = String>, additive: bool) -> usize {
        if !additive {
            self.nodes.clear();
        }
        let before = self.nodes.len();
        self.nodes.extend(ids);
        if !self.nodes.is_empty() {
            self.connection = None;
        }
        self.nodes.len() - before
    }

    pub fn deselect_node(&mut self, id: &str) -> bool {
        self.nodes.shift_remove(id)
    }

    pub fn clear_nodes(&mut self) {
        self.nodes.clear();
    }

    pub fn clear_connection(&mut self) {
        self.connection = None;
    }

    /// Clear the connection selection if it is `connection`.
    pub fn forget_connection(&mut self, connection: &Connection) {
        if self.connection.as_ref() == Some(connection) {
            self.connection = None;
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.connection = None;
        self.preview.clear();
    }

    /// Drop ids and the connection that are no longer part of `graph`.
    pub fn retain_existing(&mut self, graph: &Graph) {
        self.nodes.retain(|id| graph.contains_node(id));
        self.preview.retain(|id| graph.contains_node(id));
        if let Some(connection) = &self.connection {
            if !graph.connections().contains(connection) {
                self.connection = None;
            }
        }
    }

    pub fn set_preview(&mut self, ids: impl IntoIterator<Item = String>) {
        self.preview = ids.into_iter().collect();
    }

    pub fn is_previewed(&self, id: &str) -> bool {
        self.preview.contains(id)
    }

    pub fn clear_preview(&mut self) {
        self.preview.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_and_connection_are_exclusive() {
        let mut selection = Selection::new();
        selection.select_node("a_1", false, false);
        selection.select_connection(Connection::new("a_1", "Out", "b_2", "In"));
        assert_eq!(selection.node_count(), 0);
        assert!(selection.connection().is_some());
        selection.select_node("b_2", true, true);
        assert!(selection.connection().is_none());
        assert!(selection.contains_node("b_2"));
    }

    #[test]
    fn test_additive_toggle() {
        let mut selection = Selection::new();
        selection.select_node("a_1", false, false);
        assert!(selection.select_node("b_2", true, true));
        assert!(!selection.select_node("a_1", true, true));
        assert_eq!(selection.nodes().collect::<Vec<_>>(), vec!["b_2"]);
        assert!(selection.select_node("b_2", true, false));
        assert!(selection.select_node("c_3", false, true));
        assert_eq!(selection.node_count(), 1);
    }

    #[test]
    fn test_set_nodes_union_or_replace() {
        let mut selection = Selection::new();
        selection.set_nodes(["a".to_string()], false);
        assert_eq!(selection.set_nodes(["a".to_string(), "b".to_string()], true), 1);
        assert_eq!(selection.set_nodes(["c".to_string()], false), 1);
        assert_eq!(selection.nodes().collect::<Vec<_>>(), vec!["c"]);
    }
}
