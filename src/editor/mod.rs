//! # Node Editor
//!
//! Headless editor state tying the graph, viewport, selection, palette and
//! persistence together. The egui shell only renders it and forwards input.
//!
//! ## Submodules
//! - [`coordinate_transform`]: world/screen viewport transform
//! - [`interaction`]: pointer and keyboard state machine
//! - [`layout`]: node and port geometry
//! - [`selection`]: node/connection selection model
//! - [`canvas`]: egui rendering
//! - [`style`]: colors and stroke widths
//! - [`utils`]: bezier geometry and drawing helpers

pub mod canvas;
pub mod coordinate_transform;
pub mod interaction;
pub mod layout;
pub mod selection;
pub mod style;
pub mod utils;

pub use coordinate_transform::Viewport;
pub use interaction::{InteractionState, Key, Modifiers, PointerButton};
pub use layout::PortRef;
pub use selection::Selection;
pub use style::EditorStyle;

use egui::{Pos2, Vec2};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::compiler;
use crate::error::{NodeFlowError, Result};
use crate::executor::ChainExecutor;
use crate::executor::bridge::{RunResponse, ScriptHost};
use crate::graph::{Connection, Graph, LibraryReconcile, PersistedGraph};
use crate::node_types::{ConfigPatch, Library, NodeDefinition, PortKind, UiHandle};
use crate::palette::{PaletteHost, PaletteItem, PaletteRow, PaletteTree, RemoveOutcome};
use crate::storage::{self, PersistenceStore};

/// Screen point where palette clicks start probing for a free spot.
pub const AUTO_PLACE_ORIGIN: Pos2 = Pos2::new(20.0, 20.0);
pub const AUTO_PLACE_STEP: f32 = 20.0;
/// Horizontal gap between a node and one created from its port menu.
const CONNECTED_NODE_GAP: f32 = 60.0;

/// Result of [`NodeEditor::run_script`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// No script host is configured; the script was only compiled.
    Exported(String),
    Ran { script: String, response: RunResponse },
}

pub struct NodeEditor {
    library: Library,
    graph: Graph,
    viewport: Viewport,
    selection: Selection,
    interaction: InteractionState,
    space_held: bool,
    port_menu: Option<(PortRef, Pos2)>,
    palette: PaletteTree,
    store: Arc<dyn PersistenceStore>,
    palette_host: Option<Arc<dyn PaletteHost>>,
    script_host: Option<Arc<dyn ScriptHost>>,
    ui_handles: HashMap<String, UiHandle>,
    /// Nodes a background worker is currently auto-executing.
    active_nodes: HashSet<String>,
    pub style: EditorStyle,
}

impl NodeEditor {
    pub fn new(library: Library, store: Arc<dyn PersistenceStore>) -> Self {
        let mut palette = PaletteTree::load(&*store, &library);
        if palette.ensure_integrity(&library) {
            palette.save(&*store);
        }
        Self {
            library,
            graph: Graph::new(),
            viewport: Viewport::new(),
            selection: Selection::new(),
            interaction: InteractionState::Idle,
            space_held: false,
            port_menu: None,
            palette,
            store,
            palette_host: None,
            script_host: None,
            ui_handles: HashMap::new(),
            active_nodes: HashSet::new(),
            style: EditorStyle::default(),
        }
    }

    pub fn with_palette_host(mut self, host: Arc<dyn PaletteHost>) -> Self {
        self.palette_host = Some(host);
        self
    }

    pub fn with_script_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.script_host = Some(host);
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn set_script_host(&mut self, host: Option<Arc<dyn ScriptHost>>) {
        self.script_host = host;
    }

    pub fn script_host(&self) -> Option<Arc<dyn ScriptHost>> {
        self.script_host.clone()
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn interaction_state(&self) -> &InteractionState {
        &self.interaction
    }

    pub fn palette(&self) -> &PaletteTree {
        &self.palette
    }

    pub fn is_dirty(&self) -> bool {
        self.graph.is_dirty()
    }

    pub fn set_node_active(&mut self, node_id: &str, active: bool) {
        if active {
            self.active_nodes.insert(node_id.to_string());
        } else {
            self.active_nodes.remove(node_id);
        }
    }

    pub fn clear_active_nodes(&mut self) {
        self.active_nodes.clear();
    }

    pub fn is_node_active(&self, node_id: &str) -> bool {
        self.active_nodes.contains(node_id)
    }

    // ---- graph mutation -------------------------------------------------

    /// Place a new node and select it exclusively.
    pub fn create_node(&mut self, definition_id: &str, world: Pos2) -> Result<String> {
        let definition = self
            .library
            .get(definition_id)
            .cloned()
            .ok_or_else(|| NodeFlowError::UnknownDefinition(definition_id.to_string()))?;
        let id = self.graph.create_node(definition, world).id.clone();
        self.mount_node(&id);
        self.selection.select_node(&id, false, false);
        Ok(id)
    }

    pub fn add_connection(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<bool> {
        let added = self.graph.add_connection(from_node, from_port, to_node, to_port)?;
        self.selection.retain_existing(&self.graph);
        Ok(added)
    }

    /// Remove a node, tearing down its UI first.
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        if let Some(handle) = self.ui_handles.remove(node_id) {
            handle.dispose();
        }
        let removed = self.graph.remove_node(node_id).is_some();
        self.selection.deselect_node(node_id);
        self.selection.retain_existing(&self.graph);
        self.active_nodes.remove(node_id);
        removed
    }

    pub fn remove_connection(&mut self, connection: &Connection) -> bool {
        self.selection.forget_connection(connection);
        self.graph.remove_connection(connection)
    }

    /// Delete the selected connection, or else every selected node.
    pub fn delete_selection(&mut self) -> bool {
        if let Some(connection) = self.selection.connection().cloned() {
            return self.remove_connection(&connection);
        }
        let ids: Vec<String> = self.selection.nodes().map(str::to_string).collect();
        let mut removed = false;
        for id in ids {
            removed |= self.remove_node(&id);
        }
        removed
    }

    pub fn select_node(&mut self, node_id: &str, additive: bool, toggle: bool) -> bool {
        if !self.graph.contains_node(node_id) {
            return false;
        }
        self.selection.select_node(node_id, additive, toggle)
    }

    pub fn select_connection(&mut self, connection: &Connection) -> bool {
        if !self.graph.connections().contains(connection) {
            return false;
        }
        self.selection.select_connection(connection.clone());
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// User edit of a config value.
    pub fn update_config(&mut self, node_id: &str, key: &str, value: &str) -> bool {
        self.graph.update_config(node_id, key, value, false)
    }

    /// Apply writes reported by an auto-execute hook; ignored for removed nodes.
    pub fn apply_patch(&mut self, node_id: &str, patch: ConfigPatch) -> bool {
        self.graph.apply_patch(node_id, patch)
    }

    /// Replace the definition catalog and heal the graph and palette against it.
    pub fn set_library(&mut self, library: Library) -> LibraryReconcile {
        let report = self.graph.reconcile_library(&library);
        for id in &report.removed_nodes {
            if let Some(handle) = self.ui_handles.remove(id) {
                handle.dispose();
            }
            self.active_nodes.remove(id);
        }
        self.library = library;
        self.selection.retain_existing(&self.graph);
        self.mount_all();
        if self.palette.ensure_integrity(&self.library) {
            self.palette.save(&*self.store);
        }
        report
    }

    /// (Re)mount a UI node's render hook, disposing the previous handle.
    fn mount_node(&mut self, node_id: &str) {
        if let Some(previous) = self.ui_handles.remove(node_id) {
            previous.dispose();
        }
        let Some(node) = self.graph.node(node_id) else {
            return;
        };
        let Some(hook) = node.definition.render.clone() else {
            return;
        };
        let mut patch = ConfigPatch::new();
        let handle = hook.mount(node, &mut patch);
        self.graph.apply_patch(node_id, patch);
        if let Some(handle) = handle {
            self.ui_handles.insert(node_id.to_string(), handle);
        }
    }

    fn mount_all(&mut self) {
        let ids: Vec<String> = self.graph.node_ids().map(str::to_string).collect();
        for id in ids {
            self.mount_node(&id);
        }
    }

    fn dispose_all(&mut self) {
        for (_, handle) in self.ui_handles.drain() {
            handle.dispose();
        }
    }

    // ---- placement ------------------------------------------------------

    /// First unoccupied world position probing diagonally from `screen`.
    pub fn find_available_position(&self, screen: Pos2, step: f32) -> Pos2 {
        let attempts = (self.graph.len() + 1).max(10);
        for attempt in 0..attempts {
            let candidate = self
                .viewport
                .screen_to_world(screen + Vec2::splat(step * attempt as f32));
            if !self.graph.is_position_occupied(candidate) {
                return candidate;
            }
        }
        self.viewport
            .screen_to_world(screen + Vec2::splat(step * attempts as f32))
    }

    /// Instantiate a definition near the top-left of the view.
    pub fn place_definition(&mut self, definition_id: &str) -> Result<String> {
        let position = self.find_available_position(AUTO_PLACE_ORIGIN, AUTO_PLACE_STEP);
        self.create_node(definition_id, position)
    }

    /// Definitions that can be wired to `port`.
    pub fn compatible_definitions(&self, port: &PortRef) -> Vec<Arc<NodeDefinition>> {
        self.library.compatible_with(port.kind, &port.port)
    }

    /// Create a node beside `port`'s node and wire it to that port.
    pub fn create_connected_node(&mut self, port: &PortRef, definition_id: &str) -> Result<String> {
        let anchor = self
            .graph
            .node(&port.node_id)
            .ok_or_else(|| NodeFlowError::UnknownNode(port.node_id.clone()))?;
        let definition = self
            .library
            .get(definition_id)
            .ok_or_else(|| NodeFlowError::UnknownDefinition(definition_id.to_string()))?;
        if !definition.has_port(port.kind.opposite(), &port.port) {
            return Err(NodeFlowError::UnknownPort {
                node_id: definition_id.to_string(),
                port: port.port.clone(),
                kind: port.kind.opposite().as_str(),
            });
        }
        let shift = layout::NODE_WIDTH + CONNECTED_NODE_GAP;
        let position = match port.kind {
            PortKind::Output => anchor.position + Vec2::new(shift, 0.0),
            PortKind::Input => anchor.position - Vec2::new(shift, 0.0),
        };
        let id = self.create_node(definition_id, position)?;
        match port.kind {
            PortKind::Output => {
                self.add_connection(&port.node_id, &port.port, &id, &port.port)?
            }
            PortKind::Input => {
                self.add_connection(&id, &port.port, &port.node_id, &port.port)?
            }
        };
        Ok(id)
    }

    // ---- palette --------------------------------------------------------

    pub fn palette_rows(&self) -> Vec<PaletteRow> {
        self.palette.rows()
    }

    pub fn create_palette_directory(&mut self, parent_id: &str, name: &str) -> Option<String> {
        let id = self.palette.create_directory(parent_id, name)?;
        self.palette.save(&*self.store);
        Some(id)
    }

    pub fn toggle_palette_directory(&mut self, directory_id: &str) -> bool {
        let toggled = self.palette.toggle_collapse(directory_id);
        if toggled {
            self.palette.save(&*self.store);
        }
        toggled
    }

    pub fn move_palette_item(&mut self, item_id: &str, parent_id: &str, index: usize) -> bool {
        let moved = self.palette.move_item(item_id, parent_id, index);
        if moved {
            self.palette.save(&*self.store);
        }
        moved
    }

    /// Place the definition behind a palette leaf.
    pub fn activate_palette_item(&mut self, item_id: &str) -> Result<Option<String>> {
        match self.palette.item(item_id).cloned() {
            Some(PaletteItem::Node { definition_id }) => self.place_definition(&definition_id).map(Some),
            _ => Ok(None),
        }
    }

    /// Ask the host for a copy of a leaf's definition and insert it right after the leaf.
    ///
    /// Returns the new definition id. Host failures are logged and leave the
    /// palette untouched.
    pub async fn duplicate_palette_item(&mut self, item_id: &str) -> Option<String> {
        let Some(PaletteItem::Node { definition_id }) = self.palette.item(item_id).cloned() else {
            return None;
        };
        let host = self.palette_host.clone()?;
        let definition = match host.duplicate_definition(&definition_id).await {
            Ok(Some(definition)) => definition,
            Ok(None) => return None,
            Err(e) => {
                log::error!("Failed to duplicate palette node {definition_id}: {e:#}");
                return None;
            }
        };
        let parent = self
            .palette
            .parent_of(item_id)
            .unwrap_or(self.palette.root_id())
            .to_string();
        let index = self.palette.index_in_parent(item_id);
        let new_id = definition.id.clone();

        let mut library = self.library.clone();
        library.upsert(definition);
        self.palette.place_after(&parent, index, &new_id);
        self.set_library(library);
        self.palette.save(&*self.store);
        log::info!("Duplicated {definition_id} as {new_id}");
        Some(new_id)
    }

    /// Remove a leaf or a directory together with the definitions it holds.
    ///
    /// The host may veto or report that only some definitions were removed.
    /// Without a host every contained definition is dropped.
    pub async fn remove_palette_item(&mut self, item_id: &str) -> bool {
        if item_id == self.palette.root_id() {
            return false;
        }
        let definition_ids = match self.palette.item(item_id) {
            Some(PaletteItem::Directory { .. }) => self.palette.collect_definition_ids(item_id),
            Some(PaletteItem::Node { definition_id }) => vec![definition_id.clone()],
            None => return false,
        };

        let removed = match (&self.palette_host, definition_ids.is_empty()) {
            (Some(host), false) => match host.remove_definitions(&definition_ids).await {
                Ok(RemoveOutcome::Cancelled) => return false,
                Ok(RemoveOutcome::RemovedAll) => definition_ids,
                Ok(RemoveOutcome::Removed(subset)) => subset,
                Err(e) => {
                    log::error!("Failed to remove palette item {item_id}: {e:#}");
                    return false;
                }
            },
            _ => definition_ids,
        };

        if !self.palette.remove_item(item_id) {
            return false;
        }
        let remaining = self.library.without(removed.iter().map(String::as_str));
        self.set_library(remaining);
        self.palette.save(&*self.store);
        true
    }

    // ---- persistence ----------------------------------------------------

    pub fn snapshot(&self) -> PersistedGraph {
        self.graph.snapshot()
    }

    /// Replace the graph with persisted data. Unknown node types are dropped.
    pub fn load_graph(&mut self, data: &PersistedGraph) {
        self.dispose_all();
        self.graph = Graph::hydrate(&self.library, data);
        self.selection.clear();
        self.interaction = InteractionState::Idle;
        self.mount_all();
        self.graph.clear_dirty();
    }

    /// Write the autosave when the graph changed. Returns whether it was written.
    pub fn autosave(&mut self) -> bool {
        if !self.graph.is_dirty() {
            return false;
        }
        match storage::save_graph(&*self.store, &self.graph.snapshot()) {
            Ok(written) => {
                if written {
                    self.graph.clear_dirty();
                }
                written
            }
            Err(e) => {
                log::error!("Autosave failed: {e}");
                false
            }
        }
    }

    /// Load the autosave if one exists.
    pub fn restore(&mut self) -> bool {
        match storage::load_graph(&*self.store) {
            Ok(Some(data)) => {
                self.load_graph(&data);
                log::info!("Restored {} node(s) from autosave", self.graph.len());
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("Failed to restore autosave: {e}");
                false
            }
        }
    }

    /// Empty the workspace. With `clear_storage` the autosave is dropped too.
    pub fn clear(&mut self, clear_storage: bool) {
        self.dispose_all();
        self.graph.clear();
        self.selection.clear();
        self.active_nodes.clear();
        self.interaction = InteractionState::Idle;
        if clear_storage {
            if let Err(e) = storage::clear_graph(&*self.store) {
                log::warn!("Failed to clear autosave: {e}");
            }
            self.graph.mark_dirty();
        } else {
            self.graph.clear_dirty();
        }
    }

    // ---- export / run ---------------------------------------------------

    /// Run the auto-execution chain, then compile.
    pub async fn export_script(&mut self) -> Result<String> {
        ChainExecutor::new(self.script_host.clone())
            .run_chain_executions(&mut self.graph)
            .await?;
        let script = compiler::generate_script(&self.graph)?;
        log::info!("Exported script ({} bytes)", script.len());
        Ok(script)
    }

    /// Export and send the script to the host, if one is configured.
    pub async fn run_script(&mut self) -> Result<RunOutcome> {
        let script = self.export_script().await?;
        let Some(host) = self.script_host.clone() else {
            return Ok(RunOutcome::Exported(script));
        };
        let response = host.run_script(&script).await?;
        Ok(RunOutcome::Ran { script, response })
    }

    /// Refresh one auto-execute node, optionally after its upstream.
    pub async fn run_auto_node(&mut self, node_id: &str, include_upstream: bool) -> Result<()> {
        ChainExecutor::new(self.script_host.clone())
            .run_auto_node(&mut self.graph, node_id, include_upstream)
            .await
    }
}

impl Drop for NodeEditor {
    fn drop(&mut self) {
        self.dispose_all();
    }
}
