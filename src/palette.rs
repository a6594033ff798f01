//! Palette tree: the user-arranged catalog of node definitions.
//!
//! Items live in an arena keyed by id with parent links, so moves can reject
//! cycles by walking up from the target. On disk the tree is nested JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::NodeFlowError;
use crate::node_types::{Library, NodeDefinition};
use crate::storage::{PALETTE_KEY, PersistenceStore};

pub const ROOT_ID: &str = "dir:root";
pub const ROOT_NAME: &str = "Nodes";
pub const DIRECTORY_PREFIX: &str = "dir:";
pub const NODE_PREFIX: &str = "node:";
const DEFAULT_CATEGORY: &str = "Custom";
const DEFAULT_DIRECTORY_NAME: &str = "New Folder";

/// Leaf id for a definition.
pub fn node_item_id(definition_id: &str) -> String {
    format!("{NODE_PREFIX}{definition_id}")
}

fn new_directory_id() -> String {
    format!("{DIRECTORY_PREFIX}{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaletteItem {
    Directory {
        name: String,
        collapsed: bool,
        /// Created from a library category rather than by the user.
        generated: bool,
        children: Vec<String>,
    },
    Node {
        definition_id: String,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    item: PaletteItem,
    parent: Option<String>,
}

/// A visible row when the tree is flattened for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteRow {
    pub id: String,
    pub depth: usize,
    pub item: PaletteItem,
}

/// Where a dragged item would land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropPlacement {
    pub parent_id: String,
    pub index: usize,
}

/// Directory metadata as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryMeta {
    pub collapsed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generated: bool,
}

/// Nested on-disk form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaletteItemData {
    Directory {
        id: String,
        name: String,
        #[serde(default)]
        children: Vec<PaletteItemData>,
        #[serde(default)]
        meta: DirectoryMeta,
    },
    Node {
        id: String,
        #[serde(rename = "nodeId")]
        node_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct PaletteTree {
    root: String,
    entries: HashMap<String, Entry>,
}

impl Default for PaletteTree {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ROOT_ID.to_string(),
            Entry {
                item: PaletteItem::Directory {
                    name: ROOT_NAME.to_string(),
                    collapsed: false,
                    generated: false,
                    children: Vec::new(),
                },
                parent: None,
            },
        );
        Self {
            root: ROOT_ID.to_string(),
            entries,
        }
    }
}

impl PaletteTree {
    /// One generated directory per category, sorted by name.
    pub fn default_from_library(library: &Library) -> Self {
        let mut tree = Self::default();
        let mut groups: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
        for definition in library.iter() {
            let category = match definition.category.trim() {
                "" => DEFAULT_CATEGORY.to_string(),
                category => category.to_string(),
            };
            groups
                .entry(category.to_lowercase())
                .or_insert_with(|| (category, Vec::new()))
                .1
                .push(definition.id.clone());
        }
        let root = tree.root.clone();
        for (name, ids) in groups.into_values() {
            let dir = tree.insert_directory(&root, &name, true);
            for id in ids {
                tree.insert_leaf(&dir, &id, None);
            }
        }
        tree
    }

    /// Rebuild from the nested form. `None` unless the root is a directory.
    pub fn from_data(data: &PaletteItemData) -> Option<Self> {
        let PaletteItemData::Directory { id, name, children, meta } = data else {
            return None;
        };
        let mut tree = Self {
            root: id.clone(),
            entries: HashMap::new(),
        };
        tree.entries.insert(
            id.clone(),
            Entry {
                item: PaletteItem::Directory {
                    name: name.clone(),
                    collapsed: meta.collapsed,
                    generated: meta.generated,
                    children: Vec::new(),
                },
                parent: None,
            },
        );
        tree.load_children(id, children);
        Some(tree)
    }

    fn load_children(&mut self, parent: &str, children: &[PaletteItemData]) {
        for child in children {
            let (id, item, grandchildren) = match child {
                PaletteItemData::Directory { id, name, children, meta } => (
                    id,
                    PaletteItem::Directory {
                        name: name.clone(),
                        collapsed: meta.collapsed,
                        generated: meta.generated,
                        children: Vec::new(),
                    },
                    Some(children),
                ),
                PaletteItemData::Node { id, node_id } => (
                    id,
                    PaletteItem::Node {
                        definition_id: node_id.clone(),
                    },
                    None,
                ),
            };
            if id.is_empty() || self.entries.contains_key(id) {
                continue;
            }
            self.entries.insert(
                id.clone(),
                Entry {
                    item,
                    parent: Some(parent.to_string()),
                },
            );
            if let Some(siblings) = self.children_mut(parent) {
                siblings.push(id.clone());
            }
            if let Some(grandchildren) = grandchildren {
                self.load_children(id, grandchildren);
            }
        }
    }

    pub fn to_data(&self) -> PaletteItemData {
        self.item_data(&self.root)
    }

    fn item_data(&self, id: &str) -> PaletteItemData {
        match self.entries.get(id).map(|entry| &entry.item) {
            Some(PaletteItem::Directory {
                name,
                collapsed,
                generated,
                children,
            }) => PaletteItemData::Directory {
                id: id.to_string(),
                name: name.clone(),
                children: children.iter().map(|child| self.item_data(child)).collect(),
                meta: DirectoryMeta {
                    collapsed: *collapsed,
                    generated: *generated,
                },
            },
            Some(PaletteItem::Node { definition_id }) => PaletteItemData::Node {
                id: id.to_string(),
                node_id: definition_id.clone(),
            },
            None => PaletteItemData::Node {
                id: id.to_string(),
                node_id: String::new(),
            },
        }
    }

    /// Load the saved layout, falling back to the default tree.
    pub fn load(store: &dyn PersistenceStore, library: &Library) -> Self {
        let stored = match store.load(PALETTE_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("Failed to load palette state: {e}");
                None
            }
        };
        let tree = stored.and_then(|text| match serde_json::from_str::<PaletteItemData>(&text) {
            Ok(data) => Self::from_data(&data),
            Err(e) => {
                log::warn!("Failed to parse palette state: {e}");
                None
            }
        });
        tree.unwrap_or_else(|| Self::default_from_library(library))
    }

    pub fn save(&self, store: &dyn PersistenceStore) {
        let result = serde_json::to_string(&self.to_data())
            .map_err(NodeFlowError::from)
            .and_then(|json| store.save(PALETTE_KEY, &json));
        if let Err(e) = result {
            log::warn!("Failed to save palette state: {e}");
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    pub fn item(&self, id: &str) -> Option<&PaletteItem> {
        self.entries.get(id).map(|entry| &entry.item)
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.entries.get(id)?.parent.as_deref()
    }

    pub fn children(&self, directory_id: &str) -> &[String] {
        match self.item(directory_id) {
            Some(PaletteItem::Directory { children, .. }) => children,
            _ => &[],
        }
    }

    pub fn is_directory(&self, id: &str) -> bool {
        matches!(self.item(id), Some(PaletteItem::Directory { .. }))
    }

    pub fn index_in_parent(&self, id: &str) -> Option<usize> {
        let parent = self.parent_of(id)?;
        self.children(parent).iter().position(|child| child == id)
    }

    /// Leaf currently referencing `definition_id`.
    pub fn leaf_for(&self, definition_id: &str) -> Option<&str> {
        self.entries.iter().find_map(|(id, entry)| match &entry.item {
            PaletteItem::Node { definition_id: def } if def == definition_id => Some(id.as_str()),
            _ => None,
        })
    }

    /// Every referenced definition id in display order.
    pub fn definition_ids(&self) -> Vec<String> {
        self.collect_definition_ids(&self.root)
    }

    fn children_mut(&mut self, directory_id: &str) -> Option<&mut Vec<String>> {
        match self.entries.get_mut(directory_id).map(|entry| &mut entry.item) {
            Some(PaletteItem::Directory { children, .. }) => Some(children),
            _ => None,
        }
    }

    fn insert_directory(&mut self, parent: &str, name: &str, generated: bool) -> String {
        let id = new_directory_id();
        self.entries.insert(
            id.clone(),
            Entry {
                item: PaletteItem::Directory {
                    name: name.to_string(),
                    collapsed: false,
                    generated,
                    children: Vec::new(),
                },
                parent: Some(parent.to_string()),
            },
        );
        if let Some(children) = self.children_mut(parent) {
            children.push(id.clone());
        }
        id
    }

    fn insert_leaf(&mut self, parent: &str, definition_id: &str, index: Option<usize>) -> String {
        let id = node_item_id(definition_id);
        self.entries.insert(
            id.clone(),
            Entry {
                item: PaletteItem::Node {
                    definition_id: definition_id.to_string(),
                },
                parent: Some(parent.to_string()),
            },
        );
        if let Some(children) = self.children_mut(parent) {
            let index = index.unwrap_or(children.len()).min(children.len());
            children.insert(index, id.clone());
        }
        id
    }

    /// Pre-order search by name, root included.
    pub fn find_directory_by_name(&self, name: &str) -> Option<&str> {
        let mut stack = vec![self.root.as_str()];
        while let Some(id) = stack.pop() {
            if let Some(PaletteItem::Directory { name: dir_name, children, .. }) = self.item(id) {
                if dir_name == name {
                    return Some(id);
                }
                stack.extend(children.iter().rev().map(String::as_str));
            }
        }
        None
    }

    /// Drop leaves for unknown or repeated definitions, then add leaves for
    /// definitions the tree does not show yet.
    ///
    /// Returns whether anything changed.
    pub fn ensure_integrity(&mut self, library: &Library) -> bool {
        let mut seen = HashSet::new();
        let mut stale = Vec::new();
        for id in self.walk_ids(&self.root) {
            if let Some(PaletteItem::Node { definition_id }) = self.item(&id) {
                if !library.contains(definition_id) || !seen.insert(definition_id.clone()) {
                    stale.push(id);
                }
            }
        }
        let mut changed = !stale.is_empty();
        for id in stale {
            self.detach(&id);
        }

        for definition in library.iter() {
            if seen.contains(&definition.id) {
                continue;
            }
            let leaf = node_item_id(&definition.id);
            if self.entries.contains_key(&leaf) {
                self.detach(&leaf);
            }
            let category = match definition.category.trim() {
                "" => DEFAULT_CATEGORY,
                category => category,
            };
            let target = self
                .find_directory_by_name(category)
                .unwrap_or(&self.root)
                .to_string();
            self.insert_leaf(&target, &definition.id, None);
            changed = true;
        }
        changed
    }

    /// Item ids below `id` in pre-order, excluding `id`.
    fn walk_ids(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        for child in self.children(id) {
            out.push(child.clone());
            out.extend(self.walk_ids(child));
        }
        out
    }

    /// Visible rows, skipping the contents of collapsed directories.
    pub fn rows(&self) -> Vec<PaletteRow> {
        let mut rows = Vec::new();
        self.push_rows(&self.root, 0, &mut rows);
        rows
    }

    fn push_rows(&self, directory: &str, depth: usize, rows: &mut Vec<PaletteRow>) {
        for child in self.children(directory) {
            let Some(item) = self.item(child) else {
                continue;
            };
            rows.push(PaletteRow {
                id: child.clone(),
                depth,
                item: item.clone(),
            });
            if let PaletteItem::Directory { collapsed: false, .. } = item {
                self.push_rows(child, depth + 1, rows);
            }
        }
    }

    /// Create a directory under `parent_id`. Blank names fall back to a default.
    pub fn create_directory(&mut self, parent_id: &str, name: &str) -> Option<String> {
        if !self.is_directory(parent_id) {
            return None;
        }
        let name = match name.trim() {
            "" => DEFAULT_DIRECTORY_NAME,
            trimmed => trimmed,
        };
        Some(self.insert_directory(parent_id, name, false))
    }

    pub fn toggle_collapse(&mut self, directory_id: &str) -> bool {
        match self.entries.get_mut(directory_id).map(|entry| &mut entry.item) {
            Some(PaletteItem::Directory { collapsed, .. }) => {
                *collapsed = !*collapsed;
                true
            }
            _ => false,
        }
    }

    /// Whether `candidate` sits somewhere below `ancestor`.
    pub fn is_descendant(&self, ancestor: &str, candidate: &str) -> bool {
        let mut current = self.parent_of(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent_of(id);
        }
        false
    }

    /// Move an item to `index` within `parent_id`.
    ///
    /// `index` counts positions before the item is taken out; moving further
    /// down the same directory is adjusted accordingly. Moving a directory into
    /// itself or one of its descendants is refused.
    pub fn move_item(&mut self, item_id: &str, parent_id: &str, index: usize) -> bool {
        if item_id == self.root || !self.entries.contains_key(item_id) || !self.is_directory(parent_id) {
            return false;
        }
        if self.is_directory(item_id) && (item_id == parent_id || self.is_descendant(item_id, parent_id)) {
            return false;
        }
        let Some(origin) = self.parent_of(item_id).map(str::to_string) else {
            return false;
        };
        let Some(origin_index) = self.index_in_parent(item_id) else {
            return false;
        };
        if let Some(siblings) = self.children_mut(&origin) {
            siblings.remove(origin_index);
        }

        let same_parent = origin == parent_id;
        let Some(children) = self.children_mut(parent_id) else {
            return false;
        };
        let mut insert_index = index.min(children.len() + usize::from(same_parent));
        if same_parent && origin_index < insert_index {
            insert_index -= 1;
        }
        let insert_index = insert_index.min(children.len());
        children.insert(insert_index, item_id.to_string());
        if let Some(entry) = self.entries.get_mut(item_id) {
            entry.parent = Some(parent_id.to_string());
        }
        true
    }

    fn detach(&mut self, id: &str) {
        if let Some(parent) = self.parent_of(id).map(str::to_string) {
            if let Some(siblings) = self.children_mut(&parent) {
                siblings.retain(|child| child != id);
            }
        }
        for child in self.walk_ids(id) {
            self.entries.remove(&child);
        }
        self.entries.remove(id);
    }

    /// Remove an item and everything below it. The root cannot be removed.
    pub fn remove_item(&mut self, id: &str) -> bool {
        if id == self.root || !self.entries.contains_key(id) {
            return false;
        }
        self.detach(id);
        true
    }

    /// Definition ids referenced below a directory, de-duplicated, in order.
    pub fn collect_definition_ids(&self, directory_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.walk_ids(directory_id)
            .into_iter()
            .filter_map(|id| match self.item(&id) {
                Some(PaletteItem::Node { definition_id }) => Some(definition_id.clone()),
                _ => None,
            })
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    /// Place the leaf for `definition_id` right after position `after` in
    /// `parent_id`, creating or moving it as needed.
    pub fn place_after(&mut self, parent_id: &str, after: Option<usize>, definition_id: &str) -> String {
        let parent = if self.is_directory(parent_id) {
            parent_id.to_string()
        } else {
            self.root.clone()
        };
        let len = self.children(&parent).len();
        let index = after.map_or(len, |i| (i + 1).min(len));
        let leaf = node_item_id(definition_id);
        if self.entries.contains_key(&leaf) {
            self.move_item(&leaf, &parent, index);
            leaf
        } else {
            self.insert_leaf(&parent, definition_id, Some(index))
        }
    }

    /// Dropping onto an item: before it when the pointer is above its midpoint.
    pub fn placement_at_item(&self, item_id: &str, pointer_y: f32, top: f32, height: f32) -> Option<DropPlacement> {
        let parent_id = self.parent_of(item_id)?.to_string();
        let index = self.index_in_parent(item_id)?;
        let before = pointer_y < top + height / 2.0;
        Some(DropPlacement {
            parent_id,
            index: if before { index } else { index + 1 },
        })
    }

    /// Dropping onto a directory header appends to that directory.
    pub fn placement_at_header(&self, directory_id: &str) -> Option<DropPlacement> {
        self.is_directory(directory_id).then(|| DropPlacement {
            parent_id: directory_id.to_string(),
            index: self.children(directory_id).len(),
        })
    }

    /// Dropping into a directory's child area, given each child's vertical midpoint.
    pub fn placement_in_container(
        &self,
        directory_id: &str,
        pointer_y: f32,
        child_midpoints: &[f32],
    ) -> Option<DropPlacement> {
        if !self.is_directory(directory_id) {
            return None;
        }
        let index = child_midpoints
            .iter()
            .position(|mid| pointer_y < *mid)
            .unwrap_or(child_midpoints.len());
        Some(DropPlacement {
            parent_id: directory_id.to_string(),
            index,
        })
    }
}

/// Outcome of asking the host to delete definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Cancelled,
    RemovedAll,
    /// Only these ids were actually removed.
    Removed(Vec<String>),
}

/// Backing store behind palette duplicate/remove commands.
#[async_trait]
pub trait PaletteHost: Send + Sync {
    /// Create a copy of a definition; `None` when nothing was created.
    async fn duplicate_definition(&self, definition_id: &str) -> anyhow::Result<Option<Arc<NodeDefinition>>>;

    async fn remove_definitions(&self, definition_ids: &[String]) -> anyhow::Result<RemoveOutcome>;
}
