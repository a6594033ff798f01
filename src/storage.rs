//! Key/value persistence capability plus the graph autosave envelope.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{NodeFlowError, Result};
use crate::graph::PersistedGraph;

pub const AUTOSAVE_KEY: &str = "nodeflow.graph.autosave";
pub const PALETTE_KEY: &str = "nodeflow.palette";
pub const CUSTOM_NODES_KEY: &str = "nodeflow.customNodes.v1";

/// Autosave payloads above this many bytes are skipped.
pub const MAX_AUTOSAVE_BYTES: usize = 5 * 1024 * 1024;

/// Where the editor keeps its graph, palette layout and custom nodes.
pub trait PersistenceStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PersistenceStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/nodeflow`, or the working directory when none is known.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("nodeflow"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl PersistenceStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutosaveEnvelope {
    version: u32,
    updated_at: i64,
    graph: PersistedGraph,
}

/// Write the graph autosave. Returns `Ok(false)` when the payload was too large.
pub fn save_graph(store: &dyn PersistenceStore, graph: &PersistedGraph) -> Result<bool> {
    let envelope = AutosaveEnvelope {
        version: 1,
        updated_at: Utc::now().timestamp_millis(),
        graph: graph.clone(),
    };
    let serialized = serde_json::to_string(&envelope)?;
    if serialized.len() > MAX_AUTOSAVE_BYTES {
        log::warn!("Autosave payload is too large ({} bytes) and was skipped.", serialized.len());
        return Ok(false);
    }
    store.save(AUTOSAVE_KEY, &serialized)?;
    Ok(true)
}

/// Read the autosave; accepts the envelope or a bare graph.
pub fn load_graph(store: &dyn PersistenceStore) -> Result<Option<PersistedGraph>> {
    let Some(stored) = store.load(AUTOSAVE_KEY)? else {
        return Ok(None);
    };
    if stored.trim().is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(&stored)?;
    let graph = match value.get("graph") {
        Some(graph) if graph.is_object() => graph.clone(),
        _ if value.get("nodes").is_some() => value,
        _ => {
            return Err(NodeFlowError::Persistence(
                "autosave does not contain a graph".to_string(),
            ));
        }
    };
    Ok(Some(serde_json::from_value(graph)?))
}

pub fn clear_graph(store: &dyn PersistenceStore) -> Result<()> {
    store.clear(AUTOSAVE_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Connection, PersistedNode};
    use egui::Pos2;
    use tempfile::tempdir;

    fn sample() -> PersistedGraph {
        PersistedGraph {
            nodes: vec![PersistedNode {
                id: "number_1".into(),
                node_type: "number".into(),
                position: Pos2::new(10.0, 20.0),
                config: [("value".to_string(), "5".to_string())].into_iter().collect(),
            }],
            connections: vec![Connection::new("number_1", "Value", "sum_2", "A")],
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(load_graph(&store).unwrap().is_none());
        assert!(save_graph(&store, &sample()).unwrap());
        assert_eq!(load_graph(&store).unwrap(), Some(sample()));
        clear_graph(&store).unwrap();
        assert!(load_graph(&store).unwrap().is_none());
    }

    #[test]
    fn test_envelope_shape() {
        let store = MemoryStore::new();
        save_graph(&store, &sample()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&store.load(AUTOSAVE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw["updatedAt"].is_i64());
        assert_eq!(raw["graph"]["nodes"][0]["type"], "number");
        assert_eq!(raw["graph"]["connections"][0]["fromNode"], "number_1");
    }

    #[test]
    fn test_bare_graph_is_accepted() {
        let store = MemoryStore::new();
        store
            .save(AUTOSAVE_KEY, &serde_json::to_string(&sample()).unwrap())
            .unwrap();
        assert_eq!(load_graph(&store).unwrap(), Some(sample()));
    }

    #[test]
    fn test_oversized_payload_is_skipped() {
        let store = MemoryStore::new();
        let mut graph = sample();
        graph.nodes[0]
            .config
            .insert("blob".into(), "x".repeat(MAX_AUTOSAVE_BYTES));
        assert!(!save_graph(&store, &graph).unwrap());
        assert!(store.load(AUTOSAVE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_file_store() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert!(store.load("a/b").unwrap().is_none());
        store.save("a/b", "{}").unwrap();
        assert_eq!(store.load("a/b").unwrap().as_deref(), Some("{}"));
        assert!(dir.path().join("nested").join("a_b.json").exists());
        store.clear("a/b").unwrap();
        store.clear("a/b").unwrap();
        assert!(store.load("a/b").unwrap().is_none());
    }
}
