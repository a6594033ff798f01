//! Application settings persisted as `settings.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::editor::EditorStyle;
use crate::editor::coordinate_transform::{MAX_SCALE, MIN_SCALE};
use crate::error::Result;
use crate::executor::bridge::{DEFAULT_SERVER_URL, HttpScriptHost, ScriptHost, normalize_server_url};
use crate::storage::FileStore;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub style: EditorStyle,
    pub server_url: String,
    /// Zero disables the timeout.
    pub request_timeout_secs: u64,
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub autosave: bool,
    pub data_dir: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            style: EditorStyle::default(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            request_timeout_secs: 30,
            min_zoom: MIN_SCALE,
            max_zoom: MAX_SCALE,
            autosave: true,
            data_dir: None,
        }
    }
}

impl AppSettings {
    /// Read settings from `path`; a missing or unreadable file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to read {}: {e}", path.display());
                }
                return Self::default();
            }
        };
        match serde_json::from_str::<AppSettings>(&json) {
            Ok(settings) => {
                log::info!("Settings loaded from {}", path.display());
                settings.sanitized()
            }
            Err(e) => {
                log::warn!("Ignoring malformed {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn load() -> Self {
        Self::load_from(Path::new(SETTINGS_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(SETTINGS_FILE))
    }

    /// Normalized server URL, or the default when blank.
    pub fn server_base(&self) -> String {
        match normalize_server_url(&self.server_url) {
            url if url.is_empty() => DEFAULT_SERVER_URL.to_string(),
            url => url,
        }
    }

    pub fn script_host(&self) -> Arc<dyn ScriptHost> {
        Arc::new(
            HttpScriptHost::new(&self.server_base())
                .with_timeout(Duration::from_secs(self.request_timeout_secs)),
        )
    }

    pub fn file_store(&self) -> FileStore {
        FileStore::new(self.data_dir.clone().unwrap_or_else(FileStore::default_dir))
    }

    /// Zoom bounds in ascending order, kept positive.
    pub fn zoom_bounds(&self) -> (f32, f32) {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        let min = if valid(self.min_zoom) { self.min_zoom } else { MIN_SCALE };
        let max = if valid(self.max_zoom) { self.max_zoom } else { MAX_SCALE };
        (min.min(max), min.max(max))
    }

    fn sanitized(mut self) -> Self {
        (self.min_zoom, self.max_zoom) = self.zoom_bounds();
        self
    }
}
