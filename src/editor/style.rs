//! Editor styling: category header colors and connection strokes.

use egui::Color32;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Visual styling configuration for the graph editor.
#[derive(Clone, Serialize, Deserialize)]
pub struct EditorStyle {
    pub header_colors: HashMap<String, Color32>,
    pub use_gradient_connections: bool,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_connection_width")]
    pub connection_width: f32,
}

fn default_font_size() -> f32 {
    14.0
}

fn default_connection_width() -> f32 {
    2.2
}

pub const CONNECTION_COLOR: Color32 = Color32::from_rgb(59, 130, 246);
pub const SELECTED_CONNECTION_COLOR: Color32 = Color32::from_rgb(249, 115, 22);
pub const PENDING_CONNECTION_COLOR: Color32 = Color32::from_rgb(77, 124, 255);
pub const SELECTION_COLOR: Color32 = Color32::from_rgb(249, 115, 22);
pub const PREVIEW_COLOR: Color32 = Color32::from_rgb(250, 204, 21);
pub const ACTIVE_COLOR: Color32 = Color32::from_rgb(34, 197, 94);

impl Default for EditorStyle {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert("Default".into(), Color32::from_rgb(100, 100, 100));
        map.insert("UI".into(), Color32::from_rgb(200, 150, 50));
        map.insert("Custom".into(), Color32::from_rgb(50, 100, 200));
        map.insert("Samples".into(), Color32::from_rgb(50, 150, 100));
        map.insert("Data".into(), Color32::from_rgb(50, 150, 150));
        map.insert("System".into(), Color32::from_rgb(100, 50, 200));
        Self {
            header_colors: map,
            use_gradient_connections: true,
            font_size: default_font_size(),
            connection_width: default_connection_width(),
        }
    }
}

impl EditorStyle {
    /// Header color for a category, falling back to `Default`.
    pub fn header_color(&self, category: &str) -> Color32 {
        self.header_colors
            .get(category)
            .or_else(|| self.header_colors.get("Default"))
            .copied()
            .unwrap_or(Color32::from_rgb(100, 100, 100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_color_fallback() {
        let mut style = EditorStyle::default();
        assert_eq!(style.header_color("UI"), Color32::from_rgb(200, 150, 50));
        assert_eq!(style.header_color("Unknown"), Color32::from_rgb(100, 100, 100));
        style.header_colors.clear();
        assert_eq!(style.header_color("Unknown"), Color32::from_rgb(100, 100, 100));
    }

    #[test]
    fn test_style_deserializes_with_missing_fields() {
        let style: EditorStyle =
            serde_json::from_str(r#"{"header_colors": {}, "use_gradient_connections": false}"#).unwrap();
        assert_eq!(style.font_size, 14.0);
        assert_eq!(style.connection_width, 2.2);
    }
}
