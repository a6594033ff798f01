//! Pointer and keyboard state machine of the canvas.
//!
//! All positions are canvas-local screen coordinates. The egui shell converts
//! raw input into these calls, which keeps the gestures testable without a UI.

use egui::{Pos2, Rect, Vec2};

use super::NodeEditor;
use super::layout::{self, HANDLE_RADIUS, PortRef};
use super::utils::{CONNECTION_HIT_WIDTH, topmost_curve_hit};
use crate::node_types::PortKind;

/// Extra pick radius around port handles, in screen pixels.
const HANDLE_SLOP: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    /// Ctrl on Linux/Windows, Cmd on macOS.
    pub ctrl: bool,
}

impl Modifiers {
    pub fn additive(&self) -> bool {
        self.shift || self.ctrl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Delete,
    Escape,
    Space,
}

/// The gesture currently in progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InteractionState {
    #[default]
    Idle,
    Panning {
        origin: Pos2,
        last: Pos2,
        /// Started with the secondary button; a click without movement opens the port menu.
        context: bool,
        moved: bool,
    },
    Selecting {
        start: Pos2,
        current: Pos2,
        additive: bool,
    },
    Dragging {
        start_world: Pos2,
        origins: Vec<(String, Pos2)>,
        moved: bool,
    },
    Connecting {
        anchor: PortRef,
        current: Pos2,
    },
}

impl InteractionState {
    /// Screen rectangle of an in-progress box selection.
    pub fn selection_rect(&self) -> Option<Rect> {
        match self {
            InteractionState::Selecting { start, current, .. } => Some(Rect::from_two_pos(*start, *current)),
            _ => None,
        }
    }
}

impl NodeEditor {
    pub fn pointer_down(&mut self, pos: Pos2, button: PointerButton, modifiers: Modifiers) {
        let pan = match button {
            PointerButton::Secondary | PointerButton::Middle => true,
            PointerButton::Primary => self.space_held,
        };
        if pan {
            self.interaction = InteractionState::Panning {
                origin: pos,
                last: pos,
                context: button == PointerButton::Secondary,
                moved: false,
            };
            return;
        }
        self.port_menu = None;

        let world = self.viewport.screen_to_world(pos);
        let radius = HANDLE_RADIUS + HANDLE_SLOP / self.viewport.scale();
        if let Some(anchor) = layout::hit_port(&self.graph, world, radius) {
            self.interaction = InteractionState::Connecting { anchor, current: pos };
            return;
        }

        if let Some(node_id) = layout::hit_node(&self.graph, world) {
            self.press_node(&node_id, world, modifiers);
            return;
        }

        if let Some(connection) = self.connection_at(pos) {
            self.selection.select_connection(connection);
            self.interaction = InteractionState::Idle;
            return;
        }

        let additive = modifiers.additive();
        self.selection.clear_connection();
        if !additive {
            self.selection.clear_nodes();
        }
        self.selection.clear_preview();
        self.interaction = InteractionState::Selecting {
            start: pos,
            current: pos,
            additive,
        };
    }

    fn press_node(&mut self, node_id: &str, world: Pos2, modifiers: Modifiers) {
        let additive = modifiers.additive();
        let keep_group = self.selection.contains_node(node_id) && self.selection.node_count() > 1 && !additive;
        if !keep_group {
            self.selection.select_node(node_id, additive, modifiers.ctrl);
        }
        self.interaction = InteractionState::Idle;

        let in_controls = self
            .graph
            .node(node_id)
            .and_then(layout::controls_area)
            .is_some_and(|area| area.contains(world));
        if additive || in_controls {
            return;
        }

        let group: Vec<String> = if self.selection.node_count() == 0 {
            vec![node_id.to_string()]
        } else {
            self.selection.nodes().map(str::to_string).collect()
        };
        let origins = group
            .into_iter()
            .filter_map(|id| {
                let position = self.graph.node(&id)?.position;
                Some((id, position))
            })
            .collect();
        self.interaction = InteractionState::Dragging {
            start_world: world,
            origins,
            moved: false,
        };
    }

    /// Topmost connection under a screen position.
    pub fn connection_at(&self, pos: Pos2) -> Option<crate::graph::Connection> {
        let world = self.viewport.screen_to_world(pos);
        let (connections, curves): (Vec<_>, Vec<_>) = self
            .graph
            .connections()
            .iter()
            .filter_map(|connection| {
                let curve = self.connection_endpoints(connection)?;
                Some((connection, curve))
            })
            .unzip();
        let threshold = CONNECTION_HIT_WIDTH / 2.0 / self.viewport.scale();
        topmost_curve_hit(world, &curves, threshold).map(|index| connections[index].clone())
    }

    /// World-space anchors of a connection's output and input handles.
    pub fn connection_endpoints(&self, connection: &crate::graph::Connection) -> Option<(Pos2, Pos2)> {
        let from = self.graph.node(&connection.from_node)?;
        let to = self.graph.node(&connection.to_node)?;
        Some((
            layout::port_anchor(from, PortKind::Output, &connection.from_port)?,
            layout::port_anchor(to, PortKind::Input, &connection.to_port)?,
        ))
    }

    pub fn pointer_move(&mut self, pos: Pos2) {
        let world = self.viewport.screen_to_world(pos);
        match &mut self.interaction {
            InteractionState::Idle => {}
            InteractionState::Panning { last, moved, .. } => {
                let delta = pos - *last;
                if delta == Vec2::ZERO {
                    return;
                }
                *moved = true;
                *last = pos;
                self.viewport.pan(delta);
            }
            InteractionState::Selecting { start, current, .. } => {
                *current = pos;
                let world_rect = Rect::from_two_pos(self.viewport.screen_to_world(*start), world);
                let ids = layout::nodes_in_rect(&self.graph, world_rect);
                self.selection.set_preview(ids);
            }
            InteractionState::Dragging {
                start_world,
                origins,
                moved,
            } => {
                let delta = world - *start_world;
                if delta == Vec2::ZERO {
                    return;
                }
                *moved = true;
                for (id, origin) in origins.iter() {
                    self.graph.set_node_position(id, *origin + delta);
                }
            }
            InteractionState::Connecting { current, .. } => *current = pos,
        }
    }

    pub fn pointer_up(&mut self, pos: Pos2) {
        self.pointer_move(pos);
        match std::mem::take(&mut self.interaction) {
            InteractionState::Selecting { start, current, additive } => {
                let world_rect = Rect::from_two_pos(
                    self.viewport.screen_to_world(start),
                    self.viewport.screen_to_world(current),
                );
                let ids = layout::nodes_in_rect(&self.graph, world_rect);
                self.selection.clear_preview();
                self.selection.set_nodes(ids, additive);
            }
            InteractionState::Dragging { moved: true, .. } => self.graph.mark_dirty(),
            InteractionState::Panning {
                origin,
                context: true,
                moved: false,
                ..
            } => {
                let world = self.viewport.screen_to_world(origin);
                let radius = HANDLE_RADIUS + HANDLE_SLOP / self.viewport.scale();
                self.port_menu = layout::hit_port(&self.graph, world, radius).map(|port| (port, origin));
            }
            InteractionState::Connecting { anchor, .. } => self.finish_connection(anchor, pos),
            _ => {}
        }
    }

    fn finish_connection(&mut self, anchor: PortRef, pos: Pos2) {
        let world = self.viewport.screen_to_world(pos);
        let radius = HANDLE_RADIUS + HANDLE_SLOP / self.viewport.scale();
        let Some(target) = layout::hit_port(&self.graph, world, radius) else {
            return;
        };
        if target.kind != anchor.kind.opposite() {
            return;
        }
        let (from, to) = match anchor.kind {
            PortKind::Output => (anchor, target),
            PortKind::Input => (target, anchor),
        };
        if let Err(e) = self.add_connection(&from.node_id, &from.port, &to.node_id, &to.port) {
            log::warn!("Failed to connect: {e}");
        }
    }

    /// Wheel zoom around `pos`. Ctrl+wheel is left to the host (browser-style page zoom).
    pub fn wheel(&mut self, delta_y: f32, pos: Pos2, ctrl: bool) -> bool {
        if ctrl {
            return false;
        }
        self.viewport.zoom_wheel(delta_y, pos)
    }

    /// Returns whether the key was handled. `text_editing` is true while a text
    /// field has keyboard focus.
    pub fn key_pressed(&mut self, key: Key, text_editing: bool) -> bool {
        if text_editing {
            return false;
        }
        match key {
            Key::Delete => self.delete_selection(),
            Key::Escape => match self.interaction {
                InteractionState::Selecting { .. } => {
                    self.selection.clear_preview();
                    self.interaction = InteractionState::Idle;
                    true
                }
                InteractionState::Connecting { .. } => {
                    self.interaction = InteractionState::Idle;
                    true
                }
                _ => self.port_menu.take().is_some(),
            },
            Key::Space => {
                self.space_held = true;
                true
            }
        }
    }

    /// Port whose context menu is open, with the screen position it was opened at.
    pub fn port_menu(&self) -> Option<&(PortRef, Pos2)> {
        self.port_menu.as_ref()
    }

    pub fn close_port_menu(&mut self) {
        self.port_menu = None;
    }

    pub fn key_released(&mut self, key: Key) {
        if key == Key::Space {
            self.space_held = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Connection;
    use crate::node_types::{ControlSpec, Library, NodeDefinition};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn editor() -> NodeEditor {
        let library = Library::new([
            NodeDefinition::new("source", "Source").outputs(["Value"]),
            NodeDefinition::new("sink", "Sink")
                .inputs(["Value"])
                .control(ControlSpec::text("Value", "").binds_to("Value")),
        ]);
        NodeEditor::new(library, Arc::new(MemoryStore::new()))
    }

    fn anchor(editor: &NodeEditor, node: &str, kind: PortKind, port: &str) -> Pos2 {
        let world = layout::port_anchor(editor.graph().node(node).unwrap(), kind, port).unwrap();
        editor.viewport().world_to_screen(world)
    }

    #[test]
    fn test_box_selection_replaces_or_unions() {
        let mut editor = editor();
        let a = editor.create_node("source", Pos2::new(0.0, 0.0)).unwrap();
        let b = editor.create_node("source", Pos2::new(400.0, 0.0)).unwrap();
        editor.clear_selection();

        editor.pointer_down(Pos2::new(-10.0, 300.0), PointerButton::Primary, Modifiers::default());
        editor.pointer_move(Pos2::new(50.0, 10.0));
        assert!(editor.selection().is_previewed(&a));
        assert!(!editor.selection().is_previewed(&b));
        editor.pointer_up(Pos2::new(50.0, 10.0));
        assert_eq!(editor.selection().nodes().collect::<Vec<_>>(), vec![a.as_str()]);
        assert!(!editor.selection().is_previewed(&a));

        let shift = Modifiers { shift: true, ctrl: false };
        editor.pointer_down(Pos2::new(390.0, 300.0), PointerButton::Primary, shift);
        editor.pointer_up(Pos2::new(450.0, 10.0));
        assert_eq!(editor.selection().node_count(), 2);

        editor.pointer_down(Pos2::new(390.0, 300.0), PointerButton::Primary, Modifiers::default());
        editor.pointer_up(Pos2::new(450.0, 10.0));
        assert_eq!(editor.selection().nodes().collect::<Vec<_>>(), vec![b.as_str()]);
    }

    #[test]
    fn test_drag_moves_group_and_marks_dirty() {
        let mut editor = editor();
        let a = editor.create_node("source", Pos2::new(0.0, 0.0)).unwrap();
        let b = editor.create_node("source", Pos2::new(300.0, 0.0)).unwrap();
        editor.select_node(&a, false, false);
        editor.select_node(&b, true, false);
        editor.graph.clear_dirty();

        editor.pointer_down(Pos2::new(10.0, 10.0), PointerButton::Primary, Modifiers::default());
        assert_eq!(editor.selection().node_count(), 2);
        editor.pointer_up(Pos2::new(10.0, 10.0));
        assert!(!editor.is_dirty());

        editor.pointer_down(Pos2::new(10.0, 10.0), PointerButton::Primary, Modifiers::default());
        editor.pointer_move(Pos2::new(30.0, 40.0));
        editor.pointer_up(Pos2::new(30.0, 40.0));
        assert_eq!(editor.graph().node(&a).unwrap().position, Pos2::new(20.0, 30.0));
        assert_eq!(editor.graph().node(&b).unwrap().position, Pos2::new(320.0, 30.0));
        assert!(editor.is_dirty());
    }

    #[test]
    fn test_additive_click_toggles_without_drag() {
        let mut editor = editor();
        let a = editor.create_node("source", Pos2::new(0.0, 0.0)).unwrap();
        let ctrl = Modifiers { shift: false, ctrl: true };
        editor.pointer_down(Pos2::new(10.0, 10.0), PointerButton::Primary, ctrl);
        assert_eq!(editor.interaction_state(), &InteractionState::Idle);
        assert!(!editor.selection().contains_node(&a));
    }

    #[test]
    fn test_connection_commit_and_cancel() {
        let mut editor = editor();
        let a = editor.create_node("source", Pos2::new(0.0, 0.0)).unwrap();
        let b = editor.create_node("sink", Pos2::new(400.0, 0.0)).unwrap();

        let out = anchor(&editor, &a, PortKind::Output, "Value");
        editor.pointer_down(out, PointerButton::Primary, Modifiers::default());
        assert!(matches!(editor.interaction_state(), InteractionState::Connecting { .. }));
        editor.pointer_up(Pos2::new(300.0, 400.0));
        assert!(editor.graph().connections().is_empty());

        editor.pointer_down(out, PointerButton::Primary, Modifiers::default());
        editor.pointer_up(anchor(&editor, &a, PortKind::Output, "Value"));
        assert!(editor.graph().connections().is_empty());

        let input = anchor(&editor, &b, PortKind::Input, "Value");
        editor.pointer_down(input, PointerButton::Primary, Modifiers::default());
        editor.pointer_move(Pos2::new(100.0, 100.0));
        editor.pointer_up(out);
        assert_eq!(editor.graph().connections(), &[Connection::new(&a, "Value", &b, "Value")]);
    }

    #[test]
    fn test_click_on_curve_selects_connection() {
        let mut editor = editor();
        let a = editor.create_node("source", Pos2::new(0.0, 0.0)).unwrap();
        let b = editor.create_node("sink", Pos2::new(400.0, 0.0)).unwrap();
        editor.add_connection(&a, "Value", &b, "Value").unwrap();
        let (start, end) = editor.connection_endpoints(&editor.graph().connections()[0]).unwrap();
        let mid = editor.viewport().world_to_screen(Pos2::new((start.x + end.x) / 2.0, start.y));

        editor.pointer_down(mid, PointerButton::Primary, Modifiers::default());
        assert!(editor.selection().connection().is_some());
        assert!(editor.key_pressed(Key::Delete, false));
        assert!(editor.graph().connections().is_empty());
        assert_eq!(editor.graph().len(), 2);
    }

    #[test]
    fn test_pan_and_wheel() {
        let mut editor = editor();
        editor.pointer_down(Pos2::new(10.0, 10.0), PointerButton::Middle, Modifiers::default());
        editor.pointer_move(Pos2::new(40.0, 30.0));
        editor.pointer_up(Pos2::new(40.0, 30.0));
        assert_eq!(editor.viewport().offset(), Vec2::new(30.0, 20.0));

        editor.key_pressed(Key::Space, false);
        editor.pointer_down(Pos2::new(0.0, 0.0), PointerButton::Primary, Modifiers::default());
        assert!(matches!(editor.interaction_state(), InteractionState::Panning { .. }));
        editor.pointer_up(Pos2::new(0.0, 0.0));
        editor.key_released(Key::Space);

        assert!(!editor.wheel(-1.0, Pos2::ZERO, true));
        assert!(editor.wheel(-1.0, Pos2::ZERO, false));
        assert!((editor.viewport().scale() - 1.1).abs() < 1e-5);
    }

    #[test]
    fn test_right_click_on_port_opens_menu() {
        let mut editor = editor();
        let a = editor.create_node("source", Pos2::new(0.0, 0.0)).unwrap();
        let out = anchor(&editor, &a, PortKind::Output, "Value");

        editor.pointer_down(out, PointerButton::Secondary, Modifiers::default());
        editor.pointer_move(out + Vec2::new(15.0, 0.0));
        editor.pointer_up(out + Vec2::new(15.0, 0.0));
        assert!(editor.port_menu().is_none());
        assert_eq!(editor.viewport().offset(), Vec2::new(15.0, 0.0));

        let out = anchor(&editor, &a, PortKind::Output, "Value");
        editor.pointer_down(out, PointerButton::Secondary, Modifiers::default());
        editor.pointer_up(out);
        let (port, _) = editor.port_menu().unwrap();
        assert_eq!(port, &PortRef::new(a.clone(), "Value", PortKind::Output));
        assert!(editor.key_pressed(Key::Escape, false));
        assert!(editor.port_menu().is_none());
    }

    #[test]
    fn test_keys_ignored_while_typing_and_escape_cancels() {
        let mut editor = editor();
        let a = editor.create_node("source", Pos2::new(0.0, 0.0)).unwrap();
        assert!(!editor.key_pressed(Key::Delete, true));
        assert!(editor.graph().contains_node(&a));

        editor.pointer_down(Pos2::new(500.0, 500.0), PointerButton::Primary, Modifiers::default());
        editor.pointer_move(Pos2::new(-10.0, -10.0));
        assert!(editor.key_pressed(Key::Escape, false));
        assert_eq!(editor.interaction_state(), &InteractionState::Idle);
        assert!(!editor.selection().is_previewed(&a));
    }
}
