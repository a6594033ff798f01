//! egui rendering of the node canvas.
//!
//! Geometry comes from [`layout`](super::layout) in world space and is mapped
//! through the viewport; raw egui input is translated into the
//! [`interaction`](super::interaction) calls.

use egui::epaint::CubicBezierShape;
use egui::{Align2, Color32, FontId, Painter, Pos2, Rect, Sense, Stroke, StrokeKind, Vec2};

use super::NodeEditor;
use super::interaction::{InteractionState, Key, Modifiers, PointerButton};
use super::layout::{self, HANDLE_RADIUS, PortRef};
use super::style::{
    ACTIVE_COLOR, CONNECTION_COLOR, PENDING_CONNECTION_COLOR, PREVIEW_COLOR, SELECTED_CONNECTION_COLOR,
    SELECTION_COLOR,
};
use super::utils::{bezier_control_points, bezier_point, draw_dashed_rect, lerp_color};
use crate::graph::NodeInstance;
use crate::node_types::{ControlKind, ControlSpec, PortKind};

const BACKGROUND: Color32 = Color32::from_gray(28);
const GRID_COLOR: Color32 = Color32::from_gray(38);
const GRID_SPACING: f32 = 40.0;
const NODE_BODY: Color32 = Color32::from_gray(52);
const GRADIENT_STEPS: usize = 32;

pub const CHECKBOX_TRUE: &str = "$true";
pub const CHECKBOX_FALSE: &str = "$false";

/// Drag payload carried from the palette onto the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionDrag {
    pub definition_id: String,
}

/// Input sampled once per frame.
struct FrameInput {
    pointer: Option<Pos2>,
    pressed: Option<PointerButton>,
    released: bool,
    modifiers: Modifiers,
    ctrl_held: bool,
    scroll: f32,
    delete: bool,
    escape: bool,
    space_pressed: bool,
    space_released: bool,
}

fn egui_button(button: PointerButton) -> egui::PointerButton {
    match button {
        PointerButton::Primary => egui::PointerButton::Primary,
        PointerButton::Secondary => egui::PointerButton::Secondary,
        PointerButton::Middle => egui::PointerButton::Middle,
    }
}

impl NodeEditor {
    /// Draw the canvas into the remaining space of `ui` and process this frame's input.
    pub fn show(&mut self, ui: &mut egui::Ui) {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let rect = response.rect;
        let origin = rect.min.to_vec2();
        painter.rect_filled(rect, 0.0, BACKGROUND);
        self.draw_grid(&painter, rect);

        self.handle_input(ui, rect);

        self.draw_connections(&painter, origin);
        self.draw_pending_connection(&painter, origin);
        let edits = self.draw_nodes(ui, &painter, origin);
        for (node_id, key, value) in edits {
            self.update_config(&node_id, &key, &value);
        }

        if let Some(selection) = self.interaction.selection_rect() {
            let screen = selection.translate(origin);
            painter.rect_filled(screen, 0.0, SELECTION_COLOR.gamma_multiply(0.08));
            draw_dashed_rect(&painter, screen, Stroke::new(1.0, SELECTION_COLOR));
        }

        if let Some(payload) = response.dnd_release_payload::<DefinitionDrag>() {
            if let Some(pointer) = ui.ctx().pointer_latest_pos() {
                let world = self.viewport.screen_to_world(pointer - origin);
                if let Err(e) = self.create_node(&payload.definition_id, world) {
                    log::warn!("Failed to place {}: {e}", payload.definition_id);
                }
            }
        }

        self.show_port_menu(ui, origin);
    }

    fn handle_input(&mut self, ui: &egui::Ui, rect: Rect) {
        let text_editing = ui.ctx().wants_keyboard_input();
        let hovered = ui.rect_contains_pointer(rect);
        let frame = ui.input(|i| FrameInput {
            pointer: i.pointer.latest_pos(),
            pressed: [PointerButton::Primary, PointerButton::Secondary, PointerButton::Middle]
                .into_iter()
                .find(|button| i.pointer.button_pressed(egui_button(*button))),
            released: i.pointer.any_released(),
            modifiers: Modifiers {
                shift: i.modifiers.shift,
                ctrl: i.modifiers.command,
            },
            ctrl_held: i.modifiers.ctrl,
            scroll: i.raw_scroll_delta.y,
            delete: i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace),
            escape: i.key_pressed(egui::Key::Escape),
            space_pressed: i.key_pressed(egui::Key::Space),
            space_released: i.key_released(egui::Key::Space),
        });

        if frame.space_pressed {
            self.key_pressed(Key::Space, text_editing);
        }
        if frame.space_released {
            self.key_released(Key::Space);
        }
        if frame.delete {
            self.key_pressed(Key::Delete, text_editing);
        }
        if frame.escape {
            self.key_pressed(Key::Escape, text_editing);
        }

        let Some(pointer) = frame.pointer else {
            return;
        };
        let local = pointer - rect.min.to_vec2();
        if hovered && frame.scroll != 0.0 {
            // egui reports wheel-up as positive; the viewport zooms in on negative deltas.
            self.wheel(-frame.scroll, local, frame.ctrl_held);
        }
        match frame.pressed {
            Some(button) if hovered => self.pointer_down(local, button, frame.modifiers),
            _ if self.interaction != InteractionState::Idle => self.pointer_move(local),
            _ => {}
        }
        if frame.released && self.interaction != InteractionState::Idle {
            self.pointer_up(local);
        }
    }

    fn draw_grid(&self, painter: &Painter, rect: Rect) {
        let spacing = GRID_SPACING * self.viewport.scale();
        if spacing < 8.0 {
            return;
        }
        let stroke = Stroke::new(1.0, GRID_COLOR);
        let offset = self.viewport.offset();
        let mut x = rect.left() + offset.x.rem_euclid(spacing);
        while x < rect.right() {
            painter.line_segment([Pos2::new(x, rect.top()), Pos2::new(x, rect.bottom())], stroke);
            x += spacing;
        }
        let mut y = rect.top() + offset.y.rem_euclid(spacing);
        while y < rect.bottom() {
            painter.line_segment([Pos2::new(rect.left(), y), Pos2::new(rect.right(), y)], stroke);
            y += spacing;
        }
    }

    /// Bezier points in screen space for a world-space curve.
    fn screen_curve(&self, start: Pos2, end: Pos2, origin: Vec2) -> [Pos2; 4] {
        let (c1, c2) = bezier_control_points(start, end);
        [start, c1, c2, end].map(|p| self.viewport.world_to_screen(p) + origin)
    }

    fn draw_connections(&self, painter: &Painter, origin: Vec2) {
        let width = self.style.connection_width * self.viewport.scale().max(0.5);
        for connection in self.graph.connections() {
            let Some((start, end)) = self.connection_endpoints(connection) else {
                continue;
            };
            let points = self.screen_curve(start, end, origin);
            if self.selection.connection() == Some(connection) {
                let stroke = Stroke::new(width * 1.5, SELECTED_CONNECTION_COLOR);
                painter.add(CubicBezierShape::from_points_stroke(points, false, Color32::TRANSPARENT, stroke));
                continue;
            }
            let colors = self.style.use_gradient_connections.then(|| {
                let color_of = |id: &str| {
                    self.graph
                        .node(id)
                        .map(|node| self.style.header_color(&node.definition.category))
                        .unwrap_or(CONNECTION_COLOR)
                };
                (color_of(&connection.from_node), color_of(&connection.to_node))
            });
            match colors {
                Some((from, to)) if from != to => {
                    let [p1, c1, c2, p2] = points;
                    let mut prev = p1;
                    for step in 1..=GRADIENT_STEPS {
                        let t = step as f32 / GRADIENT_STEPS as f32;
                        let next = bezier_point(p1, c1, c2, p2, t);
                        painter.line_segment([prev, next], Stroke::new(width, lerp_color(from, to, t)));
                        prev = next;
                    }
                }
                Some((color, _)) => {
                    let stroke = Stroke::new(width, color);
                    painter.add(CubicBezierShape::from_points_stroke(points, false, Color32::TRANSPARENT, stroke));
                }
                None => {
                    let stroke = Stroke::new(width, CONNECTION_COLOR);
                    painter.add(CubicBezierShape::from_points_stroke(points, false, Color32::TRANSPARENT, stroke));
                }
            }
        }
    }

    fn draw_pending_connection(&self, painter: &Painter, origin: Vec2) {
        let InteractionState::Connecting { anchor, current } = &self.interaction else {
            return;
        };
        let Some(anchor_world) = self
            .graph
            .node(&anchor.node_id)
            .and_then(|node| layout::port_anchor(node, anchor.kind, &anchor.port))
        else {
            return;
        };
        let pointer_world = self.viewport.screen_to_world(*current);
        let (start, end) = match anchor.kind {
            PortKind::Output => (anchor_world, pointer_world),
            PortKind::Input => (pointer_world, anchor_world),
        };
        let points = self.screen_curve(start, end, origin);
        let stroke = Stroke::new(3.0 * self.viewport.scale().max(0.5), PENDING_CONNECTION_COLOR);
        painter.add(CubicBezierShape::from_points_stroke(points, false, Color32::TRANSPARENT, stroke));
    }

    /// Draw every node and its controls. Returns edited `(node, key, value)` triples.
    fn draw_nodes(&self, ui: &mut egui::Ui, painter: &Painter, origin: Vec2) -> Vec<(String, String, String)> {
        let scale = self.viewport.scale();
        let mut edits = Vec::new();
        for node in self.graph.nodes() {
            let rect = self.viewport.world_rect_to_screen(layout::node_rect(node)).translate(origin);
            if !painter.clip_rect().intersects(rect) {
                continue;
            }
            let header = self.viewport.world_rect_to_screen(layout::header_rect(node)).translate(origin);
            let rounding = 6.0 * scale;

            painter.rect_filled(rect, rounding, NODE_BODY);
            painter.rect_filled(header, rounding, self.style.header_color(&node.definition.category));
            painter.text(
                header.left_center() + Vec2::new(layout::PADDING * scale, 0.0),
                Align2::LEFT_CENTER,
                &node.definition.label,
                FontId::proportional(self.style.font_size * scale),
                Color32::WHITE,
            );

            let outline = if self.selection.contains_node(&node.id) {
                Some(Stroke::new(2.0, SELECTION_COLOR))
            } else if self.selection.is_previewed(&node.id) {
                Some(Stroke::new(2.0, PREVIEW_COLOR))
            } else if self.is_node_active(&node.id) {
                Some(Stroke::new(2.0, ACTIVE_COLOR))
            } else {
                None
            };
            painter.rect_stroke(
                rect,
                rounding,
                outline.unwrap_or(Stroke::new(1.0, Color32::BLACK)),
                StrokeKind::Outside,
            );

            self.draw_ports(painter, node, origin);
            self.draw_controls(ui, node, origin, &mut edits);
        }
        edits
    }

    fn draw_ports(&self, painter: &Painter, node: &NodeInstance, origin: Vec2) {
        let scale = self.viewport.scale();
        let font = FontId::proportional((self.style.font_size - 2.0) * scale);
        for kind in [PortKind::Input, PortKind::Output] {
            for port in node.definition.ports(kind) {
                let Some(anchor) = layout::port_anchor(node, kind, port) else {
                    continue;
                };
                let center = self.viewport.world_to_screen(anchor) + origin;
                let connected = self.graph.connections().iter().any(|c| match kind {
                    PortKind::Input => c.to_node == node.id && &c.to_port == port,
                    PortKind::Output => c.from_node == node.id && &c.from_port == port,
                });
                let fill = if connected { CONNECTION_COLOR } else { Color32::from_gray(90) };
                painter.circle(center, HANDLE_RADIUS * scale, fill, Stroke::new(1.0, Color32::WHITE));

                let (offset, align) = match kind {
                    PortKind::Input => (Vec2::new((HANDLE_RADIUS + 4.0) * scale, 0.0), Align2::LEFT_CENTER),
                    PortKind::Output => (Vec2::new(-(HANDLE_RADIUS + 4.0) * scale, 0.0), Align2::RIGHT_CENTER),
                };
                painter.text(center + offset, align, port, font.clone(), Color32::LIGHT_GRAY);
            }
        }
    }

    fn draw_controls(
        &self,
        ui: &mut egui::Ui,
        node: &NodeInstance,
        origin: Vec2,
        edits: &mut Vec<(String, String, String)>,
    ) {
        let scale = self.viewport.scale();
        let font = FontId::proportional(12.0 * scale);
        for (index, control) in node.definition.controls.iter().enumerate() {
            let rect = self
                .viewport
                .world_rect_to_screen(layout::control_rect(node, index))
                .translate(origin);
            let current = node.config_value(&control.key).to_string();
            if let Some(value) = control_widget(ui, rect, node, control, current, font.clone()) {
                edits.push((node.id.clone(), control.key.clone(), value));
            }
        }
    }

    fn show_port_menu(&mut self, ui: &egui::Ui, origin: Vec2) {
        let Some((port, at)) = self.port_menu.clone() else {
            return;
        };
        let options = self.compatible_definitions(&port);
        let mut chosen = None;
        egui::Area::new(ui.id().with("port_menu"))
            .order(egui::Order::Foreground)
            .fixed_pos(at + origin)
            .show(ui.ctx(), |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.label(format!("{} {}", port.kind.as_str(), port.port));
                    ui.separator();
                    if options.is_empty() {
                        ui.weak("No compatible nodes");
                    }
                    for definition in &options {
                        if ui.button(&definition.label).clicked() {
                            chosen = Some(definition.id.clone());
                        }
                    }
                });
            });
        if let Some(definition_id) = chosen {
            self.port_menu = None;
            self.create_from_port_menu(&port, &definition_id);
        }
    }

    fn create_from_port_menu(&mut self, port: &PortRef, definition_id: &str) {
        if let Err(e) = self.create_connected_node(port, definition_id) {
            log::warn!("Failed to create {definition_id} from port {}: {e}", port.port);
        }
    }
}

/// Render one control; returns the new value when the user changed it.
fn control_widget(
    ui: &mut egui::Ui,
    rect: Rect,
    node: &NodeInstance,
    control: &ControlSpec,
    mut value: String,
    font: FontId,
) -> Option<String> {
    let salt = (node.id.as_str(), control.key.as_str());
    match control.kind {
        ControlKind::TextBox | ControlKind::Reference => {
            let hint = control.placeholder.as_deref().unwrap_or(control.display_label());
            let response = ui.put(
                rect,
                egui::TextEdit::singleline(&mut value)
                    .id_salt(salt)
                    .hint_text(hint)
                    .font(font),
            );
            response.changed().then_some(value)
        }
        ControlKind::CheckBox => {
            let mut checked = value == CHECKBOX_TRUE;
            let response = ui.put(rect, egui::Checkbox::new(&mut checked, control.display_label()));
            response
                .changed()
                .then(|| (if checked { CHECKBOX_TRUE } else { CHECKBOX_FALSE }).to_string())
        }
        ControlKind::SelectBox | ControlKind::RadioButton => {
            let mut selected = None;
            ui.scope_builder(egui::UiBuilder::new().max_rect(rect), |ui| {
                egui::ComboBox::from_id_salt(salt)
                    .selected_text(if value.is_empty() { control.display_label() } else { value.as_str() })
                    .width(rect.width())
                    .show_ui(ui, |ui| {
                        for option in &control.options {
                            if ui.selectable_label(&value == option, option).clicked() {
                                selected = Some(option.clone());
                            }
                        }
                    });
            });
            selected.filter(|option| *option != value)
        }
    }
}
