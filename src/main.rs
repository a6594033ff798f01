use chrono::Local;
use eframe::egui;
use nodeflow::editor::canvas::DefinitionDrag;
use nodeflow::editor::{NodeEditor, Viewport};
use nodeflow::executor::events::ExecutionEvent;
use nodeflow::executor::{self, ExportMode};
use nodeflow::library::{self, ConstantSpec, CustomNodeStore, NodeSpec};
use nodeflow::palette::{PaletteItem, PaletteRow};
use nodeflow::settings::AppSettings;
use nodeflow::storage::PersistenceStore;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(2);
const PALETTE_INDENT: f32 = 12.0;

fn main() -> eframe::Result<()> {
    env_logger::init();
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1280.0, 800.0]),
        ..Default::default()
    };

    eframe::run_native(
        "NodeFlow",
        native_options,
        Box::new(|_cc| Ok(Box::new(NodeFlowApp::new()))),
    )
}

/// Palette directories being dragged to a new place.
#[derive(Debug, Clone)]
struct DirectoryDrag {
    item_id: String,
}

/// A removal waiting for the user's confirmation.
struct PendingRemoval {
    item_id: String,
    label: String,
    definitions: usize,
}

/// Form state of the custom node designer.
#[derive(Default)]
struct Designer {
    open: bool,
    spec: NodeSpec,
    inputs: String,
    outputs: String,
    /// Id of the stored spec being edited, if any.
    editing: Option<String>,
}

impl Designer {
    fn load(&mut self, spec: NodeSpec) {
        self.inputs = spec.inputs.join("\n");
        self.outputs = spec.outputs.join("\n");
        self.editing = (!spec.id.is_empty()).then(|| spec.id.clone());
        self.spec = spec;
    }

    fn draft(&self) -> NodeSpec {
        NodeSpec {
            inputs: self.inputs.lines().map(str::to_string).collect(),
            outputs: self.outputs.lines().map(str::to_string).collect(),
            ..self.spec.clone()
        }
    }
}

struct NodeFlowApp {
    editor: NodeEditor,
    custom: CustomNodeStore,
    settings: AppSettings,
    logs: Vec<String>,
    log_receiver: Option<Receiver<ExecutionEvent>>,
    last_script: Option<String>,
    show_script_window: bool,
    show_settings: bool,
    designer: Designer,
    pending_removal: Option<PendingRemoval>,
    /// Export/run failure shown until dismissed.
    error_notice: Option<String>,
    last_autosave: Instant,
}

impl NodeFlowApp {
    fn new() -> Self {
        let settings = AppSettings::load();
        let store: Arc<dyn PersistenceStore> = Arc::new(settings.file_store());
        let custom = CustomNodeStore::new(store.clone());
        let (min_zoom, max_zoom) = settings.zoom_bounds();

        let mut editor = NodeEditor::new(library::load_library(&custom), store)
            .with_palette_host(Arc::new(custom.clone()))
            .with_script_host(settings.script_host())
            .with_viewport(Viewport::new().with_bounds(min_zoom, max_zoom));
        editor.style = settings.style.clone();

        let mut app = Self {
            editor,
            custom,
            settings,
            logs: Vec::new(),
            log_receiver: None,
            last_script: None,
            show_script_window: false,
            show_settings: false,
            designer: Designer::default(),
            pending_removal: None,
            error_notice: None,
            last_autosave: Instant::now(),
        };
        if app.editor.restore() {
            app.log(format!("[System] Restored {} node(s).", app.editor.graph().len()));
        }
        app
    }

    fn log(&mut self, message: impl Into<String>) {
        let time_str = Local::now().format("%H:%M:%S").to_string();
        self.logs.push(format!("[{}] {}", time_str, message.into()));
    }

    fn reload_library(&mut self) {
        let report = self.editor.set_library(library::load_library(&self.custom));
        if report.changed() {
            self.log(format!(
                "[System] Library reloaded: {} node(s) removed, {} connection(s) pruned.",
                report.removed_nodes.len(),
                report.pruned_connections.len()
            ));
        }
    }

    fn start(&mut self, mode: ExportMode) {
        if self.log_receiver.is_some() {
            return;
        }
        let host = self.editor.script_host();
        self.log_receiver = Some(executor::run_async(self.editor.graph().clone(), host, mode));
    }

    fn drain_events(&mut self, ctx: &egui::Context) {
        let Some(rx) = self.log_receiver.take() else {
            return;
        };
        let mut channel_closed = false;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if let Some(message) = event.blocking_message() {
                        self.error_notice = Some(message.to_string());
                    }
                    match event {
                        ExecutionEvent::Log(msg) => self.log(msg),
                        ExecutionEvent::NodeActive(node_id) => self.editor.set_node_active(&node_id, true),
                        ExecutionEvent::NodeInactive(node_id) => self.editor.set_node_active(&node_id, false),
                        ExecutionEvent::ConfigPatched { node_id, patch } => {
                            self.editor.apply_patch(&node_id, patch);
                        }
                        ExecutionEvent::ScriptReady(script) => {
                            self.log(format!("[System] Script ready ({} lines).", script.lines().count()));
                            self.last_script = Some(script);
                            self.show_script_window = true;
                        }
                        ExecutionEvent::RunCompleted(response) => {
                            let status = if response.ok { "succeeded" } else { "failed" };
                            self.log(format!("[Run] Script {status}."));
                            for line in response.output.lines() {
                                self.log(format!("[Output] {line}"));
                            }
                            for line in response.errors.lines() {
                                self.log(format!("[Error] {line}"));
                            }
                            if let Some(error) = response.error {
                                self.log(format!("[Error] {error}"));
                            }
                        }
                        ExecutionEvent::Failed(message) => self.log(format!("[Error] {message}")),
                        ExecutionEvent::Finished => channel_closed = true,
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    channel_closed = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        if channel_closed {
            self.editor.clear_active_nodes();
            self.log("[System] Execution Completed");
        } else {
            self.log_receiver = Some(rx);
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let idle = self.log_receiver.is_none();
            if ui.add_enabled(idle, egui::Button::new("Export")).clicked() {
                self.start(ExportMode::Export);
            }
            if ui.add_enabled(idle, egui::Button::new("Run")).clicked() {
                self.start(ExportMode::Run);
            }
            ui.separator();
            if ui.button("Clear").clicked() {
                self.editor.clear(true);
                self.log("[System] Workspace cleared.");
            }
            if ui.button("Reset view").clicked() {
                self.editor.viewport_mut().reset();
            }
            ui.separator();
            if ui.button("Node Designer").clicked() {
                self.designer.open = true;
            }
            if ui.button("Settings").clicked() {
                self.show_settings = true;
            }
            if self.last_script.is_some() && ui.button("Last script").clicked() {
                self.show_script_window = true;
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let graph = self.editor.graph();
                ui.label(format!(
                    "{} nodes, {} connections, {:.0}%",
                    graph.len(),
                    graph.connections().len(),
                    self.editor.viewport().scale() * 100.0
                ));
                if !idle {
                    ui.spinner();
                }
            });
        });
    }

    fn palette_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("Nodes");
            if ui.small_button("+ Folder").clicked() {
                let root = self.editor.palette().root_id().to_string();
                self.editor.create_palette_directory(&root, "");
            }
        });
        ui.separator();
        egui::ScrollArea::vertical().show(ui, |ui| {
            for row in self.editor.palette_rows() {
                self.palette_row(ui, &row);
            }
        });
    }

    fn palette_row(&mut self, ui: &mut egui::Ui, row: &PaletteRow) {
        let response = ui
            .horizontal(|ui| {
                ui.add_space(row.depth as f32 * PALETTE_INDENT);
                match &row.item {
                    PaletteItem::Directory { name, collapsed, .. } => {
                        let arrow = if *collapsed { "▶" } else { "▼" };
                        ui.add(egui::Label::new(format!("{arrow} {name}")).sense(egui::Sense::click_and_drag()))
                    }
                    PaletteItem::Node { definition_id } => {
                        let label = self
                            .editor
                            .library()
                            .get(definition_id)
                            .map(|definition| definition.label.clone())
                            .unwrap_or_else(|| definition_id.clone());
                        ui.add(egui::Label::new(label).sense(egui::Sense::click_and_drag()))
                            .on_hover_text(definition_id)
                    }
                }
            })
            .inner;

        match &row.item {
            PaletteItem::Directory { name, .. } => {
                response.dnd_set_drag_payload(DirectoryDrag { item_id: row.id.clone() });
                if response.clicked() {
                    self.editor.toggle_palette_directory(&row.id);
                }
                response.context_menu(|ui| {
                    if ui.button("New folder").clicked() {
                        self.editor.create_palette_directory(&row.id, "");
                        ui.close();
                    }
                    if ui.button("Remove folder").clicked() {
                        self.pending_removal = Some(PendingRemoval {
                            item_id: row.id.clone(),
                            label: name.clone(),
                            definitions: self.editor.palette().collect_definition_ids(&row.id).len(),
                        });
                        ui.close();
                    }
                });
            }
            PaletteItem::Node { definition_id } => {
                response.dnd_set_drag_payload(DefinitionDrag {
                    definition_id: definition_id.clone(),
                });
                if response.clicked() {
                    if let Err(e) = self.editor.activate_palette_item(&row.id) {
                        self.log(format!("[Error] {e}"));
                    }
                }
                response.context_menu(|ui| {
                    if ui.button("Duplicate").clicked() {
                        match futures::executor::block_on(self.editor.duplicate_palette_item(&row.id)) {
                            Some(new_id) => self.log(format!("[System] Duplicated as {new_id}.")),
                            None => self.log("[System] Only custom nodes can be duplicated."),
                        }
                        ui.close();
                    }
                    if ui.button("Edit").clicked() {
                        match self.custom.list().into_iter().find(|spec| &spec.id == definition_id) {
                            Some(spec) => {
                                self.designer.load(spec);
                                self.designer.open = true;
                            }
                            None => self.log("[System] Built-in nodes cannot be edited."),
                        }
                        ui.close();
                    }
                    if ui.button("Remove").clicked() {
                        self.pending_removal = Some(PendingRemoval {
                            item_id: row.id.clone(),
                            label: definition_id.clone(),
                            definitions: 1,
                        });
                        ui.close();
                    }
                });
            }
        }

        self.palette_drop(ui, row, &response);
    }

    /// Reorder the palette when an item is dropped on `row`.
    fn palette_drop(&mut self, ui: &egui::Ui, row: &PaletteRow, response: &egui::Response) {
        let dragged = if let Some(payload) = response.dnd_release_payload::<DirectoryDrag>() {
            Some(payload.item_id.clone())
        } else if let Some(payload) = response.dnd_release_payload::<DefinitionDrag>() {
            self.editor.palette().leaf_for(&payload.definition_id).map(str::to_string)
        } else {
            None
        };
        let Some(item_id) = dragged else {
            return;
        };
        if item_id == row.id {
            return;
        }
        let pointer_y = ui.ctx().pointer_latest_pos().map_or(response.rect.center().y, |p| p.y);
        let placement = if self.editor.palette().is_directory(&row.id) {
            self.editor.palette().placement_at_header(&row.id)
        } else {
            self.editor
                .palette()
                .placement_at_item(&row.id, pointer_y, response.rect.top(), response.rect.height())
        };
        if let Some(placement) = placement {
            self.editor
                .move_palette_item(&item_id, &placement.parent_id, placement.index);
        }
    }

    fn removal_dialog(&mut self, ctx: &egui::Context) {
        let Some(pending) = &self.pending_removal else {
            return;
        };
        let mut confirmed = None;
        egui::Window::new("Confirm removal")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(format!(
                    "Remove '{}' and {} node definition(s)? Placed nodes of these types are deleted too.",
                    pending.label, pending.definitions
                ));
                ui.horizontal(|ui| {
                    if ui.button("Remove").clicked() {
                        confirmed = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        confirmed = Some(false);
                    }
                });
            });
        match confirmed {
            Some(true) => {
                if let Some(pending) = self.pending_removal.take() {
                    if futures::executor::block_on(self.editor.remove_palette_item(&pending.item_id)) {
                        self.log(format!("[System] Removed {}.", pending.label));
                    } else {
                        self.log(format!("[System] {} was not removed.", pending.label));
                    }
                }
            }
            Some(false) => self.pending_removal = None,
            None => {}
        }
    }

    fn error_dialog(&mut self, ctx: &egui::Context) {
        let Some(message) = &self.error_notice else {
            return;
        };
        let mut dismissed = false;
        egui::Modal::new(egui::Id::new("error_notice")).show(ctx, |ui| {
            ui.heading("Export failed");
            ui.label(message);
            ui.separator();
            if ui.button("OK").clicked() {
                dismissed = true;
            }
        });
        if dismissed {
            self.error_notice = None;
        }
    }

    fn designer_window(&mut self, ctx: &egui::Context) {
        if !self.designer.open {
            return;
        }
        let mut open = self.designer.open;
        let mut save = false;
        let mut delete = false;
        let mut load = None;
        egui::Window::new("Node Designer")
            .open(&mut open)
            .default_width(520.0)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    if ui.button("New").clicked() {
                        load = Some(library::empty_spec());
                    }
                    egui::ComboBox::from_id_salt("designer_sample")
                        .selected_text("Import sample")
                        .show_ui(ui, |ui| {
                            for sample in library::sample_specs() {
                                if ui.selectable_label(false, &sample.label).clicked() {
                                    load = Some(sample);
                                }
                            }
                        });
                    egui::ComboBox::from_id_salt("designer_stored")
                        .selected_text("Open")
                        .show_ui(ui, |ui| {
                            for spec in self.custom.list() {
                                if ui.selectable_label(false, &spec.label).clicked() {
                                    load = Some(spec);
                                }
                            }
                        });
                });
                ui.separator();

                let designer = &mut self.designer;
                egui::Grid::new("designer_fields").num_columns(2).show(ui, |ui| {
                    ui.label("Id");
                    ui.text_edit_singleline(&mut designer.spec.id);
                    ui.end_row();
                    ui.label("Label");
                    ui.text_edit_singleline(&mut designer.spec.label);
                    ui.end_row();
                    ui.label("Category");
                    ui.text_edit_singleline(&mut designer.spec.category);
                    ui.end_row();
                    ui.label("Description");
                    ui.text_edit_singleline(&mut designer.spec.description);
                    ui.end_row();
                    ui.label("Inputs");
                    ui.add(egui::TextEdit::multiline(&mut designer.inputs).desired_rows(2).hint_text("one per line"));
                    ui.end_row();
                    ui.label("Outputs");
                    ui.add(egui::TextEdit::multiline(&mut designer.outputs).desired_rows(2).hint_text("one per line"));
                    ui.end_row();
                });

                ui.label("Constants");
                let mut remove_constant = None;
                for (index, constant) in designer.spec.constants.iter_mut().enumerate() {
                    ui.horizontal(|ui| {
                        ui.add(egui::TextEdit::singleline(&mut constant.key).desired_width(120.0).hint_text("key"));
                        ui.add(egui::TextEdit::singleline(&mut constant.default).desired_width(220.0).hint_text("default"));
                        if ui.small_button("✖").clicked() {
                            remove_constant = Some(index);
                        }
                    });
                }
                if let Some(index) = remove_constant {
                    designer.spec.constants.remove(index);
                }
                if ui.small_button("+ Constant").clicked() {
                    designer.spec.constants.push(ConstantSpec {
                        key: String::new(),
                        default: String::new(),
                    });
                }

                ui.label("Script template");
                ui.add(
                    egui::TextEdit::multiline(&mut designer.spec.script)
                        .code_editor()
                        .desired_rows(8)
                        .desired_width(f32::INFINITY),
                );
                ui.weak("Placeholders: {{input.Name}}, {{output.Name}}, {{config.key}}");

                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("Save").clicked() {
                        save = true;
                    }
                    if designer.editing.is_some() && ui.button("Delete").clicked() {
                        delete = true;
                    }
                });
            });
        self.designer.open = open;

        if let Some(spec) = load {
            self.designer.load(spec);
        }
        if save {
            match self.custom.save(&self.designer.draft()) {
                Ok(saved) => {
                    self.log(format!("[System] Saved node '{}'.", saved.label));
                    self.designer.load(saved);
                    self.reload_library();
                }
                Err(e) => self.log(format!("[Error] Failed to save node: {e}")),
            }
        }
        if delete {
            if let Some(id) = self.designer.editing.take() {
                match self.custom.delete(&id) {
                    Ok(_) => {
                        self.log(format!("[System] Deleted node '{id}'."));
                        self.designer.load(library::empty_spec());
                        self.reload_library();
                    }
                    Err(e) => self.log(format!("[Error] Failed to delete node: {e}")),
                }
            }
        }
    }

    fn script_window(&mut self, ctx: &egui::Context) {
        let Some(script) = &self.last_script else {
            return;
        };
        let mut open = self.show_script_window;
        egui::Window::new("Generated script")
            .open(&mut open)
            .default_size([640.0, 480.0])
            .show(ctx, |ui| {
                if ui.button("Copy").clicked() {
                    ctx.copy_text(script.clone());
                }
                egui::ScrollArea::both().show(ui, |ui| {
                    ui.add(
                        egui::TextEdit::multiline(&mut script.as_str())
                            .code_editor()
                            .desired_width(f32::INFINITY),
                    );
                });
            });
        self.show_script_window = open;
    }

    fn settings_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_settings;
        let mut should_save = false;
        egui::Window::new("Settings")
            .open(&mut open)
            .resizable(false)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label("Script host:");
                    ui.text_edit_singleline(&mut self.settings.server_url);
                });
                ui.horizontal(|ui| {
                    ui.label("Request timeout:");
                    ui.add(egui::DragValue::new(&mut self.settings.request_timeout_secs).suffix(" s"));
                });
                ui.checkbox(&mut self.settings.autosave, "Autosave");
                ui.separator();
                ui.horizontal(|ui| {
                    ui.label("Font Size:");
                    ui.add(egui::Slider::new(&mut self.settings.style.font_size, 8.0..=24.0).suffix("px"));
                });
                ui.checkbox(&mut self.settings.style.use_gradient_connections, "Gradient Connections");
                ui.separator();
                if ui.button("💾 Save").clicked() {
                    should_save = true;
                }
            });
        self.show_settings = open;

        if should_save {
            self.editor.style = self.settings.style.clone();
            self.editor.set_script_host(Some(self.settings.script_host()));
            match self.settings.save() {
                Ok(()) => self.log("[System] Settings saved."),
                Err(e) => self.log(format!("[Error] Failed to save settings: {e}")),
            }
        }
    }
}

impl eframe::App for NodeFlowApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events(ctx);

        if self.settings.autosave && self.last_autosave.elapsed() >= AUTOSAVE_INTERVAL {
            self.editor.autosave();
            self.last_autosave = Instant::now();
        }

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.toolbar(ui));

        egui::TopBottomPanel::bottom("logs")
            .resizable(true)
            .default_height(140.0)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.strong("Log");
                    if ui.small_button("Clear").clicked() {
                        self.logs.clear();
                    }
                });
                egui::ScrollArea::vertical().stick_to_bottom(true).show(ui, |ui| {
                    for line in &self.logs {
                        ui.monospace(line);
                    }
                });
            });

        egui::SidePanel::left("palette")
            .resizable(true)
            .default_width(220.0)
            .show(ctx, |ui| self.palette_panel(ui));

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| self.editor.show(ui));

        self.removal_dialog(ctx);
        self.error_dialog(ctx);
        self.designer_window(ctx);
        self.script_window(ctx);
        self.settings_window(ctx);
    }
}

impl Drop for NodeFlowApp {
    fn drop(&mut self) {
        if self.settings.autosave {
            self.editor.autosave();
        }
    }
}
