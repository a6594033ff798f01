use async_trait::async_trait;
use egui::Pos2;
use std::sync::{Arc, Mutex};

use nodeflow::compiler::{compile_body, generate_script};
use nodeflow::editor::{NodeEditor, RunOutcome};
use nodeflow::executor::bridge::{RunResponse, ScriptHost};
use nodeflow::graph::Graph;
use nodeflow::library::{
    CustomNodeStore, SCRIPT_QUERY_ID, TEXT_VALUE_ID, builtin_definitions, import_sample, load_library,
};
use nodeflow::node_types::{ControlSpec, Library, NodeDefinition};
use nodeflow::palette::node_item_id;
use nodeflow::storage::{MemoryStore, PersistenceStore};
use nodeflow::NodeFlowError;

fn library() -> Library {
    Library::new(builtin_definitions().into_iter().chain([
        NodeDefinition::new("number", "Number")
            .outputs(["Value"])
            .control(ControlSpec::text("value", "5"))
            .template("{{output.Value}} = {{config.value}}"),
        NodeDefinition::new("increment", "Increment")
            .inputs(["Value"])
            .outputs(["Sum"])
            .template("{{output.Sum}} = {{input.Value}} + 1"),
        NodeDefinition::new("ping", "Ping")
            .inputs(["Target"])
            .control(ControlSpec::text("target", "").binds_to("Target"))
            .template("Test-Connection {{input.Target}}"),
    ]))
}

fn add(graph: &mut Graph, lib: &Library, def: &str) -> String {
    graph
        .create_node(lib.get(def).unwrap().clone(), Pos2::ZERO)
        .id
        .clone()
}

/// Records every script and answers with a fixed output.
struct RecordingHost {
    output: String,
    scripts: Mutex<Vec<String>>,
}

impl RecordingHost {
    fn new(output: &str) -> Arc<Self> {
        Arc::new(Self {
            output: output.to_string(),
            scripts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ScriptHost for RecordingHost {
    async fn run_script(&self, script: &str) -> nodeflow::Result<RunResponse> {
        self.scripts.lock().unwrap().push(script.to_string());
        Ok(RunResponse {
            ok: true,
            output: self.output.clone(),
            ..Default::default()
        })
    }
}

#[test]
fn test_linear_pipeline_compiles_in_dependency_order() {
    let lib = library();
    let mut graph = Graph::new();
    let inc = add(&mut graph, &lib, "increment");
    let num = add(&mut graph, &lib, "number");
    graph.add_connection(&num, "Value", &inc, "Value").unwrap();

    let body = compile_body(&graph).unwrap().unwrap();
    let first = body.find("$number_2_Value = 5").unwrap();
    let second = body.find("$increment_1_Sum = $number_2_Value + 1").unwrap();
    assert!(first < second);

    let script = generate_script(&graph).unwrap();
    assert!(script.contains("Set-StrictMode"));
    assert!(script.contains(&body));
}

#[test]
fn test_text_value_feeds_downstream_literal() {
    let lib = library();
    let mut graph = Graph::new();
    let text = add(&mut graph, &lib, TEXT_VALUE_ID);
    let ping = add(&mut graph, &lib, "ping");
    graph.add_connection(&text, "Value", &ping, "Target").unwrap();
    graph.update_config(&text, "text", "server01", false);

    let body = compile_body(&graph).unwrap().unwrap();
    assert_eq!(body, "Test-Connection 'server01'");
    assert_eq!(graph.node(&ping).unwrap().config_value("target"), "'server01'");
}

#[test]
fn test_rewiring_an_input_replaces_the_old_edge() {
    let lib = library();
    let mut graph = Graph::new();
    let a = add(&mut graph, &lib, "number");
    let b = add(&mut graph, &lib, "number");
    let inc = add(&mut graph, &lib, "increment");

    assert!(graph.add_connection(&a, "Value", &inc, "Value").unwrap());
    assert!(graph.add_connection(&b, "Value", &inc, "Value").unwrap());
    assert!(!graph.add_connection(&b, "Value", &inc, "Value").unwrap());

    assert_eq!(graph.connections().len(), 1);
    assert_eq!(graph.connections()[0].from_node, b);
    assert!(graph.add_connection(&a, "Missing", &inc, "Value").is_err());
}

#[test]
fn test_compile_errors_surface() {
    let lib = library();
    let mut graph = Graph::new();
    let lone = add(&mut graph, &lib, "increment");
    let err = compile_body(&graph).unwrap_err();
    assert_eq!(err.to_string(), "Increment is missing required input: Value");
    assert!(err.is_compile_error());

    let other = add(&mut graph, &lib, "increment");
    graph.add_connection(&lone, "Sum", &other, "Value").unwrap();
    graph.add_connection(&other, "Sum", &lone, "Value").unwrap();
    assert!(matches!(generate_script(&graph), Err(NodeFlowError::CycleDetected)));
}

#[test]
fn test_removing_a_definition_prunes_its_instances() {
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
    let mut editor = NodeEditor::new(library(), store);
    let num = editor.create_node("number", Pos2::new(0.0, 0.0)).unwrap();
    let inc = editor.create_node("increment", Pos2::new(300.0, 0.0)).unwrap();
    editor.add_connection(&num, "Value", &inc, "Value").unwrap();

    let trimmed = editor.library().without(["number"]);
    let report = editor.set_library(trimmed);
    assert_eq!(report.removed_nodes, vec![num.clone()]);
    assert_eq!(report.pruned_connections.len(), 1);
    assert!(editor.graph().contains_node(&inc));
    assert!(editor.graph().connections().is_empty());
    assert!(editor.palette().leaf_for("number").is_none());
}

#[test]
fn test_workspace_survives_restart() {
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
    let (text, ping) = {
        let mut editor = NodeEditor::new(library(), store.clone());
        let text = editor.create_node(TEXT_VALUE_ID, Pos2::new(10.0, 10.0)).unwrap();
        let ping = editor.create_node("ping", Pos2::new(260.0, 10.0)).unwrap();
        editor.add_connection(&text, "Value", &ping, "Target").unwrap();
        editor.update_config(&text, "text", "web 01");
        assert!(editor.autosave());
        assert!(!editor.autosave());
        (text, ping)
    };

    let mut editor = NodeEditor::new(library(), store);
    assert!(editor.restore());
    assert!(!editor.is_dirty());
    let graph = editor.graph();
    assert_eq!(graph.len(), 2);
    assert_eq!(graph.node(&ping).unwrap().position, Pos2::new(260.0, 10.0));
    assert_eq!(graph.node(&text).unwrap().config_value("Value__raw"), "web 01");
    assert_eq!(
        compile_body(graph).unwrap().as_deref(),
        Some("Test-Connection 'web 01'")
    );
}

#[tokio::test]
async fn test_run_refreshes_script_queries_before_compiling() {
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
    let host = RecordingHost::new("  web01\n");
    let mut editor = NodeEditor::new(library(), store).with_script_host(host.clone());
    let query = editor.create_node(SCRIPT_QUERY_ID, Pos2::ZERO).unwrap();
    let ping = editor.create_node("ping", Pos2::new(260.0, 0.0)).unwrap();
    editor.update_config(&query, "Command", "hostname");
    editor.add_connection(&query, "Output", &ping, "Target").unwrap();

    let outcome = editor.run_script().await.unwrap();
    let RunOutcome::Ran { script, response } = outcome else {
        panic!("expected the script to be sent to the host");
    };
    assert!(response.ok);
    assert!(script.contains("Test-Connection 'web01'"));

    let scripts = host.scripts.lock().unwrap();
    assert_eq!(scripts.len(), 2);
    assert_eq!(scripts[0], "hostname");
    assert_eq!(scripts[1], script);
    assert_eq!(editor.graph().node(&query).unwrap().config_value("Output__raw"), "web01");
}

#[tokio::test]
async fn test_custom_node_lifecycle_through_palette() {
    let store: Arc<dyn PersistenceStore> = Arc::new(MemoryStore::new());
    let custom = CustomNodeStore::new(store.clone());
    custom.save(&import_sample("sample_log_message").unwrap()).unwrap();

    let mut editor = NodeEditor::new(load_library(&custom), store.clone())
        .with_palette_host(Arc::new(custom.clone()));
    let leaf = node_item_id("sample_log_message");
    let node = editor.activate_palette_item(&leaf).unwrap().unwrap();

    let script = editor.export_script().await.unwrap();
    assert!(script.contains("Write-Host \"Hello from custom node\""));

    let copy = editor.duplicate_palette_item(&leaf).await.unwrap();
    assert!(editor.library().contains(&copy));
    assert_eq!(custom.list().len(), 2);

    assert!(editor.remove_palette_item(&leaf).await);
    assert!(!editor.graph().contains_node(&node));
    assert!(!editor.library().contains("sample_log_message"));
    assert!(editor.palette().item(&leaf).is_none());
    assert_eq!(custom.list().len(), 1);
}
