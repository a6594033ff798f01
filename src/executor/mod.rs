//! Auto-execution chain.
//!
//! Before an export or run, every chain-execution node pulls its upstream
//! auto-execute nodes through their hooks in topological order. Hooks return a
//! [`ConfigPatch`] which is applied to the graph once the hook resolves; a patch
//! for a node that disappeared in the meantime is discarded.

pub mod bridge;
pub mod events;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use indexmap::IndexSet;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::compiler::{generate_script, topological_sort};
use crate::error::{NodeFlowError, Result};
use crate::graph::Graph;
use crate::node_types::{AutoExecute, ConfigPatch, raw_key};
use bridge::ScriptHost;
use events::ExecutionEvent;

/// An input as an auto-execute hook sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedInput {
    pub value: String,
    pub raw: String,
}

/// Snapshot handed to an auto-execute hook.
#[derive(Clone)]
pub struct AutoExecContext {
    pub node_id: String,
    pub config: BTreeMap<String, String>,
    pub inputs: BTreeMap<String, ResolvedInput>,
    pub host: Option<Arc<dyn ScriptHost>>,
}

impl AutoExecContext {
    pub fn config_value(&self, key: &str) -> &str {
        self.config.get(key).map(String::as_str).unwrap_or("")
    }

    /// Unescaped form of a config value: `key__raw` when present, else `key`.
    pub fn config_raw(&self, key: &str) -> &str {
        self.config
            .get(&raw_key(key))
            .or_else(|| self.config.get(key))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn input(&self, name: &str) -> Option<&ResolvedInput> {
        self.inputs.get(name)
    }

    pub fn host(&self) -> anyhow::Result<&Arc<dyn ScriptHost>> {
        self.host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no script host configured"))
    }

    fn capture(graph: &Graph, node_id: &str, host: Option<Arc<dyn ScriptHost>>) -> Option<Self> {
        let node = graph.node(node_id)?;
        let inputs = node
            .definition
            .inputs
            .iter()
            .map(|input| {
                let resolved = ResolvedInput {
                    value: graph.resolve_input_value(node_id, input, false),
                    raw: graph.resolve_input_value(node_id, input, true),
                };
                (input.clone(), resolved)
            })
            .collect();
        Some(Self {
            node_id: node_id.to_string(),
            config: node.config.clone(),
            inputs,
            host,
        })
    }
}

type SharedRun = Shared<BoxFuture<'static, std::result::Result<ConfigPatch, Arc<anyhow::Error>>>>;

#[derive(Default)]
struct PassState {
    in_flight: HashMap<String, SharedRun>,
    completed: HashSet<String>,
}

/// Memo table for one export/run.
///
/// Triggers for a node whose hook is still running await the same future; a
/// node that already completed in this pass is not run again.
#[derive(Clone, Default)]
pub struct AutoExecutionPass {
    state: Arc<Mutex<PassState>>,
}

impl AutoExecutionPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_completed(&self, node_id: &str) -> bool {
        self.lock().completed.contains(node_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PassState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `hook` for `ctx.node_id` unless it already ran or is running.
    ///
    /// Returns `None` when the node already completed.
    pub async fn run(
        &self,
        hook: Arc<dyn AutoExecute>,
        ctx: AutoExecContext,
    ) -> Option<std::result::Result<ConfigPatch, Arc<anyhow::Error>>> {
        let node_id = ctx.node_id.clone();
        let future = {
            let mut state = self.lock();
            if state.completed.contains(&node_id) {
                return None;
            }
            state
                .in_flight
                .entry(node_id.clone())
                .or_insert_with(|| {
                    async move { hook.execute(ctx).await.map_err(Arc::new) }
                        .boxed()
                        .shared()
                })
                .clone()
        };

        let outcome = future.await;
        let mut state = self.lock();
        state.in_flight.remove(&node_id);
        if outcome.is_ok() {
            state.completed.insert(node_id);
        }
        Some(outcome)
    }
}

/// Drives auto-execute hooks against a graph.
pub struct ChainExecutor {
    pass: AutoExecutionPass,
    host: Option<Arc<dyn ScriptHost>>,
    events: Option<Sender<ExecutionEvent>>,
}

impl ChainExecutor {
    pub fn new(host: Option<Arc<dyn ScriptHost>>) -> Self {
        Self {
            pass: AutoExecutionPass::new(),
            host,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Sender<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn pass(&self) -> &AutoExecutionPass {
        &self.pass
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.events {
            tx.send(event).unwrap_or_default();
        }
    }

    /// Run the hook of one node and apply its patch.
    async fn execute_auto_node(&self, graph: &mut Graph, node_id: &str) -> Result<()> {
        let Some(hook) = graph
            .node(node_id)
            .and_then(|node| node.definition.auto_execute.clone())
        else {
            return Ok(());
        };
        let Some(ctx) = AutoExecContext::capture(graph, node_id, self.host.clone()) else {
            return Ok(());
        };

        self.emit(ExecutionEvent::NodeActive(node_id.to_string()));
        log::debug!("Auto-executing {node_id}");
        let outcome = self.pass.run(hook, ctx).await;
        self.emit(ExecutionEvent::NodeInactive(node_id.to_string()));

        match outcome {
            None => Ok(()),
            Some(Ok(patch)) => {
                if !patch.is_empty() {
                    self.emit(ExecutionEvent::ConfigPatched {
                        node_id: node_id.to_string(),
                        patch: patch.clone(),
                    });
                }
                graph.apply_patch(node_id, patch);
                Ok(())
            }
            Some(Err(err)) => {
                log::error!("Auto-execution of {node_id} failed: {err:#}");
                Err(NodeFlowError::auto_execution(node_id, &err))
            }
        }
    }

    /// Run every auto-execute node upstream of `node_id`, upstream first.
    ///
    /// `ports` restricts the walk's seeds to connections into those inputs.
    pub async fn ensure_auto_nodes_for_node(
        &self,
        graph: &mut Graph,
        node_id: &str,
        ports: Option<&[&str]>,
    ) -> Result<()> {
        let auto_nodes = collect_upstream_auto_nodes(graph, node_id, ports);
        if auto_nodes.is_empty() {
            return Ok(());
        }
        let order = topological_sort(graph)?;
        for id in order.iter().filter(|id| auto_nodes.contains(id.as_str())) {
            self.execute_auto_node(graph, id).await?;
        }
        Ok(())
    }

    /// Run one node's hook, optionally after its upstream auto nodes.
    pub async fn run_auto_node(
        &self,
        graph: &mut Graph,
        node_id: &str,
        include_upstream: bool,
    ) -> Result<()> {
        if include_upstream {
            self.ensure_auto_nodes_for_node(graph, node_id, None).await?;
        }
        self.execute_auto_node(graph, node_id).await
    }

    /// Run every chain-execution node (with upstream) in topological order.
    ///
    /// Stops at the first failure; earlier patches stay applied.
    pub async fn run_chain_executions(&self, graph: &mut Graph) -> Result<()> {
        if graph.is_empty() {
            return Ok(());
        }
        let chain: HashSet<String> = graph
            .nodes()
            .filter(|node| node.definition.chain_execution && node.definition.auto_execute.is_some())
            .map(|node| node.id.clone())
            .collect();
        if chain.is_empty() {
            return Ok(());
        }
        let order = topological_sort(graph)?;
        for id in order.iter().filter(|id| chain.contains(*id)) {
            self.run_auto_node(graph, id, true).await?;
        }
        Ok(())
    }
}

/// What a background worker does once the chain has run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportMode {
    /// Compile only.
    Export,
    /// Compile and send the script to the host.
    Run,
}

/// Run the chain and compile `graph` on a worker thread.
///
/// The graph is a snapshot; config writes made by hooks are reported as
/// [`ExecutionEvent::ConfigPatched`] so the caller can replay them on the live
/// graph. The stream always ends with [`ExecutionEvent::Finished`].
pub fn run_async(
    graph: Graph,
    host: Option<Arc<dyn ScriptHost>>,
    mode: ExportMode,
) -> Receiver<ExecutionEvent> {
    let (tx, rx) = channel();
    tx.send(ExecutionEvent::Log(format!("{mode:?} started."))).unwrap_or_default();

    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                tx.send(ExecutionEvent::Failed(format!("Failed to start runtime: {e}")))
                    .unwrap_or_default();
                tx.send(ExecutionEvent::Finished).unwrap_or_default();
                return;
            }
        };
        let outcome = runtime.block_on(export_pass(graph, host, mode, tx.clone()));
        if let Err(e) = outcome {
            log::error!("{mode:?} failed: {e}");
            tx.send(ExecutionEvent::Failed(e.to_string())).unwrap_or_default();
        }
        tx.send(ExecutionEvent::Finished).unwrap_or_default();
    });

    rx
}

async fn export_pass(
    mut graph: Graph,
    host: Option<Arc<dyn ScriptHost>>,
    mode: ExportMode,
    tx: Sender<ExecutionEvent>,
) -> Result<()> {
    ChainExecutor::new(host.clone())
        .with_events(tx.clone())
        .run_chain_executions(&mut graph)
        .await?;
    let script = generate_script(&graph)?;
    tx.send(ExecutionEvent::ScriptReady(script.clone())).unwrap_or_default();
    if mode == ExportMode::Export {
        return Ok(());
    }
    let Some(host) = host else {
        tx.send(ExecutionEvent::Log("No script host configured; exported only.".to_string()))
            .unwrap_or_default();
        return Ok(());
    };
    let response = host.run_script(&script).await?;
    tx.send(ExecutionEvent::RunCompleted(response)).unwrap_or_default();
    Ok(())
}

/// Breadth-first walk upstream of `node_id`, collecting nodes with an auto-execute hook.
///
/// The start node itself is not included unless it feeds itself through a cycle.
pub fn collect_upstream_auto_nodes(
    graph: &Graph,
    node_id: &str,
    ports: Option<&[&str]>,
) -> IndexSet<String> {
    let mut found = IndexSet::new();
    if !graph.contains_node(node_id) {
        return found;
    }
    let ports: Option<HashSet<&str>> = ports
        .map(|names| names.iter().copied().filter(|name| !name.is_empty()).collect())
        .filter(|set: &HashSet<&str>| !set.is_empty());

    let mut queue: std::collections::VecDeque<&str> = graph
        .upstream_of(node_id)
        .filter(|c| ports.as_ref().is_none_or(|set| set.contains(c.to_port.as_str())))
        .map(|c| c.from_node.as_str())
        .collect();
    let mut visited = HashSet::new();

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let Some(node) = graph.node(current) else {
            continue;
        };
        if node.definition.auto_execute.is_some() {
            found.insert(current.to_string());
        }
        queue.extend(graph.upstream_of(current).map(|c| c.from_node.as_str()));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_types::{ExecutionMode, Library, NodeDefinition};
    use async_trait::async_trait;
    use egui::Pos2;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records the order hooks ran in and writes `Out = <n>`.
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl AutoExecute for Recorder {
        async fn execute(&self, ctx: AutoExecContext) -> anyhow::Result<ConfigPatch> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if self.fail {
                anyhow::bail!("host unreachable");
            }
            let mut log = self.log.lock().unwrap();
            log.push(ctx.node_id.clone());
            let mut patch = ConfigPatch::new();
            patch.set_output("Out", &log.len().to_string());
            Ok(patch)
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl AutoExecute for Counting {
        async fn execute(&self, _ctx: AutoExecContext) -> anyhow::Result<ConfigPatch> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(ConfigPatch::new())
        }
    }

    fn library(log: &Arc<Mutex<Vec<String>>>) -> Library {
        let auto = |id: &str, fail: bool| {
            NodeDefinition::new(id, id)
                .execution(ExecutionMode::Ui)
                .inputs(["In"])
                .outputs(["Out"])
                .auto_execute(Recorder { log: log.clone(), fail })
        };
        Library::new([
            auto("fetch", false),
            auto("broken", true),
            auto("entry", false).chain_execution(true),
            NodeDefinition::new("plain", "Plain").inputs(["In"]).outputs(["Out"]),
        ])
    }

    fn add(graph: &mut Graph, lib: &Library, def: &str) -> String {
        graph
            .create_node(lib.get(def).unwrap().clone(), Pos2::ZERO)
            .id
            .clone()
    }

    #[test]
    fn test_collect_upstream_skips_unrelated_and_filters_ports() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lib = Library::new([
            NodeDefinition::new("fetch", "Fetch")
                .outputs(["Out"])
                .auto_execute(Recorder { log: log.clone(), fail: false }),
            NodeDefinition::new("plain", "Plain").inputs(["A", "B"]).outputs(["Out"]),
        ]);
        let mut graph = Graph::new();
        let f1 = add(&mut graph, &lib, "fetch");
        let f2 = add(&mut graph, &lib, "fetch");
        let mid = add(&mut graph, &lib, "plain");
        let sink = add(&mut graph, &lib, "plain");
        let _unrelated = add(&mut graph, &lib, "fetch");
        graph.add_connection(&f1, "Out", &mid, "A").unwrap();
        graph.add_connection(&mid, "Out", &sink, "A").unwrap();
        graph.add_connection(&f2, "Out", &sink, "B").unwrap();

        let all = collect_upstream_auto_nodes(&graph, &sink, None);
        assert_eq!(all.len(), 2);
        assert!(all.contains(&f1) && all.contains(&f2));

        let only_b = collect_upstream_auto_nodes(&graph, &sink, Some(&["B"]));
        assert_eq!(only_b.into_iter().collect::<Vec<_>>(), vec![f2]);
    }

    #[tokio::test]
    async fn test_chain_runs_upstream_first_and_applies_patches() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lib = library(&log);
        let mut graph = Graph::new();
        let entry = add(&mut graph, &lib, "entry");
        let fetch = add(&mut graph, &lib, "fetch");
        graph.add_connection(&fetch, "Out", &entry, "In").unwrap();

        let executor = ChainExecutor::new(None);
        executor.run_chain_executions(&mut graph).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![fetch.clone(), entry.clone()]);
        assert_eq!(graph.node(&fetch).unwrap().config_value("Out"), "1");
        assert_eq!(graph.node(&entry).unwrap().config_value("Out__raw"), "2");
        assert!(executor.pass().is_completed(&fetch));
    }

    #[tokio::test]
    async fn test_shared_upstream_runs_once_per_pass() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lib = library(&log);
        let mut graph = Graph::new();
        let fetch = add(&mut graph, &lib, "fetch");
        let a = add(&mut graph, &lib, "entry");
        let b = add(&mut graph, &lib, "entry");
        graph.add_connection(&fetch, "Out", &a, "In").unwrap();
        graph.add_connection(&fetch, "Out", &b, "In").unwrap();

        ChainExecutor::new(None)
            .run_chain_executions(&mut graph)
            .await
            .unwrap();
        let runs = log.lock().unwrap();
        assert_eq!(runs.iter().filter(|id| **id == fetch).count(), 1);
        assert_eq!(runs.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_aborts_without_rollback() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lib = library(&log);
        let mut graph = Graph::new();
        let fetch = add(&mut graph, &lib, "fetch");
        let broken = add(&mut graph, &lib, "broken");
        let entry = add(&mut graph, &lib, "entry");
        graph.add_connection(&fetch, "Out", &broken, "In").unwrap();
        graph.add_connection(&broken, "Out", &entry, "In").unwrap();

        let err = ChainExecutor::new(None)
            .run_chain_executions(&mut graph)
            .await
            .unwrap_err();
        match err {
            NodeFlowError::AutoExecution { node_id, message } => {
                assert_eq!(node_id, broken);
                assert!(message.contains("host unreachable"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(graph.node(&fetch).unwrap().config_value("Out"), "1");
        assert_eq!(*log.lock().unwrap(), vec![fetch]);
    }

    #[tokio::test]
    async fn test_run_auto_node_without_upstream() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lib = library(&log);
        let mut graph = Graph::new();
        let fetch = add(&mut graph, &lib, "fetch");
        let other = add(&mut graph, &lib, "fetch");
        graph.add_connection(&fetch, "Out", &other, "In").unwrap();

        let executor = ChainExecutor::new(None);
        executor.run_auto_node(&mut graph, &other, false).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![other]);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_share_one_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook: Arc<dyn AutoExecute> = Arc::new(Counting(count.clone()));
        let pass = AutoExecutionPass::new();
        let ctx = AutoExecContext {
            node_id: "query_1".to_string(),
            config: BTreeMap::new(),
            inputs: BTreeMap::new(),
            host: None,
        };

        let (a, b) = tokio::join!(
            pass.run(hook.clone(), ctx.clone()),
            pass.run(hook.clone(), ctx.clone())
        );
        assert!(a.unwrap().is_ok());
        assert!(b.unwrap().is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(pass.run(hook, ctx).await.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_async_streams_patches_then_script() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lib = library(&log);
        let mut graph = Graph::new();
        let entry = add(&mut graph, &lib, "entry");

        let events: Vec<ExecutionEvent> = run_async(graph, None, ExportMode::Run).iter().collect();
        let patched = events.iter().any(|e| {
            matches!(e, ExecutionEvent::ConfigPatched { node_id, .. } if *node_id == entry)
        });
        assert!(patched);
        assert!(events.iter().any(|e| matches!(e, ExecutionEvent::ScriptReady(s) if s.contains("Set-StrictMode"))));
        assert!(matches!(events.last(), Some(ExecutionEvent::Finished)));
        assert!(!events.iter().any(|e| matches!(e, ExecutionEvent::Failed(_))));
    }

    #[test]
    fn test_run_async_reports_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lib = library(&log);
        let mut graph = Graph::new();
        let broken = add(&mut graph, &lib, "broken");
        let entry = add(&mut graph, &lib, "entry");
        graph.add_connection(&broken, "Out", &entry, "In").unwrap();

        let events: Vec<ExecutionEvent> = run_async(graph, None, ExportMode::Export).iter().collect();
        assert!(events.iter().any(|e| matches!(e, ExecutionEvent::Failed(msg) if msg.contains("host unreachable"))));
        assert!(!events.iter().any(|e| matches!(e, ExecutionEvent::ScriptReady(_))));
    }

    #[tokio::test]
    async fn test_patch_for_removed_node_is_discarded() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lib = library(&log);
        let mut graph = Graph::new();
        let fetch = add(&mut graph, &lib, "fetch");
        graph.remove_node(&fetch);
        let mut patch = ConfigPatch::new();
        patch.set("Out", "late");
        assert!(!graph.apply_patch(&fetch, patch));
        assert!(graph.is_empty());
    }
}
