use crate::executor::bridge::RunResponse;
use crate::node_types::ConfigPatch;

/// Progress reported by a background export/run worker.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Log(String),
    NodeActive(String),
    NodeInactive(String),
    /// Config writes an auto-execute hook produced, to replay on the live graph.
    ConfigPatched { node_id: String, patch: ConfigPatch },
    ScriptReady(String),
    RunCompleted(RunResponse),
    Failed(String),
    Finished,
}

impl ExecutionEvent {
    /// Message that must be acknowledged by the user before work continues.
    pub fn blocking_message(&self) -> Option<&str> {
        match self {
            ExecutionEvent::Failed(message) => Some(message),
            _ => None,
        }
    }
}
