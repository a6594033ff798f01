//! Error types for the editor core.

use thiserror::Error;

/// Result type alias using [`NodeFlowError`].
pub type Result<T> = std::result::Result<T, NodeFlowError>;

/// Errors surfaced by graph compilation, the auto-execution chain and persistence.
///
/// Compile-time errors (`CycleDetected`, `MissingInput`) and auto-execution
/// failures abort the export/run pass. Library/graph desyncs never show up here:
/// those are pruned silently.
#[derive(Debug, Error)]
pub enum NodeFlowError {
    /// Topological sort could not order every node.
    #[error("Circular dependency detected.")]
    CycleDetected,

    /// A script node has inputs that resolve to nothing.
    #[error("{label} is missing required input: {}", inputs.join(", "))]
    MissingInput { label: String, inputs: Vec<String> },

    /// An auto-execute hook failed; earlier hooks in the same pass keep their effects.
    #[error("Auto-execution of '{node_id}' failed: {message}")]
    AutoExecution { node_id: String, message: String },

    /// Referenced node id is not present in the graph.
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// Port is not declared by the node's definition.
    #[error("Node '{node_id}' has no {kind} port '{port}'")]
    UnknownPort {
        node_id: String,
        port: String,
        kind: &'static str,
    },

    /// Referenced definition id is not present in the library.
    #[error("Unknown node definition: {0}")]
    UnknownDefinition(String),

    /// Script host request failed or returned an unusable payload.
    #[error("Script host error: {0}")]
    Transport(String),

    /// Backing store failed to read or write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeFlowError {
    /// Wrap a hook failure for the given node.
    pub fn auto_execution(node_id: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::AutoExecution {
            node_id: node_id.into(),
            message: format!("{err:#}"),
        }
    }

    /// Whether this error aborts an export/run pass at compile time.
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Self::CycleDetected | Self::MissingInput { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_message_names_node_and_inputs() {
        let err = NodeFlowError::MissingInput {
            label: "Sum".into(),
            inputs: vec!["First".into(), "Second".into()],
        };
        assert_eq!(err.to_string(), "Sum is missing required input: First, Second");
        assert!(err.is_compile_error());
    }

    #[test]
    fn test_cycle_message_is_verbatim() {
        assert_eq!(
            NodeFlowError::CycleDetected.to_string(),
            "Circular dependency detected."
        );
    }

    #[test]
    fn test_auto_execution_keeps_context_chain() {
        let inner = anyhow::anyhow!("connection refused").context("query host");
        let err = NodeFlowError::auto_execution("query_1", &inner);
        assert!(err.to_string().contains("query_1"));
        assert!(err.to_string().contains("connection refused"));
        assert!(!err.is_compile_error());
    }
}
