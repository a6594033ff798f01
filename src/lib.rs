//! NodeFlow: a visual node-graph editor that compiles graphs into PowerShell scripts.
//!
//! - [`node_types`]: node definitions, controls and the definition library
//! - [`graph`]: node instances, connections and persistence shape
//! - [`compiler`]: topological ordering and script generation
//! - [`executor`]: auto-execution chain and script host transport
//! - [`editor`]: canvas state, interaction and rendering
//! - [`palette`]: the hierarchical node palette
//! - [`library`]: built-in and user-authored node definitions

pub mod compiler;
pub mod editor;
pub mod error;
pub mod executor;
pub mod graph;
pub mod library;
pub mod node_types;
pub mod palette;
pub mod settings;
pub mod storage;

pub use error::{NodeFlowError, Result};
