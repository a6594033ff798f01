//! World-space geometry of rendered nodes, shared by drawing and hit-testing.

use egui::{Pos2, Rect, Vec2};

use crate::graph::{Graph, NodeInstance};
use crate::node_types::{NodeDefinition, PortKind};

pub const NODE_WIDTH: f32 = 200.0;
pub const HEADER_HEIGHT: f32 = 28.0;
pub const PORT_ROW_HEIGHT: f32 = 22.0;
pub const CONTROL_ROW_HEIGHT: f32 = 26.0;
pub const PADDING: f32 = 8.0;
pub const HANDLE_RADIUS: f32 = 6.0;
const MIN_NODE_HEIGHT: f32 = 60.0;

/// A port on a placed node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub node_id: String,
    pub port: String,
    pub kind: PortKind,
}

impl PortRef {
    pub fn new(node_id: impl Into<String>, port: impl Into<String>, kind: PortKind) -> Self {
        Self {
            node_id: node_id.into(),
            port: port.into(),
            kind,
        }
    }
}

fn port_rows(definition: &NodeDefinition) -> usize {
    definition.inputs.len().max(definition.outputs.len())
}

pub fn node_size(definition: &NodeDefinition) -> Vec2 {
    let body = port_rows(definition) as f32 * PORT_ROW_HEIGHT
        + definition.controls.len() as f32 * CONTROL_ROW_HEIGHT;
    Vec2::new(
        NODE_WIDTH,
        (HEADER_HEIGHT + body + PADDING * 2.0).max(MIN_NODE_HEIGHT),
    )
}

pub fn node_rect(node: &NodeInstance) -> Rect {
    Rect::from_min_size(node.position, node_size(&node.definition))
}

pub fn header_rect(node: &NodeInstance) -> Rect {
    let rect = node_rect(node);
    Rect::from_min_size(rect.min, Vec2::new(rect.width(), HEADER_HEIGHT))
}

/// Centre of a port handle.
pub fn port_anchor(node: &NodeInstance, kind: PortKind, port: &str) -> Option<Pos2> {
    let index = node.definition.ports(kind).iter().position(|p| p == port)?;
    let rect = node_rect(node);
    let y = rect.top() + HEADER_HEIGHT + PADDING + PORT_ROW_HEIGHT * (index as f32 + 0.5);
    let x = match kind {
        PortKind::Input => rect.left(),
        PortKind::Output => rect.right(),
    };
    Some(Pos2::new(x, y))
}

/// Row holding the editor for control `index`.
pub fn control_rect(node: &NodeInstance, index: usize) -> Rect {
    let rect = node_rect(node);
    let top = rect.top()
        + HEADER_HEIGHT
        + PADDING
        + port_rows(&node.definition) as f32 * PORT_ROW_HEIGHT
        + index as f32 * CONTROL_ROW_HEIGHT;
    Rect::from_min_max(
        Pos2::new(rect.left() + PADDING, top),
        Pos2::new(rect.right() - PADDING, top + CONTROL_ROW_HEIGHT - 4.0),
    )
}

pub fn controls_area(node: &NodeInstance) -> Option<Rect> {
    let count = node.definition.controls.len();
    if count == 0 {
        return None;
    }
    Some(control_rect(node, 0).union(control_rect(node, count - 1)))
}

/// Topmost port whose handle lies within `radius` of `world`.
pub fn hit_port(graph: &Graph, world: Pos2, radius: f32) -> Option<PortRef> {
    let nodes: Vec<&NodeInstance> = graph.nodes().collect();
    for node in nodes.into_iter().rev() {
        for kind in [PortKind::Input, PortKind::Output] {
            for port in node.definition.ports(kind) {
                let Some(anchor) = port_anchor(node, kind, port) else {
                    continue;
                };
                if anchor.distance(world) <= radius {
                    return Some(PortRef::new(node.id.clone(), port.clone(), kind));
                }
            }
        }
    }
    None
}

/// Topmost node containing `world`. Later nodes draw above earlier ones.
pub fn hit_node(graph: &Graph, world: Pos2) -> Option<String> {
    let nodes: Vec<&NodeInstance> = graph.nodes().collect();
    nodes
        .into_iter()
        .rev()
        .find(|node| node_rect(node).contains(world))
        .map(|node| node.id.clone())
}

pub fn nodes_in_rect(graph: &Graph, world_rect: Rect) -> Vec<String> {
    graph
        .nodes()
        .filter(|node| node_rect(node).intersects(world_rect))
        .map(|node| node.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_types::{ControlSpec, NodeDefinition};
    use std::sync::Arc;

    fn graph() -> (Graph, String, String) {
        let def = Arc::new(
            NodeDefinition::new("n", "N")
                .inputs(["A", "B"])
                .outputs(["Out"])
                .control(ControlSpec::text("k", "")),
        );
        let mut graph = Graph::new();
        let a = graph.create_node(def.clone(), Pos2::new(0.0, 0.0)).id.clone();
        let b = graph.create_node(def, Pos2::new(100.0, 10.0)).id.clone();
        (graph, a, b)
    }

    #[test]
    fn test_port_anchor_positions() {
        let (graph, a, _) = graph();
        let node = graph.node(&a).unwrap();
        let input_b = port_anchor(node, PortKind::Input, "B").unwrap();
        assert_eq!(input_b.x, 0.0);
        assert_eq!(input_b.y, HEADER_HEIGHT + PADDING + PORT_ROW_HEIGHT * 1.5);
        let out = port_anchor(node, PortKind::Output, "Out").unwrap();
        assert_eq!(out.x, NODE_WIDTH);
        assert!(port_anchor(node, PortKind::Output, "Missing").is_none());
    }

    #[test]
    fn test_hit_node_prefers_topmost() {
        let (graph, a, b) = graph();
        assert_eq!(hit_node(&graph, Pos2::new(150.0, 20.0)), Some(b));
        assert_eq!(hit_node(&graph, Pos2::new(50.0, 20.0)), Some(a));
        assert_eq!(hit_node(&graph, Pos2::new(-5.0, 20.0)), None);
    }

    #[test]
    fn test_hit_port_and_box() {
        let (graph, a, b) = graph();
        let anchor = port_anchor(graph.node(&a).unwrap(), PortKind::Input, "A").unwrap();
        let hit = hit_port(&graph, anchor + Vec2::new(2.0, 2.0), HANDLE_RADIUS).unwrap();
        assert_eq!(hit, PortRef::new(a.clone(), "A", PortKind::Input));

        let boxed = nodes_in_rect(&graph, Rect::from_min_max(Pos2::new(250.0, 20.0), Pos2::new(260.0, 25.0)));
        assert_eq!(boxed, vec![b]);
    }
}
