//! Runtime graph model built from the parsed DOT AST.
//!
//! Nodes and edges keep their full attribute maps open-ended; the recognized
//! keys are exposed through typed accessors that parse on demand.

use std::collections::HashMap;
use std::time::Duration;

use waypoint_dot::{AttrMap, AttrValue, GraphAst};

const DEFAULT_MAX_RETRY: usize = 50;

/// Immutable pipeline graph: nodes indexed by id, edges in declaration order
/// grouped per source node.
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    pub attrs: AttrMap,
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    adjacency: HashMap<String, (usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub attrs: AttrMap,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub attrs: AttrMap,
}

fn attr_string(attrs: &AttrMap, key: &str) -> Option<String> {
    attrs.get(key).map(AttrValue::display)
}

fn attr_bool(attrs: &AttrMap, key: &str) -> Option<bool> {
    match attrs.get(key)? {
        AttrValue::Boolean(b) => Some(*b),
        AttrValue::String(s) => Some(s == "true"),
        _ => None,
    }
}

fn attr_int(attrs: &AttrMap, key: &str) -> Option<i64> {
    match attrs.get(key)? {
        AttrValue::Integer(i) => Some(*i),
        AttrValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn attr_duration(attrs: &AttrMap, key: &str) -> Option<Duration> {
    match attrs.get(key)? {
        AttrValue::Duration(d) => Some(*d),
        AttrValue::Integer(i) if *i >= 0 => Some(Duration::from_secs(*i as u64)),
        AttrValue::Float(f) if *f >= 0.0 => Some(Duration::from_millis((*f * 1000.0) as u64)),
        AttrValue::String(s) => waypoint_types::parse_duration(s),
        _ => None,
    }
}

impl Node {
    /// Display label; falls back to the node id.
    pub fn label(&self) -> String {
        attr_string(&self.attrs, "label").unwrap_or_else(|| self.id.clone())
    }

    /// Shape drives handler dispatch; unspecified nodes are boxes.
    pub fn shape(&self) -> String {
        attr_string(&self.attrs, "shape").unwrap_or_else(|| "box".to_string())
    }

    pub fn node_type(&self) -> Option<String> {
        attr_string(&self.attrs, "type")
    }

    pub fn prompt(&self) -> Option<String> {
        attr_string(&self.attrs, "prompt")
    }

    /// Per-node retry budget; `None` defers to the graph default.
    pub fn max_retries(&self) -> Option<usize> {
        attr_int(&self.attrs, "max_retries").map(|v| v.max(0) as usize)
    }

    pub fn goal_gate(&self) -> bool {
        attr_bool(&self.attrs, "goal_gate").unwrap_or(false)
    }

    pub fn retry_target(&self) -> Option<String> {
        attr_string(&self.attrs, "retry_target").filter(|s| !s.is_empty())
    }

    pub fn fallback_retry_target(&self) -> Option<String> {
        attr_string(&self.attrs, "fallback_retry_target").filter(|s| !s.is_empty())
    }

    pub fn timeout(&self) -> Option<Duration> {
        attr_duration(&self.attrs, "timeout")
    }

    pub fn allow_partial(&self) -> bool {
        attr_bool(&self.attrs, "allow_partial").unwrap_or(false)
    }

    pub fn classes(&self) -> Vec<String> {
        attr_string(&self.attrs, "class")
            .map(|s| {
                s.replace(',', " ")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn attr_str(&self, key: &str) -> Option<String> {
        attr_string(&self.attrs, key)
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        attr_bool(&self.attrs, key)
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        attr_int(&self.attrs, key)
    }

    pub fn attr_duration(&self, key: &str) -> Option<Duration> {
        attr_duration(&self.attrs, key)
    }

    pub fn is_start(&self) -> bool {
        self.shape() == "Mdiamond" || self.id.eq_ignore_ascii_case("start")
    }

    pub fn is_terminal(&self) -> bool {
        self.shape() == "Msquare"
            || matches!(self.id.to_ascii_lowercase().as_str(), "exit" | "end" | "done")
    }
}

impl Edge {
    pub fn label(&self) -> Option<String> {
        attr_string(&self.attrs, "label").filter(|s| !s.is_empty())
    }

    pub fn condition(&self) -> Option<String> {
        attr_string(&self.attrs, "condition").filter(|s| !s.trim().is_empty())
    }

    pub fn weight(&self) -> i64 {
        match self.attrs.get("weight") {
            Some(AttrValue::Integer(i)) => *i,
            Some(AttrValue::Float(f)) => *f as i64,
            _ => 0,
        }
    }
}

impl Graph {
    /// Build the runtime graph from a parsed document, folding subgraph
    /// contents into one flat node/edge set.
    pub fn from_ast(ast: GraphAst) -> Self {
        let mut nodes: HashMap<String, Node> = HashMap::new();
        let mut edges: Vec<Edge> = Vec::new();

        for (id, def) in ast.nodes {
            nodes.insert(id.clone(), Node { id, attrs: def.attrs });
        }
        for def in ast.edges {
            edges.push(Edge { from: def.from, to: def.to, attrs: def.attrs });
        }
        for sg in ast.subgraphs {
            for (id, def) in sg.nodes {
                nodes.entry(id.clone()).or_insert(Node { id, attrs: def.attrs });
            }
            for def in sg.edges {
                edges.push(Edge { from: def.from, to: def.to, attrs: def.attrs });
            }
        }

        // Group each node's outgoing edges into a contiguous slice.
        edges.sort_by(|a, b| a.from.cmp(&b.from));
        let mut adjacency = HashMap::new();
        let mut i = 0;
        while i < edges.len() {
            let start = i;
            let from = edges[i].from.clone();
            while i < edges.len() && edges[i].from == from {
                i += 1;
            }
            adjacency.insert(from, (start, i - start));
        }

        Graph {
            name: ast.name,
            attrs: ast.attrs,
            nodes,
            edges,
            adjacency,
        }
    }

    pub fn goal(&self) -> String {
        attr_string(&self.attrs, "goal").unwrap_or_default()
    }

    pub fn default_max_retry(&self) -> usize {
        attr_int(&self.attrs, "default_max_retry")
            .map(|v| v.max(0) as usize)
            .unwrap_or(DEFAULT_MAX_RETRY)
    }

    pub fn retry_target(&self) -> Option<String> {
        attr_string(&self.attrs, "retry_target").filter(|s| !s.is_empty())
    }

    pub fn fallback_retry_target(&self) -> Option<String> {
        attr_string(&self.attrs, "fallback_retry_target").filter(|s| !s.is_empty())
    }

    pub fn model_stylesheet(&self) -> Option<String> {
        attr_string(&self.attrs, "model_stylesheet").filter(|s| !s.is_empty())
    }

    pub fn attr_str(&self, key: &str) -> Option<String> {
        attr_string(&self.attrs, key)
    }

    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        attr_bool(&self.attrs, key)
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        attr_int(&self.attrs, key)
    }

    pub fn attr_duration(&self, key: &str) -> Option<Duration> {
        attr_duration(&self.attrs, key)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn outgoing_edges(&self, node_id: &str) -> &[Edge] {
        match self.adjacency.get(node_id) {
            Some(&(start, len)) => &self.edges[start..start + len],
            None => &[],
        }
    }

    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to == node_id)
    }

    /// The unique entry node: `shape=Mdiamond`, or id `start` (any case).
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| n.shape() == "Mdiamond")
            .or_else(|| self.nodes.values().find(|n| n.id.eq_ignore_ascii_case("start")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(dot: &str) -> Graph {
        Graph::from_ast(waypoint_dot::parse(dot).unwrap())
    }

    #[test]
    fn builds_linear_graph() {
        let g = build(
            r#"digraph Demo {
                start [shape="Mdiamond"]
                work [label="Do work"]
                done [shape="Msquare"]
                start -> work -> done
            }"#,
        );
        assert_eq!(g.name, "Demo");
        assert_eq!(g.edges().len(), 2);
        assert_eq!(g.node("work").unwrap().label(), "Do work");
        assert_eq!(g.node("work").unwrap().shape(), "box");
    }

    #[test]
    fn start_node_by_shape_then_id() {
        let by_shape = build(r#"digraph G { entry [shape="Mdiamond"] entry -> x }"#);
        assert_eq!(by_shape.start_node().unwrap().id, "entry");

        let by_id = build(r#"digraph G { Start -> x }"#);
        assert_eq!(by_id.start_node().unwrap().id, "Start");
    }

    #[test]
    fn terminal_detection() {
        let g = build(
            r#"digraph G {
                a -> finish
                finish [shape="Msquare"]
                a -> End
            }"#,
        );
        assert!(g.node("finish").unwrap().is_terminal());
        assert!(g.node("End").unwrap().is_terminal());
        assert!(!g.node("a").unwrap().is_terminal());
    }

    #[test]
    fn outgoing_edges_grouped() {
        let g = build(
            r#"digraph G {
                a -> b [label="one"]
                a -> c [label="two"]
                b -> c
            }"#,
        );
        assert_eq!(g.outgoing_edges("a").len(), 2);
        assert_eq!(g.outgoing_edges("b").len(), 1);
        assert_eq!(g.outgoing_edges("c").len(), 0);
        assert_eq!(g.incoming_edges("c").count(), 2);
    }

    #[test]
    fn typed_node_accessors() {
        let g = build(
            r#"digraph G {
                n [max_retries=3, goal_gate=true, allow_partial=true,
                   timeout=30s, retry_target="n", class="critical, build"]
            }"#,
        );
        let n = g.node("n").unwrap();
        assert_eq!(n.max_retries(), Some(3));
        assert!(n.goal_gate());
        assert!(n.allow_partial());
        assert_eq!(n.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(n.retry_target().as_deref(), Some("n"));
        assert_eq!(n.classes(), vec!["critical".to_string(), "build".to_string()]);
    }

    #[test]
    fn integer_timeout_is_seconds() {
        let g = build(r#"digraph G { n [timeout=45] }"#);
        assert_eq!(g.node("n").unwrap().timeout(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn graph_level_accessors() {
        let g = build(
            r#"digraph G {
                goal = "ship it"
                default_max_retry = 2
                retry_target = "fixup"
                a -> b
            }"#,
        );
        assert_eq!(g.goal(), "ship it");
        assert_eq!(g.default_max_retry(), 2);
        assert_eq!(g.retry_target().as_deref(), Some("fixup"));
        assert_eq!(g.fallback_retry_target(), None);
    }

    #[test]
    fn default_max_retry_defaults_to_fifty() {
        let g = build(r#"digraph G { a -> b }"#);
        assert_eq!(g.default_max_retry(), 50);
    }

    #[test]
    fn edge_accessors() {
        let g = build(
            r#"digraph G {
                a -> b [label="ok", condition="outcome=success", weight=5]
                a -> c
            }"#,
        );
        let edges = g.outgoing_edges("a");
        let to_b = edges.iter().find(|e| e.to == "b").unwrap();
        assert_eq!(to_b.label().as_deref(), Some("ok"));
        assert_eq!(to_b.condition().as_deref(), Some("outcome=success"));
        assert_eq!(to_b.weight(), 5);

        let to_c = edges.iter().find(|e| e.to == "c").unwrap();
        assert_eq!(to_c.label(), None);
        assert_eq!(to_c.condition(), None);
        assert_eq!(to_c.weight(), 0);
    }

    #[test]
    fn subgraph_nodes_and_edges_folded() {
        let g = build(
            r#"digraph G {
                a -> b
                subgraph cluster_x {
                    node [shape="ellipse"]
                    c -> d
                }
            }"#,
        );
        assert!(g.node("c").is_some());
        assert_eq!(g.node("c").unwrap().shape(), "ellipse");
        assert_eq!(g.edges().len(), 2);
    }
}
