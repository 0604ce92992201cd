use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attribute map shared by graphs, nodes, and edges.
pub type AttrMap = HashMap<String, AttrValue>;

/// A parsed `digraph` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphAst {
    pub name: String,
    pub attrs: AttrMap,
    pub nodes: HashMap<String, NodeAst>,
    pub edges: Vec<EdgeAst>,
    pub subgraphs: Vec<SubgraphAst>,
    pub node_defaults: AttrMap,
    pub edge_defaults: AttrMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAst {
    pub id: String,
    pub attrs: AttrMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeAst {
    pub from: String,
    pub to: String,
    pub attrs: AttrMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphAst {
    pub name: Option<String>,
    pub attrs: AttrMap,
    pub nodes: HashMap<String, NodeAst>,
    pub edges: Vec<EdgeAst>,
    pub node_defaults: AttrMap,
    pub edge_defaults: AttrMap,
}

/// Typed attribute value. Duration literals carry their unit suffix in the
/// source (`250ms`, `15m`) but are stored resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    #[serde(with = "crate::duration_serde")]
    Duration(Duration),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Loose string rendering used where attributes feed text interfaces
    /// (conditions, prompts, stylesheets).
    pub fn display(&self) -> String {
        match self {
            AttrValue::String(s) => s.clone(),
            AttrValue::Integer(i) => i.to_string(),
            AttrValue::Float(f) => f.to_string(),
            AttrValue::Boolean(b) => b.to_string(),
            AttrValue::Duration(d) => format!("{}ms", d.as_millis()),
        }
    }
}
