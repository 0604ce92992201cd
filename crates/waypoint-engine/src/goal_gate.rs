//! Goal-gate enforcement at terminal nodes.
//!
//! A node marked `goal_gate=true` must have finished with SUCCESS or
//! PARTIAL_SUCCESS before the pipeline may terminate. When a gate is
//! unsatisfied, the engine jumps to a retry target resolved through a
//! four-level fallback chain; re-entry is unbounded.

use std::collections::HashMap;

use waypoint_types::Outcome;

use crate::graph::{Graph, Node};

#[derive(Debug)]
pub struct GateCheck {
    pub satisfied: bool,
    pub failed_node: Option<String>,
    pub retry_target: Option<String>,
}

impl GateCheck {
    fn satisfied() -> Self {
        Self {
            satisfied: true,
            failed_node: None,
            retry_target: None,
        }
    }
}

/// Check every completed goal-gate node, in completion order. The first
/// unsatisfied gate determines the retry target.
pub fn check_goal_gates(
    graph: &Graph,
    completed: &[String],
    outcomes: &HashMap<String, Outcome>,
) -> GateCheck {
    for node_id in completed {
        let Some(node) = graph.node(node_id) else {
            continue;
        };
        if !node.goal_gate() {
            continue;
        }
        let ok = outcomes
            .get(node_id)
            .map(|o| o.status.is_success())
            .unwrap_or(false);
        if !ok {
            return GateCheck {
                satisfied: false,
                failed_node: Some(node_id.clone()),
                retry_target: resolve_retry_target(graph, node),
            };
        }
    }
    GateCheck::satisfied()
}

/// Node `retry_target`, then node `fallback_retry_target`, then the graph's
/// `retry_target`, then the graph's `fallback_retry_target`.
pub fn resolve_retry_target(graph: &Graph, node: &Node) -> Option<String> {
    node.retry_target()
        .or_else(|| node.fallback_retry_target())
        .or_else(|| graph.retry_target())
        .or_else(|| graph.fallback_retry_target())
}
