//! Edge selection: the five-step priority cascade run after every stage.
//!
//! 1. conditional edges whose condition holds (best by weight, then target)
//! 2. edge whose label matches the outcome's preferred label
//! 3. first edge targeting one of the outcome's suggested next ids
//! 4. unconditional edges by weight, then target
//! 5. catch-all over every edge — only when the outcome is not FAIL

use std::collections::HashMap;

use waypoint_types::{Outcome, StageStatus};

use crate::condition::evaluate_condition;
use crate::graph::{Edge, Graph};

/// Pick the next edge out of `node_id`, or `None` when the run should stop.
pub fn select_edge<'g>(
    graph: &'g Graph,
    node_id: &str,
    outcome: &Outcome,
    values: &HashMap<String, serde_json::Value>,
) -> Option<&'g Edge> {
    let edges = graph.outgoing_edges(node_id);
    if edges.is_empty() {
        return None;
    }

    // Step 1: conditional edges whose condition evaluates true.
    let matched: Vec<&Edge> = edges
        .iter()
        .filter(|e| {
            e.condition()
                .map(|c| evaluate_condition(&c, outcome, values))
                .unwrap_or(false)
        })
        .collect();
    if !matched.is_empty() {
        return best_edge(matched);
    }

    // Step 2: preferred label from the outcome.
    if let Some(label) = outcome.preferred_label.as_deref() {
        if !label.is_empty() {
            let wanted = normalize_label(label);
            for edge in edges {
                if edge.label().map(|l| normalize_label(&l)) == Some(wanted.clone()) {
                    return Some(edge);
                }
            }
        }
    }

    // Step 3: suggested next ids, in the order the handler proposed them.
    for suggested in &outcome.suggested_next_ids {
        if let Some(edge) = edges.iter().find(|e| e.to == *suggested) {
            return Some(edge);
        }
    }

    // Step 4: unconditional edges by weight.
    let unconditional: Vec<&Edge> = edges.iter().filter(|e| e.condition().is_none()).collect();
    if !unconditional.is_empty() {
        return best_edge(unconditional);
    }

    // Step 5: catch-all so a non-failing stage can move past conditional
    // edges that all evaluated false.
    if outcome.status != StageStatus::Fail {
        return best_edge(edges.iter().collect());
    }

    None
}

/// Highest weight wins; ties break on the lexically smallest target id.
fn best_edge(mut edges: Vec<&Edge>) -> Option<&Edge> {
    edges.sort_by(|a, b| b.weight().cmp(&a.weight()).then_with(|| a.to.cmp(&b.to)));
    edges.first().copied()
}

/// Normalize an edge label for preferred-label matching: lowercase, trim, and
/// strip one accelerator prefix of the forms `[x] `, `x) `, or `x - `.
pub fn normalize_label(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    regex::Regex::new(r"^(?:\[[a-z0-9]\]|[a-z0-9]\)|[a-z0-9]\s*-)\s*")
        .unwrap()
        .replace(&lowered, "")
        .into_owned()
}
