//! Static graph validation.
//!
//! A fixed rule set runs once over the graph and collects diagnostics. The
//! engine refuses to start while any Error-severity diagnostic is present;
//! warnings are advisory.

use std::collections::{HashSet, VecDeque};

use waypoint_types::{Result, WaypointError};

use crate::graph::{Graph, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
}

impl Diagnostic {
    fn error(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Error,
            message: message.into(),
            node_id: None,
            edge: None,
        }
    }

    fn warning(rule: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, message)
        }
    }

    fn on_node(mut self, id: &str) -> Self {
        self.node_id = Some(id.to_string());
        self
    }

    fn on_edge(mut self, from: &str, to: &str) -> Self {
        self.edge = Some((from.to_string(), to.to_string()));
        self
    }
}

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic>;
}

fn start_nodes(graph: &Graph) -> Vec<&Node> {
    graph.nodes().filter(|n| n.is_start()).collect()
}

// --- rules -----------------------------------------------------------------

struct SingleStartRule;
impl LintRule for SingleStartRule {
    fn name(&self) -> &str {
        "single_start"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let starts = start_nodes(graph);
        match starts.len() {
            0 => vec![Diagnostic::error(
                self.name(),
                "pipeline has no start node (shape=Mdiamond or id 'start')",
            )],
            1 => vec![],
            n => {
                let mut ids: Vec<&str> = starts.iter().map(|n| n.id.as_str()).collect();
                ids.sort_unstable();
                vec![Diagnostic::error(
                    self.name(),
                    format!("pipeline has {n} start nodes ({}), expected exactly one", ids.join(", ")),
                )]
            }
        }
    }
}

struct HasTerminalRule;
impl LintRule for HasTerminalRule {
    fn name(&self) -> &str {
        "has_terminal"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        if graph.nodes().any(|n| n.is_terminal()) {
            vec![]
        } else {
            vec![Diagnostic::error(
                self.name(),
                "pipeline has no terminal node (shape=Msquare or id exit/end/done)",
            )]
        }
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str {
        "reachability"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let Some(start) = graph.start_node() else {
            return vec![]; // single_start reports this
        };

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(&start.id);
        queue.push_back(&start.id);
        while let Some(id) = queue.pop_front() {
            for edge in graph.outgoing_edges(id) {
                if seen.insert(&edge.to) {
                    queue.push_back(&edge.to);
                }
            }
        }

        let mut unreachable: Vec<&str> = graph
            .nodes()
            .map(|n| n.id.as_str())
            .filter(|id| !seen.contains(id))
            .collect();
        unreachable.sort_unstable();
        unreachable
            .into_iter()
            .map(|id| {
                Diagnostic::error(self.name(), format!("node '{id}' is not reachable from start"))
                    .on_node(id)
            })
            .collect()
    }
}

struct EdgeEndpointsRule;
impl LintRule for EdgeEndpointsRule {
    fn name(&self) -> &str {
        "edge_endpoints"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for edge in graph.edges() {
            if graph.node(&edge.from).is_none() {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!("edge {} -> {} has unknown source '{}'", edge.from, edge.to, edge.from),
                    )
                    .on_edge(&edge.from, &edge.to),
                );
            }
            if graph.node(&edge.to).is_none() {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!("edge {} -> {} has unknown target '{}'", edge.from, edge.to, edge.to),
                    )
                    .on_edge(&edge.from, &edge.to),
                );
            }
        }
        diags
    }
}

struct StartHasNoIncomingRule;
impl LintRule for StartHasNoIncomingRule {
    fn name(&self) -> &str {
        "start_no_incoming"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let Some(start) = graph.start_node() else {
            return vec![];
        };
        let incoming = graph.incoming_edges(&start.id).count();
        if incoming > 0 {
            vec![Diagnostic::error(
                self.name(),
                format!("start node '{}' has {incoming} incoming edge(s)", start.id),
            )
            .on_node(&start.id)]
        } else {
            vec![]
        }
    }
}

struct TerminalHasNoOutgoingRule;
impl LintRule for TerminalHasNoOutgoingRule {
    fn name(&self) -> &str {
        "terminal_no_outgoing"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .nodes()
            .filter(|n| n.is_terminal())
            .filter(|n| !graph.outgoing_edges(&n.id).is_empty())
            .map(|n| {
                Diagnostic::error(
                    self.name(),
                    format!("terminal node '{}' has outgoing edges", n.id),
                )
                .on_node(&n.id)
            })
            .collect()
    }
}

struct PromptlessLlmNodeRule;
impl LintRule for PromptlessLlmNodeRule {
    fn name(&self) -> &str {
        "promptless_llm_node"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .nodes()
            .filter(|n| n.shape() == "box" && n.node_type().is_none())
            .filter(|n| !n.is_start() && !n.is_terminal())
            .filter(|n| {
                let label = n.label();
                n.prompt().is_none() && (label.is_empty() || label == n.id)
            })
            .map(|n| {
                Diagnostic::warning(
                    self.name(),
                    format!("LLM node '{}' has neither prompt nor label", n.id),
                )
                .on_node(&n.id)
            })
            .collect()
    }
}

/// Flags nodes whose outgoing edges are all conditional and whose conditions
/// can never hold for a successful outcome. The step-5 catch-all will still
/// route such nodes, which is usually not what the author meant.
struct ConditionalFallthroughRule;
impl ConditionalFallthroughRule {
    fn excludes_success(condition: &str) -> bool {
        condition.split("&&").map(str::trim).any(|clause| {
            if let Some((key, value)) = clause.split_once("!=") {
                return key.trim() == "outcome" && value.trim() == "success";
            }
            if let Some((key, value)) = clause.split_once('=') {
                return key.trim() == "outcome" && value.trim() != "success";
            }
            false
        })
    }
}
impl LintRule for ConditionalFallthroughRule {
    fn name(&self) -> &str {
        "conditional_fallthrough"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .nodes()
            .filter(|n| !n.is_terminal())
            .filter_map(|n| {
                let edges = graph.outgoing_edges(&n.id);
                if edges.is_empty() {
                    return None;
                }
                let all_exclusive = edges.iter().all(|e| {
                    e.condition()
                        .map(|c| Self::excludes_success(&c))
                        .unwrap_or(false)
                });
                all_exclusive.then(|| {
                    Diagnostic::warning(
                        self.name(),
                        format!(
                            "node '{}' has only conditional edges, none matching outcome=success; \
                             a successful stage will take the catch-all edge",
                            n.id
                        ),
                    )
                    .on_node(&n.id)
                })
            })
            .collect()
    }
}

struct RetryTargetExistsRule;
impl LintRule for RetryTargetExistsRule {
    fn name(&self) -> &str {
        "retry_target_exists"
    }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut check = |node_id: &str, key: &str, target: Option<String>| {
            if let Some(target) = target {
                if graph.node(&target).is_none() {
                    diags.push(
                        Diagnostic::warning(
                            self.name(),
                            format!("node '{node_id}' {key} '{target}' does not exist"),
                        )
                        .on_node(node_id),
                    );
                }
            }
        };
        for node in graph.nodes() {
            check(&node.id, "retry_target", node.retry_target());
            check(&node.id, "fallback_retry_target", node.fallback_retry_target());
        }
        diags
    }
}

// --- entry points ----------------------------------------------------------

fn rule_set() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(SingleStartRule),
        Box::new(HasTerminalRule),
        Box::new(ReachabilityRule),
        Box::new(EdgeEndpointsRule),
        Box::new(StartHasNoIncomingRule),
        Box::new(TerminalHasNoOutgoingRule),
        Box::new(PromptlessLlmNodeRule),
        Box::new(ConditionalFallthroughRule),
        Box::new(RetryTargetExistsRule),
    ]
}

/// Run every rule and collect diagnostics.
pub fn validate(graph: &Graph) -> Vec<Diagnostic> {
    rule_set().iter().flat_map(|r| r.apply(graph)).collect()
}

/// Run every rule; fail when any Error-severity diagnostic is present.
pub fn validate_or_raise(graph: &Graph) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph);
    let errors: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if errors.is_empty() {
        Ok(diagnostics)
    } else {
        let joined = errors
            .iter()
            .map(|d| format!("{}: {}", d.rule, d.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(WaypointError::Validation(joined))
    }
}
