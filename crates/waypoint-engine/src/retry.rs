//! Per-node retry policy: exponential backoff, capped and jittered.

use std::time::Duration;

use rand::Rng;

use crate::graph::{Graph, Node};

/// Delay schedule for one node's attempt sequence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

/// Total attempts for a node: `1 + max_retries`, where the retry count comes
/// from the node attribute or falls back to the graph default.
pub fn attempt_budget(graph: &Graph, node: &Node) -> usize {
    node.max_retries().unwrap_or_else(|| graph.default_max_retry()) + 1
}

impl RetryPolicy {
    /// Derive the policy for a node with the default delay schedule.
    pub fn for_node(graph: &Graph, node: &Node) -> Self {
        Self {
            max_attempts: attempt_budget(graph, node),
            ..Self::default()
        }
    }

    /// Delay before the next try, given the 1-indexed attempt that just ran.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        // The cap makes large exponents equivalent; clamp to keep powi sane.
        let exp = attempt.saturating_sub(1).min(1_000) as i32;
        let mut ms = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exp);
        ms = ms.min(self.max_delay.as_millis() as f64);
        if self.jitter {
            ms *= rand::thread_rng().gen_range(0.5..1.5);
        }
        Duration::from_millis(ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn exponential_growth_without_jitter() {
        let policy = fixed(10);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1600));
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = fixed(10);
        // 200ms * 2^19 is far past the 60s cap.
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let d = policy.delay_for_attempt(1).as_millis();
            assert!((100..300).contains(&d), "jittered delay out of band: {d}ms");
        }
    }

    #[test]
    fn node_budget_overrides_graph_default() {
        let g = crate::graph::Graph::from_ast(
            waypoint_dot::parse(
                r#"digraph G {
                    default_max_retry = 7
                    tuned [max_retries=2]
                    plain [label="p"]
                }"#,
            )
            .unwrap(),
        );
        let tuned = RetryPolicy::for_node(&g, g.node("tuned").unwrap());
        assert_eq!(tuned.max_attempts, 3);
        let plain = RetryPolicy::for_node(&g, g.node("plain").unwrap());
        assert_eq!(plain.max_attempts, 8);
    }

    #[test]
    fn graph_default_defaults_to_fifty() {
        let g = crate::graph::Graph::from_ast(
            waypoint_dot::parse(r#"digraph G { n [label="x"] }"#).unwrap(),
        );
        let policy = RetryPolicy::for_node(&g, g.node("n").unwrap());
        assert_eq!(policy.max_attempts, 51);
    }
}
