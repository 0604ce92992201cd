//! Parallel fan-out (`component` shape) and fan-in (`tripleoctagon` shape).
//!
//! The fan-out resolves every outgoing edge as a branch, each against its own
//! deep-cloned context so sibling branches cannot observe one another. Branch
//! statuses may be driven through the `parallel.branch_outcomes` context
//! object (keyed by branch label or target id); unkeyed branches count as
//! successful. The result vector lands in `parallel.results` for the fan-in
//! node, which picks the first success.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use waypoint_types::{Context, Outcome, Result, StageStatus};

use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::{Graph, Node};
use crate::handler::NodeHandler;
use crate::handlers::stage_dir;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BranchResult {
    branch: String,
    target: String,
    status: StageStatus,
    notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinPolicy {
    WaitAll,
    FirstSuccess,
}

impl JoinPolicy {
    fn parse(raw: Option<String>) -> Self {
        match raw.as_deref().map(str::trim) {
            Some("first_success") => JoinPolicy::FirstSuccess,
            _ => JoinPolicy::WaitAll,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            JoinPolicy::WaitAll => "wait_all",
            JoinPolicy::FirstSuccess => "first_success",
        }
    }
}

fn parse_status(raw: &str) -> Option<StageStatus> {
    Some(match raw.trim() {
        "success" => StageStatus::Success,
        "partial_success" => StageStatus::PartialSuccess,
        "retry" => StageStatus::Retry,
        "fail" => StageStatus::Fail,
        "skipped" => StageStatus::Skipped,
        _ => return None,
    })
}

/// Resolve one branch against its isolated context copy.
async fn resolve_branch(branch: String, target: String, ctx: Context) -> BranchResult {
    let lookup = |value: Option<serde_json::Value>, key: &str| {
        value
            .as_ref()
            .and_then(|v| v.as_object())
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let outcomes = ctx.get("parallel.branch_outcomes").await;
    let status = lookup(outcomes.clone(), &branch)
        .or_else(|| lookup(outcomes, &target))
        .and_then(|s| parse_status(&s))
        .unwrap_or(StageStatus::Success);

    let notes_map = ctx.get("parallel.branch_notes").await;
    let notes = lookup(notes_map.clone(), &branch).or_else(|| lookup(notes_map, &target));

    BranchResult {
        branch,
        target,
        status,
        notes,
    }
}

pub struct ParallelHandler {
    emitter: EventEmitter,
}

impl ParallelHandler {
    pub fn new(emitter: EventEmitter) -> Self {
        Self { emitter }
    }
}

#[async_trait]
impl NodeHandler for ParallelHandler {
    fn handler_type(&self) -> &str {
        "parallel"
    }

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let branches: Vec<(String, String)> = graph
            .outgoing_edges(&node.id)
            .iter()
            .map(|e| (e.label().unwrap_or_else(|| e.to.clone()), e.to.clone()))
            .collect();
        if branches.is_empty() {
            return Ok(Outcome::fail(format!(
                "parallel node '{}' has no outgoing branches",
                node.id
            )));
        }

        let policy = JoinPolicy::parse(node.attr_str("join_policy"));
        self.emitter.emit(PipelineEvent::ParallelStarted {
            node_id: node.id.clone(),
            branch_count: branches.len(),
        });

        // Each branch gets a detached context copy; results are joined in
        // branch order so events stay deterministic.
        let mut tasks = Vec::with_capacity(branches.len());
        for (index, (branch, target)) in branches.iter().enumerate() {
            self.emitter.emit(PipelineEvent::ParallelBranchStarted {
                branch: branch.clone(),
                index,
            });
            let isolated = context.clone_isolated().await;
            tasks.push(tokio::spawn(resolve_branch(
                branch.clone(),
                target.clone(),
                isolated,
            )));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let result = match task.await {
                Ok(result) => result,
                Err(_) => BranchResult {
                    branch: branches[index].0.clone(),
                    target: branches[index].1.clone(),
                    status: StageStatus::Fail,
                    notes: Some("branch task panicked".into()),
                },
            };
            self.emitter.emit(PipelineEvent::ParallelBranchCompleted {
                branch: result.branch.clone(),
                index,
                success: result.status.is_success(),
            });
            results.push(result);
        }

        let success_count = results.iter().filter(|r| r.status.is_success()).count();
        let failure_count = results.len() - success_count;

        let (status, notes) = match policy {
            JoinPolicy::WaitAll => {
                if failure_count == 0 {
                    (
                        StageStatus::Success,
                        format!("all {} branches completed", results.len()),
                    )
                } else {
                    (
                        StageStatus::Fail,
                        format!("{failure_count} of {} branches failed", results.len()),
                    )
                }
            }
            JoinPolicy::FirstSuccess => match results.iter().find(|r| r.status.is_success()) {
                Some(first) => (
                    StageStatus::Success,
                    format!("first successful branch: {}", first.branch),
                ),
                None => (StageStatus::Fail, "no branch succeeded".to_string()),
            },
        };

        let results_json = serde_json::to_value(&results)?;
        let dir = stage_dir(logs_root, &node.id).await?;
        tokio::fs::write(
            dir.join("parallel_results.json"),
            serde_json::to_string_pretty(&results_json)?,
        )
        .await?;

        self.emitter.emit(PipelineEvent::ParallelCompleted {
            node_id: node.id.clone(),
            success_count,
            failure_count,
        });

        let mut outcome = match status {
            StageStatus::Fail => Outcome::fail(notes),
            _ => Outcome::success(notes),
        };
        outcome
            .context_updates
            .insert("parallel.results".into(), results_json);
        outcome.context_updates.insert(
            "parallel.join_policy".into(),
            serde_json::Value::String(policy.as_str().into()),
        );
        outcome
            .context_updates
            .insert("parallel.success_count".into(), serde_json::json!(success_count));
        outcome
            .context_updates
            .insert("parallel.failure_count".into(), serde_json::json!(failure_count));
        Ok(outcome)
    }
}

/// Fan-in: consume `parallel.results`, pick the first success (or the first
/// entry when nothing succeeded) and expose it as `fan_in.selected`.
pub struct FanInHandler;

#[async_trait]
impl NodeHandler for FanInHandler {
    fn handler_type(&self) -> &str {
        "parallel.fan_in"
    }

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        _graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let entries = match context.get("parallel.results").await {
            Some(serde_json::Value::Array(entries)) if !entries.is_empty() => entries,
            _ => {
                return Ok(Outcome::fail(format!(
                    "fan-in node '{}' found no parallel results to consume",
                    node.id
                )))
            }
        };

        let selected = entries
            .iter()
            .find(|e| {
                e.get("status")
                    .and_then(|s| s.as_str())
                    .and_then(parse_status)
                    .map(|s| s.is_success())
                    .unwrap_or(false)
            })
            .unwrap_or(&entries[0])
            .clone();

        let dir = stage_dir(logs_root, &node.id).await?;
        tokio::fs::write(
            dir.join("fan_in_result.json"),
            serde_json::to_string_pretty(&selected)?,
        )
        .await?;

        let branch = selected
            .get("branch")
            .and_then(|b| b.as_str())
            .unwrap_or_default()
            .to_string();

        let mut outcome = Outcome::success(format!("selected branch: {branch}"));
        outcome.context_updates.insert(
            "fan_in.selected".into(),
            serde_json::Value::String(branch),
        );
        outcome
            .context_updates
            .insert("fan_in.result".into(), selected);
        Ok(outcome)
    }
}
