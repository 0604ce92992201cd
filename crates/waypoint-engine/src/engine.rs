//! The traversal loop.
//!
//! One stage at a time: terminal check (with goal-gate enforcement), execute
//! with retry, record completion, apply context updates, checkpoint, select
//! the next edge, advance. Handler-internal failures become outcomes; the
//! engine itself only errors before the run starts (validation).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use waypoint_types::{Checkpoint, Context, Outcome, Result, StageStatus};

use crate::checkpoint::save_checkpoint;
use crate::events::{EventEmitter, PipelineEvent};
use crate::goal_gate::check_goal_gates;
use crate::graph::{Graph, Node};
use crate::handler::HandlerRegistry;
use crate::retry::RetryPolicy;
use crate::routing::select_edge;
use crate::validation::validate_or_raise;

/// Pipeline executor. Owns the handler registry, the event emitter, and the
/// run's logs root.
pub struct Engine {
    registry: Arc<HandlerRegistry>,
    emitter: EventEmitter,
    logs_root: PathBuf,
    backoff: RetryPolicy,
}

/// Everything a caller needs after a run: the final outcome plus the
/// traversal record.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: Outcome,
    pub completed_nodes: Vec<String>,
    pub node_outcomes: HashMap<String, Outcome>,
    pub context: HashMap<String, serde_json::Value>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.status.is_success()
    }
}

impl Engine {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        emitter: EventEmitter,
        logs_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            emitter,
            logs_root: logs_root.into(),
            backoff: RetryPolicy::default(),
        }
    }

    /// Engine with the built-in handler set (codergen in simulation mode).
    pub fn with_defaults(logs_root: impl Into<PathBuf>) -> Self {
        let emitter = EventEmitter::new();
        let registry = Arc::new(HandlerRegistry::with_defaults(&emitter));
        Self::new(registry, emitter, logs_root)
    }

    /// Override the backoff template (delays, factor, jitter). The per-node
    /// attempt count still comes from the graph.
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn logs_root(&self) -> &Path {
        &self.logs_root
    }

    pub async fn run(&self, graph: &Graph) -> Result<RunReport> {
        self.run_with_context(graph, Context::new()).await
    }

    pub async fn run_with_context(&self, graph: &Graph, context: Context) -> Result<RunReport> {
        // Validation gates everything: no events, no directories on failure.
        validate_or_raise(graph)?;
        let start_node = graph
            .start_node()
            .ok_or_else(|| waypoint_types::WaypointError::Validation("no start node".into()))?;

        let started = Instant::now();
        let run_id = self
            .logs_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());

        self.write_manifest(graph).await?;
        context
            .set("graph.goal", serde_json::Value::String(graph.goal()))
            .await;

        self.emitter.emit(PipelineEvent::PipelineStarted {
            name: graph.name.clone(),
            run_id,
        });

        let mut completed: Vec<String> = Vec::new();
        let mut outcomes: HashMap<String, Outcome> = HashMap::new();
        let mut node_retries: HashMap<String, usize> = HashMap::new();
        let mut stage_index: usize = 0;
        let mut current = start_node.id.clone();

        loop {
            let node = match graph.node(&current) {
                Some(node) => node,
                None => {
                    let outcome = Outcome::fail(format!("node '{current}' not found in graph"));
                    return Ok(self
                        .finish_failed(outcome, started, completed, outcomes, &context)
                        .await);
                }
            };

            if node.is_terminal() {
                let gate = check_goal_gates(graph, &completed, &outcomes);
                if !gate.satisfied {
                    match gate.retry_target {
                        Some(target) if graph.node(&target).is_some() => {
                            tracing::info!(
                                gate = ?gate.failed_node,
                                %target,
                                "goal gate unsatisfied, re-entering at retry target"
                            );
                            current = target;
                            continue;
                        }
                        Some(target) => {
                            let outcome =
                                Outcome::fail(format!("retry target '{target}' not found"));
                            return Ok(self
                                .finish_failed(outcome, started, completed, outcomes, &context)
                                .await);
                        }
                        None => {
                            let outcome =
                                Outcome::fail("Goal gate unsatisfied and no retry target");
                            return Ok(self
                                .finish_failed(outcome, started, completed, outcomes, &context)
                                .await);
                        }
                    }
                }

                // Terminal stage runs its handler (a no-op for plain exits)
                // and is recorded like any other stage.
                let outcome = self
                    .execute_stage(node, &context, graph, &mut node_retries, stage_index)
                    .await;
                stage_index += 1;
                completed.push(node.id.clone());
                outcomes.insert(node.id.clone(), outcome.clone());
                self.write_status(node, &outcome).await?;
                self.apply_outcome(&context, &outcome).await;
                self.checkpoint(&context, &node.id, &completed, &node_retries)
                    .await?;

                if outcome.status == StageStatus::Fail {
                    let reason = outcome
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "terminal stage failed".to_string());
                    return Ok(self
                        .finish_failed(Outcome::fail(reason), started, completed, outcomes, &context)
                        .await);
                }
                break;
            }

            let outcome = self
                .execute_stage(node, &context, graph, &mut node_retries, stage_index)
                .await;
            stage_index += 1;

            completed.push(node.id.clone());
            outcomes.insert(node.id.clone(), outcome.clone());
            self.write_status(node, &outcome).await?;
            self.apply_outcome(&context, &outcome).await;
            self.checkpoint(&context, &node.id, &completed, &node_retries)
                .await?;

            let values = context.snapshot().await;
            match select_edge(graph, &node.id, &outcome, &values) {
                Some(edge) => {
                    tracing::debug!(from = %node.id, to = %edge.to, "edge selected");
                    current = edge.to.clone();
                }
                None => {
                    if outcome.status == StageStatus::Fail {
                        let outcome = Outcome::fail("Stage failed with no outgoing fail edge");
                        return Ok(self
                            .finish_failed(outcome, started, completed, outcomes, &context)
                            .await);
                    }
                    break;
                }
            }
        }

        self.emitter.emit(PipelineEvent::PipelineCompleted {
            duration_ms: started.elapsed().as_millis() as u64,
            stage_count: completed.len(),
        });

        Ok(RunReport {
            outcome: Outcome::success("Pipeline completed successfully"),
            completed_nodes: completed,
            node_outcomes: outcomes,
            context: context.snapshot().await,
        })
    }

    /// Run one node through its retry budget, translating handler errors into
    /// outcomes. Emits the Stage* event family.
    async fn execute_stage(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        node_retries: &mut HashMap<String, usize>,
        stage_index: usize,
    ) -> Outcome {
        let stage_started = Instant::now();

        let handler = match self.registry.resolve(node) {
            Ok(handler) => handler,
            Err(e) => {
                self.emitter.emit(PipelineEvent::StageStarted {
                    node_id: node.id.clone(),
                    handler: "unresolved".into(),
                    index: stage_index,
                });
                self.emitter.emit(PipelineEvent::StageFailed {
                    node_id: node.id.clone(),
                    index: stage_index,
                    error: e.to_string(),
                });
                return Outcome::fail(e.to_string());
            }
        };

        self.emitter.emit(PipelineEvent::StageStarted {
            node_id: node.id.clone(),
            handler: handler.handler_type().to_string(),
            index: stage_index,
        });

        let policy = RetryPolicy {
            max_attempts: crate::retry::attempt_budget(graph, node),
            ..self.backoff.clone()
        };

        for attempt in 1..=policy.max_attempts {
            let result = handler.execute(node, context, graph, &self.logs_root).await;

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Handler errors are transient until the budget runs out.
                    if attempt < policy.max_attempts {
                        self.retry_pause(node, stage_index, attempt, &policy).await;
                        continue;
                    }
                    let error = format!("Exception: {e}");
                    self.emitter.emit(PipelineEvent::StageFailed {
                        node_id: node.id.clone(),
                        index: stage_index,
                        error: error.clone(),
                    });
                    return Outcome::fail(error);
                }
            };

            match outcome.status {
                StageStatus::Success | StageStatus::PartialSuccess | StageStatus::Skipped => {
                    node_retries.remove(&node.id);
                    self.emitter.emit(PipelineEvent::StageCompleted {
                        node_id: node.id.clone(),
                        index: stage_index,
                        duration_ms: stage_started.elapsed().as_millis() as u64,
                    });
                    return outcome;
                }
                StageStatus::Retry => {
                    if attempt < policy.max_attempts {
                        *node_retries.entry(node.id.clone()).or_insert(0) += 1;
                        self.retry_pause(node, stage_index, attempt, &policy).await;
                        continue;
                    }
                    if node.allow_partial() {
                        self.emitter.emit(PipelineEvent::StageCompleted {
                            node_id: node.id.clone(),
                            index: stage_index,
                            duration_ms: stage_started.elapsed().as_millis() as u64,
                        });
                        return Outcome::partial("retries exhausted, partial accepted");
                    }
                    self.emitter.emit(PipelineEvent::StageFailed {
                        node_id: node.id.clone(),
                        index: stage_index,
                        error: "max retries exceeded".into(),
                    });
                    return Outcome::fail("max retries exceeded");
                }
                StageStatus::Fail => {
                    self.emitter.emit(PipelineEvent::StageFailed {
                        node_id: node.id.clone(),
                        index: stage_index,
                        error: outcome
                            .failure_reason
                            .clone()
                            .unwrap_or_else(|| "unknown failure".into()),
                    });
                    return outcome;
                }
            }
        }

        // Unreachable: every branch above returns or continues within budget.
        Outcome::fail("max retries exceeded")
    }

    async fn retry_pause(
        &self,
        node: &Node,
        stage_index: usize,
        attempt: usize,
        policy: &RetryPolicy,
    ) {
        let delay = policy.delay_for_attempt(attempt);
        self.emitter.emit(PipelineEvent::StageRetrying {
            node_id: node.id.clone(),
            index: stage_index,
            attempt: attempt + 1,
            delay_ms: delay.as_millis() as u64,
        });
        tokio::time::sleep(delay).await;
    }

    async fn apply_outcome(&self, context: &Context, outcome: &Outcome) {
        context.apply_updates(outcome.context_updates.clone()).await;
        context
            .set(
                "outcome",
                serde_json::Value::String(outcome.status.as_str().to_string()),
            )
            .await;
        if let Some(label) = &outcome.preferred_label {
            if !label.is_empty() {
                context
                    .set("preferred_label", serde_json::Value::String(label.clone()))
                    .await;
            }
        }
    }

    async fn checkpoint(
        &self,
        context: &Context,
        node_id: &str,
        completed: &[String],
        node_retries: &HashMap<String, usize>,
    ) -> Result<()> {
        let checkpoint = Checkpoint {
            timestamp: chrono::Utc::now().to_rfc3339(),
            current_node: node_id.to_string(),
            completed_nodes: completed.to_vec(),
            node_retries: node_retries.clone(),
            context_values: context.snapshot().await,
            logs: context.logs().await,
        };
        save_checkpoint(&checkpoint, &self.logs_root).await?;
        self.emitter.emit(PipelineEvent::CheckpointSaved {
            node_id: node_id.to_string(),
        });
        Ok(())
    }

    async fn write_manifest(&self, graph: &Graph) -> Result<()> {
        tokio::fs::create_dir_all(&self.logs_root).await?;
        let manifest = serde_json::json!({
            "name": graph.name,
            "goal": graph.goal(),
            "start_time": chrono::Utc::now().to_rfc3339(),
        });
        tokio::fs::write(
            self.logs_root.join("manifest.json"),
            serde_json::to_string_pretty(&manifest)?,
        )
        .await?;
        Ok(())
    }

    async fn write_status(&self, node: &Node, outcome: &Outcome) -> Result<()> {
        let dir = self.logs_root.join(&node.id);
        tokio::fs::create_dir_all(&dir).await?;
        let status = serde_json::json!({
            "outcome": outcome.status.as_str(),
            "preferred_next_label": outcome.preferred_label,
            "suggested_next_ids": outcome.suggested_next_ids,
            "notes": outcome.notes,
            "failure_reason": outcome.failure_reason,
        });
        tokio::fs::write(dir.join("status.json"), serde_json::to_string_pretty(&status)?).await?;
        Ok(())
    }

    async fn finish_failed(
        &self,
        outcome: Outcome,
        started: Instant,
        completed: Vec<String>,
        outcomes: HashMap<String, Outcome>,
        context: &Context,
    ) -> RunReport {
        self.emitter.emit(PipelineEvent::PipelineFailed {
            error: outcome
                .failure_reason
                .clone()
                .unwrap_or_else(|| "unknown error".into()),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        RunReport {
            outcome,
            completed_nodes: completed,
            node_outcomes: outcomes,
            context: context.snapshot().await,
        }
    }
}
