//! Lifecycle events and the observer broadcast.
//!
//! The engine and handlers emit [`PipelineEvent`]s through an
//! [`EventEmitter`]. Observers run synchronously in registration order; a
//! panicking observer is logged and isolated so the others still see every
//! event.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Typed lifecycle events, in strict pipeline-progress order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStarted { name: String, run_id: String },
    PipelineCompleted { duration_ms: u64, stage_count: usize },
    PipelineFailed { error: String, duration_ms: u64 },
    StageStarted { node_id: String, handler: String, index: usize },
    StageCompleted { node_id: String, index: usize, duration_ms: u64 },
    StageFailed { node_id: String, index: usize, error: String },
    StageRetrying { node_id: String, index: usize, attempt: usize, delay_ms: u64 },
    ParallelStarted { node_id: String, branch_count: usize },
    ParallelBranchStarted { branch: String, index: usize },
    ParallelBranchCompleted { branch: String, index: usize, success: bool },
    ParallelCompleted { node_id: String, success_count: usize, failure_count: usize },
    InterviewStarted { node_id: String, question: String },
    InterviewCompleted { node_id: String, answer: String },
    InterviewTimeout { node_id: String },
    CheckpointSaved { node_id: String },
}

impl PipelineEvent {
    /// Stable kind tag, matching the serialized `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::PipelineStarted { .. } => "pipeline_started",
            PipelineEvent::PipelineCompleted { .. } => "pipeline_completed",
            PipelineEvent::PipelineFailed { .. } => "pipeline_failed",
            PipelineEvent::StageStarted { .. } => "stage_started",
            PipelineEvent::StageCompleted { .. } => "stage_completed",
            PipelineEvent::StageFailed { .. } => "stage_failed",
            PipelineEvent::StageRetrying { .. } => "stage_retrying",
            PipelineEvent::ParallelStarted { .. } => "parallel_started",
            PipelineEvent::ParallelBranchStarted { .. } => "parallel_branch_started",
            PipelineEvent::ParallelBranchCompleted { .. } => "parallel_branch_completed",
            PipelineEvent::ParallelCompleted { .. } => "parallel_completed",
            PipelineEvent::InterviewStarted { .. } => "interview_started",
            PipelineEvent::InterviewCompleted { .. } => "interview_completed",
            PipelineEvent::InterviewTimeout { .. } => "interview_timeout",
            PipelineEvent::CheckpointSaved { .. } => "checkpoint_saved",
        }
    }
}

/// Receives every emitted event, in emit order.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) {
        self(event)
    }
}

/// Multi-observer broadcast. Cloning shares the observer list, so handlers
/// can hold the same emitter as the engine.
#[derive(Clone, Default)]
pub struct EventEmitter {
    observers: Arc<RwLock<Vec<Arc<dyn EventObserver>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: impl EventObserver + 'static) {
        self.register_arc(Arc::new(observer));
    }

    pub fn register_arc(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().expect("observer list poisoned").push(observer);
    }

    /// Deliver `event` to every observer. Observer panics are swallowed with
    /// a log line so one faulty observer cannot starve the rest.
    pub fn emit(&self, event: PipelineEvent) {
        let observers = self.observers.read().expect("observer list poisoned").clone();
        for observer in observers {
            let result =
                std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
            if result.is_err() {
                tracing::warn!(kind = event.kind(), "event observer panicked");
            }
        }
    }
}

/// Observer that forwards events into a tokio channel, for consumers that
/// drain them elsewhere (the HTTP façade's SSE stream, tests).
pub struct ChannelObserver {
    sender: tokio::sync::mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventObserver for ChannelObserver {
    fn on_event(&self, event: &PipelineEvent) {
        // Receiver gone means nobody is listening anymore; drop silently.
        let _ = self.sender.send(event.clone());
    }
}
