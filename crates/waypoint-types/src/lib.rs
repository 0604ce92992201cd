//! Shared types for the Waypoint pipeline engine.
//!
//! Everything the other crates agree on lives here: the error taxonomy
//! ([`WaypointError`]), the run-scoped key-value store ([`Context`]), the
//! handler result type ([`Outcome`]), the on-disk progress snapshot
//! ([`Checkpoint`]), and duration-string parsing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type across the Waypoint crates.
#[derive(Debug, thiserror::Error)]
pub enum WaypointError {
    #[error("parse error at line {line}, col {col}: {message}")]
    Parse {
        line: usize,
        col: usize,
        message: String,
        snippet: Option<String>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no handler for node '{node}' (type={node_type:?}, shape={shape})")]
    NoHandler {
        node: String,
        shape: String,
        node_type: Option<String>,
    },

    #[error("handler failed on node '{node}': {message}")]
    Handler { node: String, message: String },

    #[error("goal gate '{node}' unsatisfied with no retry target")]
    GoalGateUnsatisfied { node: String },

    #[error("retries exhausted for node '{node}' after {attempts} attempts")]
    RetriesExhausted { node: String, attempts: usize },

    #[error("child pipeline failure: {0}")]
    ChildPipeline(String),

    #[error("command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, WaypointError>;

// ---------------------------------------------------------------------------
// StageStatus and Outcome
// ---------------------------------------------------------------------------

/// Status of a single handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

impl StageStatus {
    /// Lowercase name as used in edge conditions and status files.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::PartialSuccess => "partial_success",
            StageStatus::Retry => "retry",
            StageStatus::Fail => "fail",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageStatus::Success | StageStatus::PartialSuccess)
    }
}

/// The typed return value of a handler invocation. Consumed by the engine
/// right after the stage completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    pub preferred_label: Option<String>,
    pub suggested_next_ids: Vec<String>,
    pub context_updates: HashMap<String, serde_json::Value>,
    pub notes: String,
    pub failure_reason: Option<String>,
}

impl Outcome {
    fn with_status(status: StageStatus) -> Self {
        Self {
            status,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: None,
        }
    }

    pub fn success(notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            ..Self::with_status(StageStatus::Success)
        }
    }

    pub fn partial(notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            ..Self::with_status(StageStatus::PartialSuccess)
        }
    }

    pub fn retry(notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            ..Self::with_status(StageStatus::Retry)
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::with_status(StageStatus::Fail)
        }
    }

    pub fn skipped(notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            ..Self::with_status(StageStatus::Skipped)
        }
    }

    pub fn with_preferred_label(mut self, label: impl Into<String>) -> Self {
        self.preferred_label = Some(label.into());
        self
    }

    pub fn with_suggested_next(mut self, ids: Vec<String>) -> Self {
        self.suggested_next_ids = ids;
        self
    }

    pub fn with_update(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ContextInner {
    values: HashMap<String, serde_json::Value>,
    logs: Vec<String>,
}

/// Run-scoped key-value store shared by the engine and its handlers.
///
/// Cloning the handle shares the underlying state; use
/// [`clone_isolated`](Context::clone_isolated) when a parallel branch needs a
/// private copy. Every access goes through the inner lock, so readers always
/// observe a consistent snapshot.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<ContextInner>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().await.values.insert(key.into(), value);
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// String view of a value; non-string JSON is rendered via `to_string`.
    pub async fn get_string(&self, key: &str, default: &str) -> String {
        match self.inner.read().await.values.get(key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => default.to_owned(),
        }
    }

    pub async fn append_log(&self, entry: impl Into<String>) {
        self.inner.write().await.logs.push(entry.into());
    }

    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.values.clone()
    }

    pub async fn logs(&self) -> Vec<String> {
        self.inner.read().await.logs.clone()
    }

    /// Deep copy, fully detached from this context. Used for parallel branch
    /// isolation: writes on the copy are invisible to siblings.
    pub async fn clone_isolated(&self) -> Context {
        let guard = self.inner.read().await;
        Context {
            inner: Arc::new(tokio::sync::RwLock::new(guard.clone())),
        }
    }

    /// Merge `updates` into the store; keys absent from `updates` survive.
    pub async fn apply_updates(&self, updates: HashMap<String, serde_json::Value>) {
        self.inner.write().await.values.extend(updates);
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Serialized progress vector, rewritten after every completed stage.
///
/// The context snapshot is stored under the JSON key `context` to match the
/// wire format consumed by external tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: String,
    pub current_node: String,
    pub completed_nodes: Vec<String>,
    pub node_retries: HashMap<String, usize>,
    #[serde(rename = "context")]
    pub context_values: HashMap<String, serde_json::Value>,
    pub logs: Vec<String>,
}

// ---------------------------------------------------------------------------
// Duration parsing
// ---------------------------------------------------------------------------

/// Parse a duration attribute value: `250ms`, `900s`, `15m`, `2h`, `7d`, or a
/// bare number meaning seconds. Suffixes are case-sensitive.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    let (number, scale_ms) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1.0)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000.0)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000.0)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 3_600_000.0)
    } else if let Some(v) = s.strip_suffix('d') {
        (v, 86_400_000.0)
    } else {
        (s, 1_000.0)
    };
    let n: f64 = number.trim().parse().ok()?;
    if n < 0.0 {
        return None;
    }
    Some(Duration::from_millis((n * scale_ms) as u64))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
