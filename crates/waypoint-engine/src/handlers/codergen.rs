//! Codergen handler: LLM-backed work units (`box` shape).
//!
//! The handler owns the prompt lifecycle — build, expand, persist — and
//! delegates the actual model call to a [`CodergenBackend`]. Without a
//! backend it runs in simulation mode, which keeps pipelines executable in
//! tests and dry runs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use waypoint_types::{Context, Outcome, Result};

use crate::graph::{Graph, Node};
use crate::handler::NodeHandler;
use crate::handlers::{stage_dir, truncate_chars};

/// What a backend invocation produced.
pub enum BackendReply {
    /// The backend drove the full outcome itself (status, routing hints).
    Outcome(Outcome),
    /// Plain response text; the handler wraps it in a SUCCESS outcome.
    Text(String),
}

#[async_trait]
pub trait CodergenBackend: Send + Sync {
    async fn run(&self, node: &Node, prompt: &str, context: &Context) -> Result<BackendReply>;
}

pub struct CodergenHandler {
    backend: Option<Arc<dyn CodergenBackend>>,
}

impl CodergenHandler {
    /// No backend: responses are simulated.
    pub fn simulation() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: Arc<dyn CodergenBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }
}

#[async_trait]
impl NodeHandler for CodergenHandler {
    fn handler_type(&self) -> &str {
        "codergen"
    }

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let raw = node.prompt().unwrap_or_else(|| node.label());
        let prompt = raw.replace("$goal", &graph.goal());

        let dir = stage_dir(logs_root, &node.id).await?;
        tokio::fs::write(dir.join("prompt.md"), &prompt).await?;

        let response = match &self.backend {
            Some(backend) => match backend.run(node, &prompt, context).await {
                Ok(BackendReply::Outcome(outcome)) => return Ok(outcome),
                Ok(BackendReply::Text(text)) => text,
                Err(e) => return Ok(Outcome::fail(e.to_string())),
            },
            None => {
                tracing::debug!(node = %node.id, "codergen running in simulation mode");
                format!("[simulated] response for stage: {}", node.id)
            }
        };

        tokio::fs::write(dir.join("response.md"), &response).await?;

        Ok(Outcome::success(format!("stage completed: {}", node.id))
            .with_update("last_stage", serde_json::Value::String(node.id.clone()))
            .with_update(
                "last_response",
                serde_json::Value::String(truncate_chars(&response, 200)),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{build, node_of};
    use waypoint_types::{StageStatus, WaypointError};

    struct EchoBackend;

    #[async_trait]
    impl CodergenBackend for EchoBackend {
        async fn run(&self, _node: &Node, prompt: &str, _ctx: &Context) -> Result<BackendReply> {
            Ok(BackendReply::Text(format!("echo: {prompt}")))
        }
    }

    struct OutcomeBackend;

    #[async_trait]
    impl CodergenBackend for OutcomeBackend {
        async fn run(&self, _node: &Node, _prompt: &str, _ctx: &Context) -> Result<BackendReply> {
            Ok(BackendReply::Outcome(
                Outcome::retry("needs another pass").with_preferred_label("revise"),
            ))
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl CodergenBackend for BrokenBackend {
        async fn run(&self, _node: &Node, _prompt: &str, _ctx: &Context) -> Result<BackendReply> {
            Err(WaypointError::Other("model unavailable".into()))
        }
    }

    #[tokio::test]
    async fn simulation_writes_prompt_and_response() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(
            r#"digraph G {
                goal = "ship"
                plan [prompt="plan $goal carefully"]
            }"#,
        );
        let node = node_of(&graph, "plan");

        let outcome = CodergenHandler::simulation()
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        let prompt = std::fs::read_to_string(dir.path().join("plan/prompt.md")).unwrap();
        assert_eq!(prompt, "plan ship carefully");
        assert!(!prompt.contains("$goal"));
        let response = std::fs::read_to_string(dir.path().join("plan/response.md")).unwrap();
        assert!(response.contains("plan"));
        assert_eq!(
            outcome.context_updates.get("last_stage"),
            Some(&serde_json::json!("plan"))
        );
    }

    #[tokio::test]
    async fn label_is_prompt_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(r#"digraph G { step [label="Summarize findings"] }"#);
        let node = node_of(&graph, "step");

        CodergenHandler::simulation()
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        let prompt = std::fs::read_to_string(dir.path().join("step/prompt.md")).unwrap();
        assert_eq!(prompt, "Summarize findings");
    }

    #[tokio::test]
    async fn text_reply_becomes_success() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(r#"digraph G { step [prompt="do it"] }"#);
        let node = node_of(&graph, "step");

        let outcome = CodergenHandler::with_backend(Arc::new(EchoBackend))
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        let response = std::fs::read_to_string(dir.path().join("step/response.md")).unwrap();
        assert_eq!(response, "echo: do it");
        assert_eq!(
            outcome.context_updates.get("last_response"),
            Some(&serde_json::json!("echo: do it"))
        );
    }

    #[tokio::test]
    async fn outcome_reply_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(r#"digraph G { step [prompt="do it"] }"#);
        let node = node_of(&graph, "step");

        let outcome = CodergenHandler::with_backend(Arc::new(OutcomeBackend))
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Retry);
        assert_eq!(outcome.preferred_label.as_deref(), Some("revise"));
        // The backend owned the outcome; no response.md is written.
        assert!(!dir.path().join("step/response.md").exists());
    }

    #[tokio::test]
    async fn backend_error_maps_to_fail_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(r#"digraph G { step [prompt="do it"] }"#);
        let node = node_of(&graph, "step");

        let outcome = CodergenHandler::with_backend(Arc::new(BrokenBackend))
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Fail);
        assert!(outcome.failure_reason.unwrap().contains("model unavailable"));
    }

    #[tokio::test]
    async fn long_responses_truncate_in_context_only() {
        struct LongBackend;
        #[async_trait]
        impl CodergenBackend for LongBackend {
            async fn run(&self, _n: &Node, _p: &str, _c: &Context) -> Result<BackendReply> {
                Ok(BackendReply::Text("x".repeat(500)))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let graph = build(r#"digraph G { step [prompt="p"] }"#);
        let node = node_of(&graph, "step");

        let outcome = CodergenHandler::with_backend(Arc::new(LongBackend))
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        let stored = outcome.context_updates["last_response"].as_str().unwrap().to_string();
        assert!(stored.len() < 500);
        let on_disk = std::fs::read_to_string(dir.path().join("step/response.md")).unwrap();
        assert_eq!(on_disk.len(), 500);
    }
}
