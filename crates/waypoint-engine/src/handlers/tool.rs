//! Tool handler: shell-command work units (`parallelogram` shape).
//!
//! The node's prompt (or label) is the command line, run through `sh -c`.
//! Stdout, stderr, and the command itself are persisted under the stage
//! directory. Exit 0 maps to SUCCESS, anything else to FAIL; a configured
//! timeout also maps to FAIL rather than an engine error.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;

use waypoint_types::{Context, Outcome, Result, WaypointError};

use crate::graph::{Graph, Node};
use crate::handler::NodeHandler;
use crate::handlers::{stage_dir, truncate_chars};

const NOTES_LIMIT: usize = 4096;

pub struct ToolHandler;

#[async_trait]
impl NodeHandler for ToolHandler {
    fn handler_type(&self) -> &str {
        "tool"
    }

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let raw = node.prompt().unwrap_or_else(|| node.label());
        let command = raw.replace("$goal", &graph.goal());
        if command.trim().is_empty() {
            return Ok(Outcome::fail(format!(
                "tool node '{}' has no command to execute",
                node.id
            )));
        }

        let dir = stage_dir(logs_root, &node.id).await?;
        tokio::fs::write(dir.join("command.txt"), &command).await?;

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        if let Some(workdir) = context.get("workdir").await.and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            _ => None,
        }) {
            cmd.current_dir(workdir);
        }

        tracing::info!(node = %node.id, %command, "running tool command");

        let child = cmd.spawn().map_err(|e| WaypointError::Handler {
            node: node.id.clone(),
            message: format!("failed to spawn command: {e}"),
        })?;

        let output = match node.timeout() {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    let reason = format!("command timed out after {}ms", limit.as_millis());
                    tokio::fs::write(dir.join("stderr.txt"), &reason).await?;
                    return Ok(Outcome::fail(reason));
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| WaypointError::Handler {
            node: node.id.clone(),
            message: format!("command wait failed: {e}"),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        tokio::fs::write(dir.join("stdout.txt"), &stdout).await?;
        tokio::fs::write(dir.join("stderr.txt"), &stderr).await?;

        let combined = if stderr.is_empty() {
            stdout.clone()
        } else {
            format!("{stdout}\n--- stderr ---\n{stderr}")
        };

        let mut outcome = if output.status.success() {
            Outcome::success(truncate_chars(&combined, NOTES_LIMIT))
        } else {
            Outcome::fail(format!("Command exited with code {exit_code}"))
        };
        outcome
            .context_updates
            .insert("last_command".into(), serde_json::Value::String(command));
        outcome.context_updates.insert(
            format!("{}.exit_code", node.id),
            serde_json::json!(exit_code),
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{build, node_of};
    use waypoint_types::StageStatus;

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(r#"digraph G { run [shape="parallelogram", prompt="echo hello"] }"#);
        let node = node_of(&graph, "run");

        let outcome = ToolHandler
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        assert!(outcome.notes.contains("hello"));
        let stdout = std::fs::read_to_string(dir.path().join("run/stdout.txt")).unwrap();
        assert!(stdout.contains("hello"));
        let command = std::fs::read_to_string(dir.path().join("run/command.txt")).unwrap();
        assert_eq!(command, "echo hello");
        assert_eq!(
            outcome.context_updates.get("run.exit_code"),
            Some(&serde_json::json!(0))
        );
    }

    #[tokio::test]
    async fn goal_expansion_applies_to_command() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(
            r#"digraph G {
                goal = "release"
                announce [shape="parallelogram", prompt="echo $goal"]
            }"#,
        );
        let node = node_of(&graph, "announce");

        let outcome = ToolHandler
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();
        assert!(outcome.notes.contains("release"));
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(r#"digraph G { bad [shape="parallelogram", prompt="exit 3"] }"#);
        let node = node_of(&graph, "bad");

        let outcome = ToolHandler
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(
            outcome.failure_reason.as_deref(),
            Some("Command exited with code 3")
        );
    }

    #[tokio::test]
    async fn stderr_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let graph =
            build(r#"digraph G { noisy [shape="parallelogram", prompt="echo oops >&2"] }"#);
        let node = node_of(&graph, "noisy");

        let outcome = ToolHandler
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        let stderr = std::fs::read_to_string(dir.path().join("noisy/stderr.txt")).unwrap();
        assert!(stderr.contains("oops"));
        assert!(outcome.notes.contains("--- stderr ---"));
    }

    #[tokio::test]
    async fn timeout_maps_to_fail_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(
            r#"digraph G { slow [shape="parallelogram", prompt="sleep 5", timeout=100ms] }"#,
        );
        let node = node_of(&graph, "slow");

        let outcome = ToolHandler
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Fail);
        assert!(outcome.failure_reason.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn empty_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let graph = build(r#"digraph G { hollow [shape="parallelogram", label=""] }"#);
        let node = node_of(&graph, "hollow");

        let outcome = ToolHandler
            .execute(&node, &Context::new(), &graph, dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        assert!(outcome.failure_reason.unwrap().contains("no command"));
    }

    #[tokio::test]
    async fn workdir_from_context_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        std::fs::write(workdir.path().join("marker.txt"), "here").unwrap();

        let graph = build(r#"digraph G { look [shape="parallelogram", prompt="cat marker.txt"] }"#);
        let node = node_of(&graph, "look");
        let ctx = Context::new();
        ctx.set(
            "workdir",
            serde_json::Value::String(workdir.path().to_string_lossy().into_owned()),
        )
        .await;

        let outcome = ToolHandler
            .execute(&node, &ctx, &graph, dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert!(outcome.notes.contains("here"));
    }
}
