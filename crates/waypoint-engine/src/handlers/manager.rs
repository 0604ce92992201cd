//! Manager loop (`house` shape): supervise a child pipeline process.
//!
//! The child runs as a separate process of the same engine on its own
//! dotfile, with its own logs directory. Supervision is cycle-based: observe
//! the process and its checkpoint, optionally record a steering note, stop
//! when the child finishes or the stop condition holds, sleep between polls.
//! Process access goes through the [`ChildProcess`] trait so tests can
//! substitute a scripted fake.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use waypoint_types::{Context, Outcome, Result, WaypointError};

use crate::checkpoint::load_checkpoint;
use crate::condition::evaluate_condition;
use crate::graph::{Graph, Node};
use crate::handler::NodeHandler;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(45);
const DEFAULT_MAX_CYCLES: i64 = 1000;
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub enum ChildSignal {
    Graceful,
    Hard,
}

/// Minimal process surface the manager loop needs.
#[async_trait]
pub trait ChildProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Poll liveness. Once this returns false, [`exit_code`](Self::exit_code)
    /// reports how the child ended.
    async fn is_alive(&mut self) -> bool;

    fn exit_code(&self) -> Option<i32>;

    async fn signal(&mut self, signal: ChildSignal) -> Result<()>;
}

#[async_trait]
pub trait ChildLauncher: Send + Sync {
    async fn launch(&self, dotfile: &Path, logs_dir: &Path) -> Result<Box<dyn ChildProcess>>;
}

// ---------------------------------------------------------------------------
// Production launcher: spawn this engine's binary on the child dotfile
// ---------------------------------------------------------------------------

pub struct EngineChildLauncher {
    program: Option<PathBuf>,
}

impl EngineChildLauncher {
    /// Launch `program run <dotfile> --logs <dir>`. With no program set, the
    /// current executable is used.
    pub fn new(program: Option<PathBuf>) -> Self {
        Self { program }
    }
}

impl Default for EngineChildLauncher {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ChildLauncher for EngineChildLauncher {
    async fn launch(&self, dotfile: &Path, logs_dir: &Path) -> Result<Box<dyn ChildProcess>> {
        let program = match &self.program {
            Some(p) => p.clone(),
            None => std::env::current_exe()?,
        };
        let mut cmd = tokio::process::Command::new(program);
        cmd.arg("run")
            .arg(dotfile)
            .arg("--logs")
            .arg(logs_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| WaypointError::ChildPipeline(format!("failed to spawn child: {e}")))?;
        Ok(Box::new(TokioChildProcess {
            child,
            exit: None,
        }))
    }
}

struct TokioChildProcess {
    child: tokio::process::Child,
    exit: Option<i32>,
}

#[async_trait]
impl ChildProcess for TokioChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn is_alive(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(status.code().unwrap_or(-1));
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit
    }

    async fn signal(&mut self, signal: ChildSignal) -> Result<()> {
        match signal {
            ChildSignal::Graceful => {
                #[cfg(unix)]
                if let Some(pid) = self.child.id() {
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                    return Ok(());
                }
                // Fallback when no pid is available (or off unix): hard kill.
                self.child.start_kill().map_err(Into::into)
            }
            ChildSignal::Hard => self.child.start_kill().map_err(Into::into),
        }
    }
}

// ---------------------------------------------------------------------------
// Manager loop handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Actions {
    observe: bool,
    steer: bool,
    wait: bool,
}

impl Actions {
    fn parse(raw: Option<String>) -> Self {
        let raw = raw.unwrap_or_else(|| "observe,wait".to_string());
        let mut actions = Actions {
            observe: false,
            steer: false,
            wait: false,
        };
        for token in raw.split(',').map(str::trim) {
            match token {
                "observe" => actions.observe = true,
                "steer" => actions.steer = true,
                "wait" => actions.wait = true,
                _ => {}
            }
        }
        if !(actions.observe || actions.steer || actions.wait) {
            actions.observe = true;
            actions.wait = true;
        }
        actions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

pub struct ManagerLoopHandler {
    launcher: Arc<dyn ChildLauncher>,
}

impl ManagerLoopHandler {
    pub fn new(launcher: Arc<dyn ChildLauncher>) -> Self {
        Self { launcher }
    }
}

impl Default for ManagerLoopHandler {
    fn default() -> Self {
        Self::new(Arc::new(EngineChildLauncher::default()))
    }
}

fn node_or_graph_str(node: &Node, graph: &Graph, key: &str) -> Option<String> {
    node.attr_str(key)
        .or_else(|| graph.attr_str(key))
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl NodeHandler for ManagerLoopHandler {
    fn handler_type(&self) -> &str {
        "stack.manager_loop"
    }

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let Some(dotfile) = node_or_graph_str(node, graph, "stack.child_dotfile") else {
            return Ok(Outcome::fail(format!(
                "manager node '{}' has no stack.child_dotfile configured",
                node.id
            )));
        };
        let autostart = node
            .attr_bool("stack.child_autostart")
            .or_else(|| graph.attr_bool("stack.child_autostart"))
            .unwrap_or(true);
        let poll_interval = node
            .attr_duration("manager.poll_interval")
            .or_else(|| graph.attr_duration("manager.poll_interval"))
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let max_cycles = node
            .attr_int("manager.max_cycles")
            .or_else(|| graph.attr_int("manager.max_cycles"))
            .unwrap_or(DEFAULT_MAX_CYCLES)
            .max(1) as usize;
        let actions = Actions::parse(node_or_graph_str(node, graph, "manager.actions"));
        let stop_condition = node_or_graph_str(node, graph, "manager.stop_condition");

        let child_logs = logs_root.join(&node.id).join("child");
        tokio::fs::create_dir_all(&child_logs).await?;

        let mut updates: HashMap<String, serde_json::Value> = HashMap::new();
        let mut status = ChildStatus::NotStarted;
        let mut child: Option<Box<dyn ChildProcess>> = None;

        if autostart {
            let spawned = self
                .launcher
                .launch(Path::new(&dotfile), &child_logs)
                .await?;
            tracing::info!(node = %node.id, %dotfile, pid = ?spawned.pid(), "child pipeline started");
            if let Some(pid) = spawned.pid() {
                updates.insert("stack.child.pid".into(), serde_json::json!(pid));
            }
            updates.insert("stack.child.status".into(), serde_json::json!("running"));
            status = ChildStatus::Running;
            child = Some(spawned);
        }

        let base_snapshot = context.snapshot().await;

        for cycle in 1..=max_cycles {
            if actions.observe {
                if let Some(proc) = child.as_mut() {
                    if !proc.is_alive().await {
                        let code = proc.exit_code().unwrap_or(-1);
                        status = if code == 0 {
                            ChildStatus::Completed
                        } else {
                            ChildStatus::Failed
                        };
                        updates.insert("stack.child.exit_code".into(), serde_json::json!(code));
                        updates.insert(
                            "stack.child.status".into(),
                            serde_json::json!(match status {
                                ChildStatus::Completed => "completed",
                                _ => "failed",
                            }),
                        );
                    } else if let Ok(Some(cp)) = load_checkpoint(&child_logs).await {
                        updates.insert(
                            "stack.child.current_node".into(),
                            serde_json::json!(cp.current_node),
                        );
                        updates.insert(
                            "stack.child.completed_count".into(),
                            serde_json::json!(cp.completed_nodes.len()),
                        );
                    }
                }
            }

            if actions.steer {
                updates.insert(
                    "stack.manager.steer".into(),
                    serde_json::json!(format!("cycle {cycle}: observing child pipeline")),
                );
            }

            match status {
                ChildStatus::Completed => {
                    let mut outcome = Outcome::success("child pipeline completed");
                    outcome.context_updates = updates;
                    return Ok(outcome);
                }
                ChildStatus::Failed => {
                    let mut outcome = Outcome::fail("child pipeline failed");
                    outcome.context_updates = updates;
                    return Ok(outcome);
                }
                _ => {}
            }

            if let Some(cond) = &stop_condition {
                let mut view = base_snapshot.clone();
                view.extend(updates.clone());
                if evaluate_condition(cond, &Outcome::success(""), &view) {
                    let mut outcome = Outcome::success("stop condition satisfied");
                    outcome.context_updates = updates;
                    return Ok(outcome);
                }
            }

            if actions.wait && cycle < max_cycles {
                tokio::time::sleep(poll_interval).await;
            }
        }

        if let Some(mut proc) = child {
            terminate(&mut *proc).await;
        }
        let mut outcome = Outcome::fail("max cycles exceeded");
        outcome.context_updates = updates;
        Ok(outcome)
    }
}

/// Graceful signal, a bounded grace period, then a hard kill.
async fn terminate(proc: &mut dyn ChildProcess) {
    if !proc.is_alive().await {
        return;
    }
    if proc.signal(ChildSignal::Graceful).await.is_err() {
        let _ = proc.signal(ChildSignal::Hard).await;
        return;
    }
    let deadline = tokio::time::Instant::now() + TERMINATE_GRACE;
    while tokio::time::Instant::now() < deadline {
        if !proc.is_alive().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    let _ = proc.signal(ChildSignal::Hard).await;
}
