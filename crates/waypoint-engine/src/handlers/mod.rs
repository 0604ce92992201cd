//! Built-in node handlers beyond start/exit/conditional.

mod codergen;
mod manager;
mod parallel;
mod tool;
mod wait_human;

pub use codergen::{BackendReply, CodergenBackend, CodergenHandler};
pub use manager::{
    ChildLauncher, ChildProcess, ChildSignal, EngineChildLauncher, ManagerLoopHandler,
};
pub use parallel::{FanInHandler, ParallelHandler};
pub use tool::ToolHandler;
pub use wait_human::WaitHumanHandler;

use std::path::{Path, PathBuf};

/// Create (if needed) and return this node's artifact directory.
pub(crate) async fn stage_dir(logs_root: &Path, node_id: &str) -> waypoint_types::Result<PathBuf> {
    let dir = logs_root.join(node_id);
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Truncate to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...(truncated)")
    }
}
