//! Checkpoint persistence: `checkpoint.json` under the run's logs root,
//! rewritten atomically (temp file + rename) after every completed stage.

use std::path::{Path, PathBuf};

use waypoint_types::{Checkpoint, Result};

const CHECKPOINT_FILE: &str = "checkpoint.json";

pub async fn save_checkpoint(checkpoint: &Checkpoint, logs_root: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(logs_root).await?;
    let path = logs_root.join(CHECKPOINT_FILE);
    let tmp = logs_root.join(format!("{CHECKPOINT_FILE}.tmp"));
    let json = serde_json::to_string_pretty(checkpoint)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    tracing::debug!(path = %path.display(), node = %checkpoint.current_node, "checkpoint saved");
    Ok(path)
}

/// Load the latest checkpoint, or `None` when no run has checkpointed yet.
pub async fn load_checkpoint(logs_root: &Path) -> Result<Option<Checkpoint>> {
    let path = logs_root.join(CHECKPOINT_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn clear_checkpoint(logs_root: &Path) -> Result<()> {
    let path = logs_root.join(CHECKPOINT_FILE);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
