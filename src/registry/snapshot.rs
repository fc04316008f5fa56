//! Periodic registry snapshot for crash recovery.
//!
//! Best effort and advisory only: a background task serializes the
//! registry every few seconds, and startup reloads the file only when the
//! in-memory registry is empty. No consistency guarantee is intended.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::TaskRegistry;
use super::task::TaskEntry;
use crate::config::SnapshotConfig;
use crate::error::{GatewayError, Result};

/// Write the current registry contents to `path`. Failures are reported,
/// never propagated into task execution.
pub fn save_snapshot(registry: &TaskRegistry, path: &Path) -> Result<usize> {
    let entries = registry.export();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| GatewayError::Snapshot(format!("create {}: {e}", parent.display())))?;
    }
    let payload = serde_json::to_vec(&entries)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, payload)
        .map_err(|e| GatewayError::Snapshot(format!("write {}: {e}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| GatewayError::Snapshot(format!("rename to {}: {e}", path.display())))?;
    Ok(entries.len())
}

/// Load a snapshot into `registry` if one exists and the registry is empty.
/// Returns the number of entries restored.
pub fn load_snapshot(registry: &TaskRegistry, path: &Path) -> Result<usize> {
    if !path.exists() {
        debug!(path = %path.display(), "no registry snapshot found");
        return Ok(0);
    }
    if !registry.is_empty() {
        debug!("registry not empty, skipping snapshot restore");
        return Ok(0);
    }
    let raw = std::fs::read(path)
        .map_err(|e| GatewayError::Snapshot(format!("read {}: {e}", path.display())))?;
    let entries: Vec<TaskEntry> = serde_json::from_slice(&raw)?;
    let count = entries.len();
    registry.import(entries);
    info!(count, path = %path.display(), "restored task registry from snapshot");
    Ok(count)
}

/// Run the periodic snapshot loop until `shutdown` fires, then flush once.
pub async fn run_snapshot_loop(
    registry: Arc<TaskRegistry>,
    config: SnapshotConfig,
    shutdown: CancellationToken,
) {
    if !config.enabled {
        return;
    }
    let path = config.snapshot_path();
    let mut interval = tokio::time::interval(config.interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if registry.is_empty() {
                    continue;
                }
                match save_snapshot(&registry, &path) {
                    Ok(count) => debug!(count, "registry snapshot saved"),
                    Err(e) => warn!(error = %e, "registry snapshot failed"),
                }
            }
            _ = shutdown.cancelled() => {
                if !registry.is_empty() {
                    match save_snapshot(&registry, &path) {
                        Ok(count) => info!(count, "final registry snapshot flushed"),
                        Err(e) => warn!(error = %e, "final registry snapshot failed"),
                    }
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::task::{TaskResult, TaskUpdate};
    use uuid::Uuid;

    #[test]
    fn snapshot_round_trip_restores_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry_snapshot.json");

        let registry = TaskRegistry::new();
        let id = Uuid::new_v4();
        registry.create(id, "persisted query", "run");
        registry.update(id, TaskUpdate::completed(TaskResult::message("answer")));

        let saved = save_snapshot(&registry, &path).expect("save");
        assert_eq!(saved, 1);

        let restored = TaskRegistry::new();
        let count = load_snapshot(&restored, &path).expect("load");
        assert_eq!(count, 1);

        let entry = restored.get(id).expect("entry restored");
        assert_eq!(entry.query, "persisted query");
        assert_eq!(entry.result.map(|r| r.answer), Some("answer".to_string()));
    }

    #[test]
    fn load_skips_when_registry_not_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry_snapshot.json");

        let source = TaskRegistry::new();
        source.create(Uuid::new_v4(), "old", "run");
        save_snapshot(&source, &path).expect("save");

        let target = TaskRegistry::new();
        let live_id = Uuid::new_v4();
        target.create(live_id, "live", "run");
        let count = load_snapshot(&target, &path).expect("load");
        assert_eq!(count, 0);
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn missing_snapshot_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = TaskRegistry::new();
        let count = load_snapshot(&registry, &dir.path().join("nope.json")).expect("load");
        assert_eq!(count, 0);
    }
}
