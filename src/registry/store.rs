//! The shared task registry.
//!
//! One canonical instance lives in the service process and every component
//! reaches it through the same `Arc`. Child worker processes never see this
//! structure; their results travel over channels into the drain/monitor
//! tasks, which write here. A per-task cancellation token rides alongside
//! each entry so one timeout decision cancels consistently everywhere.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use super::task::{TaskEntry, TaskStatus, TaskUpdate};

#[derive(Default)]
pub struct TaskRegistry {
    entries: DashMap<Uuid, TaskEntry>,
    tokens: DashMap<Uuid, CancellationToken>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `processing` entry. An id collision is logged loudly
    /// and the existing entry is kept; ids come from v4 UUIDs so this only
    /// fires when something upstream is badly wrong.
    pub fn create(&self, id: Uuid, query: impl Into<String>, module: impl Into<String>) {
        let entry = TaskEntry::new(id, query, module);
        if self.entries.contains_key(&id) {
            error!(task_id = %id, "task id collision on create, keeping existing entry");
            return;
        }
        self.entries.insert(id, entry);
        self.tokens.entry(id).or_insert_with(CancellationToken::new);
    }

    /// Merge partial fields into an entry. A missing entry is a recoverable
    /// anomaly: the update is preserved on a fabricated placeholder rather
    /// than dropped.
    pub fn update(&self, id: Uuid, update: TaskUpdate) {
        match self.entries.get_mut(&id) {
            Some(mut entry) => update.apply(&mut entry),
            None => {
                warn!(task_id = %id, "update for unknown task, recreating placeholder entry");
                let mut entry = TaskEntry::placeholder(id);
                update.apply(&mut entry);
                self.entries.insert(id, entry);
                self.tokens.entry(id).or_insert_with(CancellationToken::new);
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Option<TaskEntry> {
        self.entries.get(&id).map(|entry| entry.clone())
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Most-recent-first listing with an optional status filter.
    pub fn list(&self, limit: usize, status_filter: Option<TaskStatus>) -> Vec<TaskEntry> {
        let mut entries: Vec<TaskEntry> = self
            .entries
            .iter()
            .filter(|entry| status_filter.is_none_or(|status| entry.status == status))
            .map(|entry| entry.clone())
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        entries
    }

    /// Cooperative cancellation: flip the status and fire the task's token.
    /// Running child-process work is not interrupted by this alone.
    /// Returns false when the task is unknown or already terminal.
    pub fn cancel(&self, id: Uuid) -> bool {
        let cancelled = match self.entries.get_mut(&id) {
            Some(mut entry) => {
                if entry.status.is_terminal() {
                    false
                } else {
                    let update = TaskUpdate {
                        status: Some(TaskStatus::Cancelled),
                        completed_at: Some(chrono::Utc::now()),
                        ..TaskUpdate::default()
                    };
                    update.apply(&mut entry);
                    true
                }
            }
            None => false,
        };
        if cancelled {
            if let Some(token) = self.tokens.get(&id) {
                token.cancel();
            }
        }
        cancelled
    }

    /// The cancellation token shared by every layer working on this task.
    pub fn cancellation_token(&self, id: Uuid) -> CancellationToken {
        self.tokens
            .entry(id)
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// All entries, cloned. Snapshot serialization uses this.
    pub fn export(&self) -> Vec<TaskEntry> {
        self.entries.iter().map(|entry| entry.clone()).collect()
    }

    /// Bulk-load entries; only used at startup when the registry is empty.
    pub fn import(&self, entries: Vec<TaskEntry>) {
        for entry in entries {
            self.tokens
                .entry(entry.id)
                .or_insert_with(CancellationToken::new);
            self.entries.insert(entry.id, entry);
        }
    }
}
