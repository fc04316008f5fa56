//! Task data model.
//!
//! One `TaskEntry` per submission. `status` is the only externally
//! authoritative field; `process_status` and `monitor_status` refine
//! `processing` for diagnostics and the UI without carrying correctness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Externally meaningful lifecycle states. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Whether the routed execution drives a real window or a headless engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    Visible,
    Headless,
}

/// The structured payload of a successful society run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskResult {
    pub answer: String,
    #[serde(default)]
    pub chat_history: Vec<serde_json::Value>,
    #[serde(default)]
    pub token_info: serde_json::Map<String, serde_json::Value>,
}

impl TaskResult {
    /// A well-formed result shape carrying only an explanatory answer.
    /// Used wherever execution degrades instead of raising.
    pub fn message(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            chat_history: Vec::new(),
            token_info: serde_json::Map::new(),
        }
    }
}

/// One tracked task. Timestamps are advisory (staleness and timeout
/// detection), not correctness-critical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: Uuid,
    pub status: TaskStatus,
    pub query: String,
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_mode: Option<BrowserMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_status: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl TaskEntry {
    pub fn new(id: Uuid, query: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            id,
            status: TaskStatus::Processing,
            query: query.into(),
            module: module.into(),
            result: None,
            error: None,
            browser_mode: None,
            process_status: None,
            monitor_status: None,
            created_at: Utc::now(),
            submitted_at: None,
            completed_at: None,
            last_heartbeat: None,
        }
    }

    /// Placeholder entry fabricated when an update arrives for an id the
    /// registry has lost track of. Keeps the update instead of dropping it.
    pub fn placeholder(id: Uuid) -> Self {
        let mut entry = Self::new(id, "query information unavailable", "unknown");
        entry.process_status = Some("recovered".to_string());
        entry
    }
}

/// Partial merge applied to an existing entry. Each writer sets only the
/// fields of the state it owns, which is what makes concurrent updates
/// additive instead of racy.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub browser_mode: Option<BrowserMode>,
    pub process_status: Option<String>,
    pub monitor_status: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn completed(result: TaskResult) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            result: Some(result),
            process_status: Some("completed".to_string()),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Error),
            error: Some(error.into()),
            process_status: Some("failed".to_string()),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Timeout failures keep a degraded, well-formed result payload so
    /// clients always have something readable to show.
    pub fn timed_out(error: impl Into<String>, fallback: TaskResult) -> Self {
        Self {
            status: Some(TaskStatus::Error),
            error: Some(error.into()),
            result: Some(fallback),
            process_status: Some("timeout".to_string()),
            monitor_status: Some("timeout".to_string()),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn heartbeat(monitor_status: impl Into<String>) -> Self {
        Self {
            monitor_status: Some(monitor_status.into()),
            last_heartbeat: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn with_browser_mode(mut self, mode: BrowserMode) -> Self {
        self.browser_mode = Some(mode);
        self
    }

    pub fn with_process_status(mut self, status: impl Into<String>) -> Self {
        self.process_status = Some(status.into());
        self
    }

    /// Merge into `entry`, honoring terminal-state monotonicity: once a
    /// task leaves `processing` its status, result and error are frozen.
    pub fn apply(self, entry: &mut TaskEntry) {
        let frozen = entry.status.is_terminal();

        if !frozen {
            if let Some(status) = self.status {
                entry.status = status;
            }
            if let Some(result) = self.result {
                entry.result = Some(result);
            }
            if let Some(error) = self.error {
                entry.error = Some(error);
            }
            if let Some(completed_at) = self.completed_at {
                entry.completed_at = Some(completed_at);
            }
        }

        // Advisory fields merge regardless; they never change the outcome.
        if let Some(mode) = self.browser_mode {
            entry.browser_mode = Some(mode);
        }
        if let Some(process_status) = self.process_status {
            entry.process_status = Some(process_status);
        }
        if let Some(monitor_status) = self.monitor_status {
            entry.monitor_status = Some(monitor_status);
        }
        if let Some(submitted_at) = self.submitted_at {
            entry.submitted_at = Some(submitted_at);
        }
        if let Some(last_heartbeat) = self.last_heartbeat {
            entry.last_heartbeat = Some(last_heartbeat);
        }
    }
}
