//! JSON-lines protocol spoken between the gateway and worker children.
//!
//! One request or reply per line. Worker stdout carries the protocol, so
//! all worker logging goes to stderr.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::{BrowserMode, TaskResult};

/// Parent to child.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerRequest {
    Run {
        task_id: Uuid,
        module: String,
        query: String,
    },
    /// Drain sentinel. The child finishes its current task and exits.
    Stop,
}

/// Child to parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerReply {
    Processing {
        task_id: Uuid,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        browser_mode: Option<BrowserMode>,
    },
    Completed {
        task_id: Uuid,
        result: TaskResult,
    },
    Error {
        task_id: Uuid,
        error: String,
        /// Degraded result carrying whatever the run produced before
        /// failing, so clients still receive a well-formed payload.
        fallback: TaskResult,
    },
}

impl WorkerReply {
    pub fn task_id(&self) -> Uuid {
        match self {
            WorkerReply::Processing { task_id, .. }
            | WorkerReply::Completed { task_id, .. }
            | WorkerReply::Error { task_id, .. } => *task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerReply::Processing { .. })
    }
}

/// Encode one message as a single protocol line.
pub fn encode_line<T: Serialize>(message: &T) -> crate::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line, tolerating surrounding whitespace.
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> crate::Result<T> {
    serde_json::from_str(line.trim()).map_err(Into::into)
}
