//! Shared task registry: the single source of truth observed by all
//! consumers, plus the best-effort disk snapshot used for crash recovery.

pub mod snapshot;
pub mod store;
pub mod task;

pub use store::TaskRegistry;
pub use task::{BrowserMode, TaskEntry, TaskResult, TaskStatus, TaskUpdate};
