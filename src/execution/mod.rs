//! Task execution: routing, worker processes and the pools that own them.

pub mod browser_pool;
pub mod dispatcher;
pub mod ipc;
pub mod process_pool;
pub mod worker;
pub mod worker_proc;

pub use browser_pool::{BrowserBackend, BrowserProcessPool};
pub use dispatcher::{Dispatcher, RunOptions};
pub use ipc::{WorkerReply, WorkerRequest};
pub use process_pool::{IsolatedBackend, ProcessPoolManager, WorkerLauncher};
pub use worker::{execute_society_task, ExecutionOutcome};
pub use worker_proc::{run_worker, WorkerMode};
