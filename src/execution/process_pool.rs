//! One-shot child processes for isolated task execution.
//!
//! Each submission spawns a fresh child running this binary's `worker`
//! subcommand, hands it the task over stdin, and drains its stdout reply
//! stream into a channel. A crashed or silent child surfaces as an error
//! reply on that channel, never as a pool fault.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::execution::ipc::{decode_line, encode_line, WorkerReply, WorkerRequest};
use crate::registry::TaskResult;

/// How to start a worker child: this binary re-executed with the
/// `worker` subcommand, pointed at the same configuration file.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    config_path: Option<PathBuf>,
}

impl WorkerLauncher {
    pub fn new(program: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            program,
            config_path,
        }
    }

    /// Launcher for the currently running executable.
    pub fn current(config_path: Option<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| GatewayError::ProcessPool(format!("cannot resolve own executable: {e}")))?;
        Ok(Self::new(program, config_path))
    }

    pub fn spawn(&self, mode: &str) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command.arg("worker").arg("--mode").arg(mode);
        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::ProcessPool(format!("failed to spawn {mode} worker: {e}")))
    }
}

/// Seam the dispatcher routes isolated tasks through. Tests substitute a
/// stub; production wires [`ProcessPoolManager`].
#[async_trait]
pub trait IsolatedBackend: Send + Sync {
    async fn submit(
        &self,
        task_id: Uuid,
        module: String,
        query: String,
    ) -> Result<mpsc::Receiver<WorkerReply>>;

    /// Force-kill the child serving `task_id`. Returns false when no such
    /// child is active.
    async fn terminate(&self, task_id: Uuid) -> bool;

    async fn shutdown(&self);
}

pub struct ProcessPoolManager {
    launcher: WorkerLauncher,
    children: Mutex<HashMap<Uuid, Child>>,
    shutdown_grace: Duration,
}

impl ProcessPoolManager {
    pub fn new(launcher: WorkerLauncher, shutdown_grace: Duration) -> Self {
        Self {
            launcher,
            children: Mutex::new(HashMap::new()),
            shutdown_grace,
        }
    }

    pub fn active_count(&self) -> usize {
        self.children.lock().len()
    }

    fn remove(&self, task_id: Uuid) -> Option<Child> {
        self.children.lock().remove(&task_id)
    }
}

#[async_trait]
impl IsolatedBackend for ProcessPoolManager {
    async fn submit(
        &self,
        task_id: Uuid,
        module: String,
        query: String,
    ) -> Result<mpsc::Receiver<WorkerReply>> {
        let mut child = self.launcher.spawn("oneshot")?;
        let pid = child.id();

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::ProcessPool("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::ProcessPool("worker stdout unavailable".to_string()))?;

        let request = encode_line(&WorkerRequest::Run {
            task_id,
            module,
            query,
        })?;
        stdin.write_all(request.as_bytes()).await.map_err(|e| {
            GatewayError::ProcessPool(format!("failed to hand task to worker: {e}"))
        })?;
        stdin.shutdown().await.ok();
        drop(stdin);

        info!(%task_id, pid = ?pid, "one-shot worker started");
        self.children.lock().insert(task_id, child);

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut terminal_seen = false;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match decode_line::<WorkerReply>(&line) {
                        Ok(reply) => {
                            terminal_seen |= reply.is_terminal();
                            if tx.send(reply).await.is_err() {
                                // Receiver gone: nobody is waiting anymore.
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(%task_id, error = %e, "discarding unparseable worker line");
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%task_id, error = %e, "worker stdout read failed");
                        break;
                    }
                }
            }
            if !terminal_seen {
                let reply = WorkerReply::Error {
                    task_id,
                    error: "worker process exited without producing a result".to_string(),
                    fallback: TaskResult::message(
                        "Task failed: the execution process exited unexpectedly.",
                    ),
                };
                tx.send(reply).await.ok();
            }
        });

        Ok(rx)
    }

    async fn terminate(&self, task_id: Uuid) -> bool {
        let Some(mut child) = self.remove(task_id) else {
            return false;
        };
        info!(%task_id, "terminating one-shot worker");
        if let Err(e) = child.start_kill() {
            warn!(%task_id, error = %e, "kill failed, worker likely already gone");
        }
        match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(%task_id, %status, "worker reaped"),
            Ok(Err(e)) => warn!(%task_id, error = %e, "worker wait failed"),
            Err(_) => error!(%task_id, "worker did not exit within the grace period"),
        }
        true
    }

    async fn shutdown(&self) {
        let children: Vec<(Uuid, Child)> = self.children.lock().drain().collect();
        if children.is_empty() {
            return;
        }
        info!(count = children.len(), "shutting down one-shot workers");
        for (task_id, mut child) in children {
            child.start_kill().ok();
            if tokio::time::timeout(self.shutdown_grace, child.wait())
                .await
                .is_err()
            {
                error!(%task_id, "worker did not exit during shutdown");
            }
        }
    }
}
