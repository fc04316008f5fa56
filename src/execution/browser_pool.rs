//! Persistent browser worker pool.
//!
//! Visible-browser tasks are expensive to start cold, so a fixed set of
//! children (`owl-gateway worker --mode browser`) stays alive across
//! tasks. Submission is round-robin; each worker has a drain task that
//! applies its reply stream to the shared registry, and a supervisor
//! loop that respawns the child if it dies with work in flight.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::execution::ipc::{decode_line, encode_line, WorkerReply, WorkerRequest};
use crate::execution::process_pool::WorkerLauncher;
use crate::registry::{TaskRegistry, TaskUpdate};

/// Seam the dispatcher routes visible-browser tasks through.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Queue a task onto a pool worker. Non-blocking beyond channel
    /// backpressure; results flow to the registry, not the caller.
    async fn submit(&self, task_id: Uuid, module: String, query: String) -> Result<()>;

    async fn shutdown(&self);
}

pub struct BrowserProcessPool {
    senders: Vec<mpsc::Sender<WorkerRequest>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    shutting_down: Arc<AtomicBool>,
    shutdown_grace: Duration,
}

impl BrowserProcessPool {
    pub fn new(
        registry: Arc<TaskRegistry>,
        launcher: WorkerLauncher,
        size: usize,
        shutdown_grace: Duration,
    ) -> Self {
        let shutting_down = Arc::new(AtomicBool::new(false));
        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let (tx, rx) = mpsc::channel(64);
            senders.push(tx);
            handles.push(tokio::spawn(worker_loop(
                index,
                registry.clone(),
                launcher.clone(),
                rx,
                shutting_down.clone(),
                shutdown_grace,
            )));
        }
        info!(size, "browser worker pool started");
        Self {
            senders,
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
            shutting_down,
            shutdown_grace,
        }
    }
}

#[async_trait]
impl BrowserBackend for BrowserProcessPool {
    async fn submit(&self, task_id: Uuid, module: String, query: String) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(GatewayError::ShuttingDown);
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        debug!(%task_id, worker = index, "queueing browser task");
        self.senders[index]
            .send(WorkerRequest::Run {
                task_id,
                module,
                query,
            })
            .await
            .map_err(|_| GatewayError::ProcessPool("browser worker queue closed".to_string()))
    }

    async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down browser worker pool");
        for sender in &self.senders {
            // Drain sentinel; a closed channel means the loop is already gone.
            sender.send(WorkerRequest::Stop).await.ok();
        }
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(self.shutdown_grace, handle).await.is_err() {
                error!("browser worker did not stop within the grace period");
            }
        }
    }
}

/// Owns one worker slot: spawns the child, feeds it requests, and
/// respawns it when it exits with the pool still running.
async fn worker_loop(
    index: usize,
    registry: Arc<TaskRegistry>,
    launcher: WorkerLauncher,
    mut requests: mpsc::Receiver<WorkerRequest>,
    shutting_down: Arc<AtomicBool>,
    shutdown_grace: Duration,
) {
    loop {
        let mut child = match launcher.spawn("browser") {
            Ok(child) => child,
            Err(e) => {
                error!(worker = index, error = %e, "browser worker spawn failed");
                if shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        info!(worker = index, pid = ?child.id(), "browser worker online");

        let Some(mut stdin) = child.stdin.take() else {
            error!(worker = index, "browser worker stdin unavailable");
            child.start_kill().ok();
            return;
        };
        let Some(stdout) = child.stdout.take() else {
            error!(worker = index, "browser worker stdout unavailable");
            child.start_kill().ok();
            return;
        };

        let in_flight: Arc<Mutex<HashSet<Uuid>>> = Arc::new(Mutex::new(HashSet::new()));
        let drain = tokio::spawn(drain_replies(
            index,
            registry.clone(),
            stdout,
            in_flight.clone(),
        ));

        // Feed until the child dies or a stop sentinel arrives.
        let stopped = loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(WorkerRequest::Run { task_id, module, query }) => {
                        in_flight.lock().insert(task_id);
                        let line = match encode_line(&WorkerRequest::Run { task_id, module, query }) {
                            Ok(line) => line,
                            Err(e) => {
                                warn!(%task_id, error = %e, "unencodable browser task");
                                fail_one(&registry, &in_flight, task_id, "task could not be encoded");
                                continue;
                            }
                        };
                        if let Err(e) = stdin.write_all(line.as_bytes()).await {
                            warn!(worker = index, %task_id, error = %e, "browser worker rejected task");
                            fail_one(&registry, &in_flight, task_id, "browser worker pipe closed");
                            break false;
                        }
                    }
                    Some(WorkerRequest::Stop) | None => {
                        if let Ok(line) = encode_line(&WorkerRequest::Stop) {
                            stdin.write_all(line.as_bytes()).await.ok();
                        }
                        stdin.shutdown().await.ok();
                        break true;
                    }
                },
                status = child.wait() => {
                    warn!(worker = index, status = ?status, "browser worker exited unexpectedly");
                    break false;
                }
            }
        };

        if stopped {
            if tokio::time::timeout(shutdown_grace, child.wait()).await.is_err() {
                warn!(worker = index, "browser worker ignored stop sentinel, killing");
                child.start_kill().ok();
            }
            drain.await.ok();
            return;
        }

        // Unexpected exit: reap, fail whatever it was carrying, respawn.
        child.start_kill().ok();
        child.wait().await.ok();
        drain.await.ok();
        let orphaned: Vec<Uuid> = in_flight.lock().drain().collect();
        for task_id in orphaned {
            registry.update(
                task_id,
                failed_with_fallback(
                    "browser worker exited before finishing the task",
                    "Task failed: the browser worker process crashed.",
                ),
            );
        }
        if shutting_down.load(Ordering::SeqCst) {
            return;
        }
        info!(worker = index, "respawning browser worker");
    }
}

/// Move one worker's reply stream into the canonical registry.
async fn drain_replies(
    index: usize,
    registry: Arc<TaskRegistry>,
    stdout: tokio::process::ChildStdout,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match decode_line::<WorkerReply>(&line) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(worker = index, error = %e, "discarding unparseable browser reply");
                continue;
            }
        };
        let task_id = reply.task_id();
        if reply.is_terminal() {
            in_flight.lock().remove(&task_id);
        }
        match reply {
            WorkerReply::Processing {
                message,
                browser_mode,
                ..
            } => {
                let mut update = TaskUpdate::heartbeat("browser worker active")
                    .with_process_status(message);
                if let Some(mode) = browser_mode {
                    update = update.with_browser_mode(mode);
                }
                registry.update(task_id, update);
            }
            WorkerReply::Completed { result, .. } => {
                debug!(worker = index, %task_id, "browser task completed");
                registry.update(task_id, TaskUpdate::completed(result));
            }
            WorkerReply::Error { error, fallback, .. } => {
                debug!(worker = index, %task_id, "browser task failed");
                let mut update = TaskUpdate::failed(error);
                update.result = Some(fallback);
                registry.update(task_id, update);
            }
        }
    }
}

fn fail_one(
    registry: &TaskRegistry,
    in_flight: &Mutex<HashSet<Uuid>>,
    task_id: Uuid,
    error: &str,
) {
    in_flight.lock().remove(&task_id);
    registry.update(
        task_id,
        failed_with_fallback(error, &format!("Task failed: {error}.")),
    );
}

fn failed_with_fallback(error: &str, fallback: &str) -> TaskUpdate {
    let mut update = TaskUpdate::failed(error);
    update.result = Some(crate::registry::TaskResult::message(fallback));
    update
}
