//! Routing layer between the API surface and the execution backends.
//!
//! `run_query` is fire-and-forget: it registers the task, validates the
//! request, picks a backend from the module manifest and hands off. All
//! failures from that point land in the registry as terminal error
//! entries; nothing propagates to the caller.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BrowserConfig, PoolConfig};
use crate::execution::browser_pool::BrowserBackend;
use crate::execution::ipc::WorkerReply;
use crate::execution::process_pool::IsolatedBackend;
use crate::execution::worker::{execute_society_task, ExecutionOutcome};
use crate::registry::{BrowserMode, TaskRegistry, TaskResult, TaskUpdate};
use crate::society::{ModuleCatalog, SocietyRunner};

/// Per-request execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Replace the caller's text with the module's built-in default task.
    /// Strictly opt-in; the original query stays on the registry entry.
    pub use_module_default: bool,
}

pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    catalog: Arc<ModuleCatalog>,
    runner: Arc<dyn SocietyRunner>,
    generic_pool: Arc<dyn IsolatedBackend>,
    browser_pool: Arc<dyn BrowserBackend>,
    pools: PoolConfig,
    browser: BrowserConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TaskRegistry>,
        catalog: Arc<ModuleCatalog>,
        runner: Arc<dyn SocietyRunner>,
        generic_pool: Arc<dyn IsolatedBackend>,
        browser_pool: Arc<dyn BrowserBackend>,
        pools: PoolConfig,
        browser: BrowserConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            runner,
            generic_pool,
            browser_pool,
            pools,
            browser,
        }
    }

    /// Register and launch one task. Returns once the task is routed;
    /// results arrive through the registry.
    pub async fn run_query(
        self: &Arc<Self>,
        task_id: Uuid,
        query: String,
        module_name: String,
        options: RunOptions,
    ) {
        // The entry exists before anything can fail, so status reads
        // made immediately after submission always resolve.
        self.registry
            .create(task_id, query.clone(), module_name.clone());

        if query.trim().is_empty() {
            warn!(%task_id, "rejecting empty query");
            self.registry
                .update(task_id, TaskUpdate::failed("Query cannot be empty"));
            return;
        }

        let Some(manifest) = self.catalog.get(&module_name).cloned() else {
            warn!(%task_id, module = %module_name, "unknown module");
            self.registry.update(
                task_id,
                TaskUpdate::failed(format!("Unknown module '{module_name}'")),
            );
            return;
        };

        let effective_query = match (&manifest.default_task, options.use_module_default) {
            (Some(default_task), true) => {
                info!(%task_id, module = %manifest.name, "substituting module default task");
                default_task.clone()
            }
            _ => query,
        };

        let submitted = TaskUpdate {
            submitted_at: Some(chrono::Utc::now()),
            ..TaskUpdate::default()
        };
        self.registry.update(task_id, submitted);

        if manifest.requires_visible_browser {
            self.registry.update(
                task_id,
                TaskUpdate::default()
                    .with_browser_mode(BrowserMode::Visible)
                    .with_process_status("queued for browser pool"),
            );
            if let Err(e) = self
                .browser_pool
                .submit(task_id, manifest.name.clone(), effective_query)
                .await
            {
                error!(%task_id, error = %e, "browser pool submission failed");
                self.registry.update(task_id, TaskUpdate::failed(e.to_string()));
            }
            return;
        }

        self.registry.update(
            task_id,
            TaskUpdate::default().with_browser_mode(BrowserMode::Headless),
        );

        if manifest.isolate {
            let receiver = match self
                .generic_pool
                .submit(task_id, manifest.name.clone(), effective_query)
                .await
            {
                Ok(receiver) => receiver,
                Err(e) => {
                    error!(%task_id, error = %e, "worker spawn failed");
                    self.registry.update(task_id, TaskUpdate::failed(e.to_string()));
                    return;
                }
            };
            self.registry
                .update(task_id, TaskUpdate::default().with_process_status("isolated"));
            let this = self.clone();
            tokio::spawn(async move {
                this.monitor_isolated(task_id, receiver).await;
            });
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let cancel = this.registry.cancellation_token(task_id);
            let outcome = execute_society_task(
                this.runner.as_ref(),
                &manifest,
                &effective_query,
                &this.browser,
                &this.pools,
                &cancel,
            )
            .await;
            this.apply_outcome(task_id, outcome);
        });
    }

    /// Watch one isolated child's reply stream, keeping the registry
    /// heartbeat fresh and bounding the overall wait.
    async fn monitor_isolated(&self, task_id: Uuid, mut receiver: mpsc::Receiver<WorkerReply>) {
        let cancel = self.registry.cancellation_token(task_id);
        let deadline = tokio::time::Instant::now() + self.pools.result_wait();
        let mut heartbeat = tokio::time::interval(self.pools.monitor_heartbeat());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                reply = receiver.recv() => match reply {
                    Some(reply) => {
                        let terminal = reply.is_terminal();
                        self.apply_reply(task_id, reply);
                        if terminal {
                            break;
                        }
                    }
                    None => {
                        // Reader task always emits a terminal reply before
                        // closing, so a bare close is a monitor-side bug.
                        warn!(%task_id, "worker reply channel closed without a result");
                        self.registry.update(
                            task_id,
                            TaskUpdate::failed("worker reply stream ended unexpectedly"),
                        );
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    self.registry
                        .update(task_id, TaskUpdate::heartbeat("waiting for isolated worker"));
                }
                _ = cancel.cancelled() => {
                    info!(%task_id, "cancellation observed, stopping isolated worker");
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(%task_id, "isolated worker exceeded the result wait bound");
                    self.registry.update(
                        task_id,
                        TaskUpdate::timed_out(
                            "worker did not produce a result in time",
                            TaskResult::message(
                                "Task timed out: the execution process never reported a result.",
                            ),
                        ),
                    );
                    cancel.cancel();
                    break;
                }
            }
        }
        // Reaps a finished child and force-kills a stuck or cancelled one.
        self.generic_pool.terminate(task_id).await;
    }

    fn apply_reply(&self, task_id: Uuid, reply: WorkerReply) {
        match reply {
            WorkerReply::Processing {
                message,
                browser_mode,
                ..
            } => {
                let mut update =
                    TaskUpdate::heartbeat("isolated worker active").with_process_status(message);
                if let Some(mode) = browser_mode {
                    update = update.with_browser_mode(mode);
                }
                self.registry.update(task_id, update);
            }
            WorkerReply::Completed { result, .. } => {
                debug!(%task_id, "isolated task completed");
                self.registry.update(task_id, TaskUpdate::completed(result));
            }
            WorkerReply::Error { error, fallback, .. } => {
                debug!(%task_id, "isolated task failed");
                let mut update = TaskUpdate::failed(error);
                update.result = Some(fallback);
                self.registry.update(task_id, update);
            }
        }
    }

    fn apply_outcome(&self, task_id: Uuid, outcome: ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Success(result) => {
                self.registry.update(task_id, TaskUpdate::completed(result));
            }
            ExecutionOutcome::Failure { error, fallback } => {
                let mut update = TaskUpdate::failed(error);
                update.result = Some(fallback);
                self.registry.update(task_id, update);
            }
            ExecutionOutcome::Timeout { error, fallback } => {
                self.registry
                    .update(task_id, TaskUpdate::timed_out(error, fallback));
            }
            ExecutionOutcome::Cancelled => {
                self.registry.update(
                    task_id,
                    TaskUpdate::default().with_process_status("cancelled"),
                );
            }
        }
    }

    /// Cancel a task: registry transition plus backend teardown.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        let cancelled = self.registry.cancel(task_id);
        if cancelled {
            self.generic_pool.terminate(task_id).await;
        }
        cancelled
    }

    pub async fn shutdown(&self) {
        self.browser_pool.shutdown().await;
        self.generic_pool.shutdown().await;
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }
}
