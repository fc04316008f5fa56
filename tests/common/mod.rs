//! Shared harness: mock society runners and execution backends so the
//! full task lifecycle runs without the external framework or real
//! child processes.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use owl_gateway::config::{BrowserConfig, GatewayConfig, PoolConfig};
use owl_gateway::execution::{
    BrowserBackend, Dispatcher, IsolatedBackend, WorkerReply,
};
use owl_gateway::registry::{TaskRegistry, TaskResult, TaskStatus, TaskUpdate};
use owl_gateway::society::{ModuleCatalog, ModuleManifest, SocietyRunner};
use owl_gateway::web::state::AppState;

/// Runner whose behavior is chosen per test.
pub enum MockRunner {
    /// Succeeds immediately, echoing the query.
    Instant,
    /// Succeeds after the given delay.
    Slow(Duration),
    /// Always fails.
    Failing,
}

#[async_trait]
impl SocietyRunner for MockRunner {
    async fn run_society(
        &self,
        _module: &ModuleManifest,
        query: &str,
    ) -> owl_gateway::Result<TaskResult> {
        match self {
            MockRunner::Instant => {
                let mut result = TaskResult::message(format!("echo: {query}"));
                result.chat_history = vec![serde_json::json!({
                    "role": "assistant",
                    "content": format!("echo: {query}"),
                })];
                result
                    .token_info
                    .insert("completion_tokens".to_string(), serde_json::json!(7));
                Ok(result)
            }
            MockRunner::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(TaskResult::message(format!("late echo: {query}")))
            }
            MockRunner::Failing => Err(owl_gateway::GatewayError::Society(
                "mock society failure".to_string(),
            )),
        }
    }
}

/// Records submissions and immediately completes them in the registry,
/// the way a healthy pool worker would.
pub struct FakeBrowserBackend {
    pub registry: Arc<TaskRegistry>,
    pub submissions: Mutex<Vec<(Uuid, String)>>,
}

#[async_trait]
impl BrowserBackend for FakeBrowserBackend {
    async fn submit(
        &self,
        task_id: Uuid,
        module: String,
        _query: String,
    ) -> owl_gateway::Result<()> {
        self.submissions.lock().push((task_id, module));
        self.registry
            .update(task_id, TaskUpdate::completed(TaskResult::message("browser done")));
        Ok(())
    }

    async fn shutdown(&self) {}
}

/// Replies with one canned terminal message per submission.
pub struct FakeIsolatedBackend {
    pub reply: fn(Uuid) -> WorkerReply,
}

impl FakeIsolatedBackend {
    pub fn completing() -> Self {
        Self {
            reply: |task_id| WorkerReply::Completed {
                task_id,
                result: TaskResult::message("isolated done"),
            },
        }
    }
}

#[async_trait]
impl IsolatedBackend for FakeIsolatedBackend {
    async fn submit(
        &self,
        task_id: Uuid,
        _module: String,
        _query: String,
    ) -> owl_gateway::Result<mpsc::Receiver<WorkerReply>> {
        let (tx, rx) = mpsc::channel(4);
        tx.send((self.reply)(task_id)).await.ok();
        Ok(rx)
    }

    async fn terminate(&self, _task_id: Uuid) -> bool {
        false
    }

    async fn shutdown(&self) {}
}

pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<TaskRegistry>,
    pub browser: Arc<FakeBrowserBackend>,
}

pub fn harness(runner: MockRunner) -> Harness {
    harness_with_pools(runner, PoolConfig::default())
}

pub fn harness_with_pools(runner: MockRunner, pools: PoolConfig) -> Harness {
    let registry = Arc::new(TaskRegistry::new());
    let browser = Arc::new(FakeBrowserBackend {
        registry: registry.clone(),
        submissions: Mutex::new(Vec::new()),
    });
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        Arc::new(ModuleCatalog::builtin()),
        Arc::new(runner),
        Arc::new(FakeIsolatedBackend::completing()),
        browser.clone(),
        pools,
        BrowserConfig::default(),
    ));
    Harness {
        dispatcher,
        registry,
        browser,
    }
}

pub fn app_state(harness: &Harness) -> AppState {
    app_state_with(harness, GatewayConfig::default())
}

pub fn app_state_with(harness: &Harness, config: GatewayConfig) -> AppState {
    AppState::new(harness.dispatcher.clone(), Arc::new(config))
}

/// Poll until the task reaches a terminal state.
pub async fn wait_terminal(registry: &TaskRegistry, task_id: Uuid) -> TaskStatus {
    for _ in 0..300 {
        if let Some(entry) = registry.get(task_id) {
            if entry.status.is_terminal() {
                return entry.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}
