//! WebSocket endpoint: task submission plus streamed status updates.
//!
//! Each `query` message launches a task and a per-task push loop that
//! polls the registry and forwards status, log heartbeats and the
//! terminal result to the client. Malformed input produces an `error`
//! event and keeps the connection open; a disconnect cancels whatever
//! the client still has in flight.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::StreamExt;
use futures::SinkExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::execution::RunOptions;
use crate::registry::{BrowserMode, TaskResult, TaskStatus, TaskUpdate};
use crate::web::state::AppState;

fn default_module() -> String {
    "run".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Query {
        question: String,
        #[serde(default = "default_module")]
        module: String,
        #[serde(default)]
        use_module_default: bool,
    },
    Cancel {
        task_id: Uuid,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Ack {
        task_id: Uuid,
        status: TaskStatus,
    },
    Status {
        task_id: Uuid,
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        browser_mode: Option<BrowserMode>,
    },
    Log {
        task_id: Uuid,
        message: String,
    },
    Result {
        task_id: Uuid,
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<TaskResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        message: String,
    },
    Pong,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(64);

    // Single writer task; push loops and the read loop all send through
    // the channel.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "dropping unserializable ws message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let client_tasks: Arc<Mutex<Vec<Uuid>>> = Arc::new(Mutex::new(Vec::new()));

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                handle_client_message(&state, &tx, &client_tasks, text.as_str()).await;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    // Disconnect: nobody is listening for these tasks anymore.
    let orphaned: Vec<Uuid> = client_tasks.lock().drain(..).collect();
    for task_id in orphaned {
        let still_running = state
            .registry()
            .get(task_id)
            .map(|entry| !entry.status.is_terminal())
            .unwrap_or(false);
        if still_running {
            info!(%task_id, "client disconnected, cancelling task");
            state.dispatcher.cancel(task_id).await;
        }
    }

    drop(tx);
    writer.await.ok();
}

async fn handle_client_message(
    state: &AppState,
    tx: &mpsc::Sender<ServerMessage>,
    client_tasks: &Arc<Mutex<Vec<Uuid>>>,
    raw: &str,
) {
    let message = match serde_json::from_str::<ClientMessage>(raw) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "malformed ws message");
            tx.send(ServerMessage::Error {
                message: format!("Invalid message: {e}"),
            })
            .await
            .ok();
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            tx.send(ServerMessage::Pong).await.ok();
        }
        ClientMessage::Cancel { task_id } => {
            let cancelled = state.dispatcher.cancel(task_id).await;
            let reply = if cancelled {
                ServerMessage::Result {
                    task_id,
                    status: TaskStatus::Cancelled,
                    result: None,
                    error: None,
                }
            } else {
                ServerMessage::Error {
                    message: format!("Task {task_id} cannot be cancelled"),
                }
            };
            tx.send(reply).await.ok();
        }
        ClientMessage::Query {
            question,
            module,
            use_module_default,
        } => {
            let task_id = Uuid::new_v4();
            client_tasks.lock().push(task_id);
            state
                .dispatcher
                .run_query(
                    task_id,
                    question,
                    module,
                    RunOptions { use_module_default },
                )
                .await;
            tx.send(ServerMessage::Ack {
                task_id,
                status: TaskStatus::Processing,
            })
            .await
            .ok();

            let state = state.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                stream_task(state, tx, task_id).await;
            });
        }
    }
}

/// Poll one task until it finishes and push its progress to the client.
async fn stream_task(state: AppState, tx: mpsc::Sender<ServerMessage>, task_id: Uuid) {
    let registry = state.registry().clone();
    let streaming = state.config.streaming.clone();

    // Registry desync is survivable: fabricate a trackable entry rather
    // than streaming into the void.
    if registry.is_empty() || !registry.contains(task_id) {
        warn!(%task_id, "registry lost the streamed task, recovering a placeholder");
        registry.update(
            task_id,
            TaskUpdate::default().with_process_status("recovered by stream"),
        );
    }

    if let Some(entry) = registry.get(task_id) {
        tx.send(ServerMessage::Status {
            task_id,
            status: entry.status,
            browser_mode: entry.browser_mode,
        })
        .await
        .ok();
        if entry.browser_mode == Some(BrowserMode::Visible) {
            for line in [
                "A browser window will open to work on your task.",
                "Do not close the browser window until the task finishes.",
            ] {
                tx.send(ServerMessage::Log {
                    task_id,
                    message: line.to_string(),
                })
                .await
                .ok();
            }
        }
    }

    let started = Instant::now();
    let mut polls: u32 = 0;
    loop {
        tokio::time::sleep(streaming.poll_interval()).await;
        polls += 1;

        let Some(entry) = registry.get(task_id) else {
            tx.send(ServerMessage::Result {
                task_id,
                status: TaskStatus::Cancelled,
                result: None,
                error: Some("Task is no longer tracked".to_string()),
            })
            .await
            .ok();
            return;
        };

        if entry.status.is_terminal() {
            tx.send(ServerMessage::Result {
                task_id,
                status: entry.status,
                result: entry.result,
                error: entry.error,
            })
            .await
            .ok();
            return;
        }

        if started.elapsed() >= streaming.task_timeout() {
            warn!(%task_id, "stream timeout reached, forcing task failure");
            registry.update(
                task_id,
                TaskUpdate::timed_out(
                    "task exceeded the streaming time limit",
                    TaskResult::message("Task timed out before producing a result."),
                ),
            );
            // The task is terminally errored; stop whatever is still
            // executing on its behalf.
            registry.cancellation_token(task_id).cancel();
            let entry = registry.get(task_id);
            tx.send(ServerMessage::Result {
                task_id,
                status: TaskStatus::Error,
                result: entry.and_then(|entry| entry.result),
                error: Some("Task exceeded the streaming time limit".to_string()),
            })
            .await
            .ok();
            return;
        }

        if polls % streaming.heartbeat_every_polls == 0 {
            let elapsed = started.elapsed().as_secs();
            if tx
                .send(ServerMessage::Log {
                    task_id,
                    message: format!("Still working ({elapsed}s elapsed)"),
                })
                .await
                .is_err()
            {
                // Client gone; the disconnect path handles cancellation.
                return;
            }
        }
    }
}
