//! Task submission and inspection endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::execution::RunOptions;
use crate::registry::{TaskEntry, TaskStatus};
use crate::web::errors::ApiError;
use crate::web::state::AppState;

const LIST_QUERY_PREVIEW_CHARS: usize = 100;

fn default_module() -> String {
    "run".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub question: String,
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default)]
    pub use_module_default: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

/// `POST /api/run/async`
pub async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let task_id = Uuid::new_v4();
    info!(%task_id, module = %request.module, "task submitted");

    let dispatcher = state.dispatcher.clone();
    let options = RunOptions {
        use_module_default: request.use_module_default,
    };
    tokio::spawn(async move {
        dispatcher
            .run_query(task_id, request.question, request.module, options)
            .await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id,
            status: TaskStatus::Processing,
        }),
    ))
}

/// `GET /api/run/task/{id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskEntry>, ApiError> {
    state
        .registry()
        .get(task_id)
        .map(Json)
        .ok_or(ApiError::TaskNotFound(task_id))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
}

/// `DELETE /api/run/task/{id}`
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let Some(entry) = state.registry().get(task_id) else {
        return Err(ApiError::TaskNotFound(task_id));
    };
    if entry.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Task {task_id} already finished ({})",
            entry.status.as_str()
        )));
    }
    state.dispatcher.cancel(task_id).await;
    info!(%task_id, "task cancelled via api");
    Ok(Json(CancelResponse {
        task_id,
        status: TaskStatus::Cancelled,
    }))
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub status: Option<String>,
}

/// Listing shape: full entries are noisy, so the query text is clipped
/// for display.
#[derive(Debug, Serialize)]
pub struct TaskSummary {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub module: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TaskEntry> for TaskSummary {
    fn from(entry: TaskEntry) -> Self {
        Self {
            task_id: entry.id,
            status: entry.status,
            module: entry.module,
            query: clip(&entry.query, LIST_QUERY_PREVIEW_CHARS),
            created_at: entry.created_at,
            completed_at: entry.completed_at,
            error: entry.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub tasks: Vec<TaskSummary>,
    pub count: usize,
}

/// `GET /api/run/tasks?limit&status`
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let status_filter = params
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<TaskStatus>()
                .map_err(|_| ApiError::BadRequest(format!("Unknown status '{raw}'")))
        })
        .transpose()?;

    let tasks: Vec<TaskSummary> = state
        .registry()
        .list(params.limit, status_filter)
        .into_iter()
        .map(TaskSummary::from)
        .collect();
    let count = tasks.len();
    Ok(Json(ListResponse { tasks, count }))
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{clipped}...")
}
