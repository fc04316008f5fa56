//! Module catalog endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::society::ModuleManifest;
use crate::web::errors::ApiError;
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct ModulesResponse {
    pub modules: Vec<ModuleManifest>,
    pub count: usize,
}

/// `GET /api/modules`
pub async fn list_modules(State(state): State<AppState>) -> Json<ModulesResponse> {
    let modules: Vec<ModuleManifest> = state.catalog().list().into_iter().cloned().collect();
    let count = modules.len();
    Json(ModulesResponse { modules, count })
}

/// `GET /api/modules/{name}`
pub async fn get_module(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ModuleManifest>, ApiError> {
    state
        .catalog()
        .get(&name)
        .cloned()
        .map(Json)
        .ok_or(ApiError::ModuleNotFound(name))
}
