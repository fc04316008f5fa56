//! Liveness endpoint.

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub api: &'static str,
    pub version: &'static str,
}

/// `GET /`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "online",
        api: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}
