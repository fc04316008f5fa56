//! HTTP and WebSocket surface.

pub mod errors;
pub mod handlers;
pub mod state;
pub mod ws;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{GatewayError, Result};
use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::health::health))
        .route("/api/run/async", axum::routing::post(handlers::tasks::submit_task))
        .route(
            "/api/run/task/{id}",
            get(handlers::tasks::get_task).delete(handlers::tasks::cancel_task),
        )
        .route("/api/run/tasks", get(handlers::tasks::list_tasks))
        .route("/api/run/ws", get(ws::ws_handler))
        .route("/api/modules", get(handlers::modules::list_modules))
        .route("/api/modules/{name}", get(handlers::modules::get_module));
    if state.config.server.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve until the shutdown future resolves, then stop accepting and
/// drain in-flight connections.
pub async fn serve(
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let bind_address = state.config.server.bind_address.clone();
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| GatewayError::Configuration(format!("cannot bind {bind_address}: {e}")))?;
    info!(%bind_address, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(GatewayError::Io)
}
