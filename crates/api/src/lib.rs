//! HTTP surface over the bridge.

pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use proxbridge_common::Result;
use proxbridge_manager::Manager;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn create_router(manager: Arc<Manager>) -> Router {
    let state = AppState::new(manager);
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/tools", get(routes::list_tools))
        .route("/api/v1/tools/{name}", post(routes::invoke_tool))
        .route("/api/v1/nodes", get(routes::list_nodes))
        .route("/api/v1/selftest", get(routes::self_test))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve(
    listener: tokio::net::TcpListener,
    manager: Arc<Manager>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "API listening");
    let router = create_router(manager);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
