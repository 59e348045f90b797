//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use flowcast_engine::Orchestrator;

use crate::routes;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/workflows", get(routes::list_workflows).post(routes::create_workflow))
        .route(
            "/workflows/{id}",
            get(routes::get_workflow)
                .put(routes::update_workflow)
                .delete(routes::delete_workflow),
        )
        .route("/workflows/{id}/toggle", post(routes::toggle_workflow))
        .route("/workflows/{id}/execute", post(routes::execute_workflow))
        .route("/workflows/{id}/executions", get(routes::list_executions))
        .route("/workflows/{id}/recurring", post(routes::register_recurring))
        .route("/events/{name}", post(routes::emit_event))
        .route("/queues/{name}/stats", get(routes::queue_stats))
        .route("/queues/{name}/failed", get(routes::failed_jobs))
        .route("/schedules", get(routes::list_schedules))
        .route("/schedules/{name}", axum::routing::delete(routes::delete_schedule));

    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(routes::health))
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the orchestrator and serve until Ctrl-C.
pub async fn start(orchestrator: Arc<Orchestrator>) -> anyhow::Result<()> {
    orchestrator.start().await?;

    let server = orchestrator.config().server.clone();
    let app = build_router(Arc::new(AppState {
        orchestrator: Arc::clone(&orchestrator),
    }));

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("⚠️ Could not listen for shutdown signal: {e}");
            }
        })
        .await?;

    orchestrator.shutdown();
    Ok(())
}
