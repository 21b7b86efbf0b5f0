use super::handlers;
use super::state::AppState;
use axum::{
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Viewer-facing HLS output
        .route("/stream/:slug/:file", get(handlers::get_stream_file))
        // Stream catalog
        .route(
            "/api/streams",
            get(handlers::list_streams).post(handlers::create_stream),
        )
        .route(
            "/api/streams/:id",
            get(handlers::get_stream)
                .put(handlers::update_stream)
                .delete(handlers::delete_stream),
        )
        // Session inspection
        .route("/api/sessions", get(handlers::list_sessions))
        .layer(
            ServiceBuilder::new()
                // Add tracing middleware for request logging
                .layer(TraceLayer::new_for_http())
                // Players are usually served from another origin
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
