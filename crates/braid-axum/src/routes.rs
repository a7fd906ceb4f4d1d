//! Route definitions and router construction.

use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use crate::bootstrap::{AxumContext, CorsConfig};
use crate::handlers;
use crate::state::AppState;
use crate::ws;

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            use axum::http::HeaderValue;
            let allowed: Vec<HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// All API routes without the `/api` prefix, ready to nest.
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        // Chat
        .route("/chat", post(handlers::chat::chat))
        .route(
            "/chat/streaming",
            get(handlers::chat::chat_sse_get).post(handlers::chat::chat_sse),
        )
        // Telemetry
        .route("/system", get(handlers::system::snapshot))
        .route("/system/stream", post(handlers::system::stream))
        // Models
        .route(
            "/models",
            get(handlers::models::list)
                .post(handlers::models::pull)
                .delete(handlers::models::remove),
        )
        // Multiplexed channel
        .route("/ws", get(ws::upgrade))
}

/// Create the main router with all API routes.
pub fn create_router(ctx: AxumContext, cors_config: &CorsConfig) -> Router {
    let state: AppState = Arc::new(ctx);
    let cors = build_cors_layer(cors_config);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes().with_state(state).layer(cors))
}

/// Create a router that also serves static assets with SPA fallback.
///
/// API routes take priority; anything unmatched falls back to the
/// static directory, and missing files fall back to `index.html` for
/// client-side routing.
pub fn create_spa_router<P: AsRef<Path>>(
    ctx: AxumContext,
    static_dir: P,
    cors_config: &CorsConfig,
) -> Router {
    let static_path = static_dir.as_ref();
    let index_path = static_path.join("index.html");
    let serve_dir = ServeDir::new(static_path).fallback(ServeFile::new(&index_path));

    create_router(ctx, cors_config).fallback_service(serve_dir)
}

pub(crate) async fn health_check() -> &'static str {
    "OK"
}
