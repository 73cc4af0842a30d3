pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::HttpState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

/// Full route table for the rendering service on a single listener.
pub fn build_router(state: HttpState) -> Router {
    let body_limit = state.max_body_bytes;

    Router::new()
        .route("/render", post(handlers::render_html))
        .route("/render-url", post(handlers::render_url))
        .route("/render-async", post(handlers::submit_async))
        .route("/render-async/{job_id}", get(handlers::job_status))
        .route("/download/{job_id}", get(handlers::download))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::service_status))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
