//! Application setup and server configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::kernel::ServerDeps;
use crate::server::auth::JwtService;
use crate::server::middleware::jwt_auth_middleware;
use crate::server::routes::{
    confirm_merge_request_handler, create_merge_request_handler, get_merge_request_handler,
    health_handler, reject_merge_request_handler,
};

/// Upper bound for one request; a confirm that hits it still finishes its saga in the background
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ServerDeps>,
}

/// Build the Axum application router
pub fn build_app(state: AppState, jwt_service: Arc<JwtService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/merge-requests", post(create_merge_request_handler))
        .route("/merge-requests/:id", get(get_merge_request_handler))
        .route(
            "/merge-requests/:id/confirm",
            post(confirm_merge_request_handler),
        )
        .route(
            "/merge-requests/:id/reject",
            post(reject_merge_request_handler),
        )
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(move |req, next| {
            jwt_auth_middleware(jwt_service.clone(), req, next)
        }))
        .layer(Extension(state))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}
