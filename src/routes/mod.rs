//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the backend proxy, the health check, and the static
//! site as a fallback. The route guard wraps all of it, so page navigation and
//! API calls see the same session-cookie rules.

use axum::Router;
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::guard;
use crate::proxy;
use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let site = ServeDir::new(&state.config.site_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/api/proxy", get(proxy::forward).post(proxy::forward))
        .route("/healthz", get(healthz))
        .fallback_service(site)
        .layer(from_fn(guard::route_guard))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
