//! Pass-through routes to the engine.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::proxy;
use crate::state::AppState;

/// Largest request body accepted by `POST /upload`.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Proxy routes, mounted at the root.
///
/// ```text
/// POST   /upload          -> POST /upload/image
/// POST   /submit          -> POST /prompt
/// GET    /history/{id}    -> GET  /history/{id}
/// GET    /view            -> GET  /view
/// ```
///
/// Each route also answers `OPTIONS` with an empty `204`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/upload",
            post(proxy::upload)
                .options(proxy::preflight)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/submit", post(proxy::submit).options(proxy::preflight))
        .route(
            "/history/{prompt_id}",
            get(proxy::history).options(proxy::preflight),
        )
        .route("/view", get(proxy::view).options(proxy::preflight))
}
