use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Which proxied route a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRoute {
    Upload,
    Submit,
    History,
    View,
}

impl ProxyRoute {
    /// Machine-readable `error` value of the JSON envelope.
    pub fn error_code(self) -> &'static str {
        match self {
            ProxyRoute::Upload => "upload_failed",
            ProxyRoute::Submit => "submit_failed",
            ProxyRoute::History => "history_failed",
            ProxyRoute::View => "view_failed",
        }
    }
}

/// A request that could not be forwarded to the engine.
///
/// Upstream responses, including error statuses, are passed through
/// verbatim and never become a `ProxyError`. This type only covers the
/// cases where no upstream response could be relayed at all.
#[derive(Debug, thiserror::Error)]
#[error("{}: {message}", route.error_code())]
pub struct ProxyError {
    pub route: ProxyRoute,
    pub message: String,
}

/// Convenience type alias for handler return values.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    pub fn new(route: ProxyRoute, err: impl std::fmt::Display) -> Self {
        Self {
            route,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::error!(route = ?self.route, error = %self.message, "Proxy request failed");

        let body = json!({
            "error": self.route.error_code(),
            "message": self.message,
        });

        (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
    }
}
