//! Handlers forwarding client requests to the engine.
//!
//! Upstream status codes and bodies are relayed unchanged, so engine-side
//! rejections (bad workflow, unknown file) reach the client as the engine
//! reported them. Only transport failures produce a [`ProxyError`].

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ProxyError, ProxyResult, ProxyRoute};
use crate::state::AppState;

/// Artifact type requested from `/view` when the client omits it.
pub const DEFAULT_VIEW_TYPE: &str = "output";

/// Query string of `GET /view`.
#[derive(Debug, Deserialize)]
pub struct ViewParams {
    pub filename: Option<String>,
    pub subfolder: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// OPTIONS on any proxy route.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// POST /upload
///
/// Forwards the multipart body and its content type verbatim to
/// `/upload/image`.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ProxyResult<Response> {
    let route = ProxyRoute::Upload;
    let mut request = state.http.post(state.upstream(&["upload", "image"]));
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        request = request.header(CONTENT_TYPE, content_type.clone());
    }

    tracing::debug!(bytes = body.len(), "Forwarding upload");
    let upstream = request
        .body(body)
        .send()
        .await
        .map_err(|e| ProxyError::new(route, e))?;

    relay(route, upstream).await
}

/// POST /submit
///
/// Forwards a `{prompt, client_id}` body to `/prompt`. The body must be
/// valid JSON.
pub async fn submit(State(state): State<AppState>, body: Bytes) -> ProxyResult<Response> {
    let route = ProxyRoute::Submit;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::new(route, format!("Request body is not valid JSON: {e}")))?;

    let upstream = state
        .http
        .post(state.upstream(&["prompt"]))
        .json(&payload)
        .send()
        .await
        .map_err(|e| ProxyError::new(route, e))?;

    relay(route, upstream).await
}

/// GET /history/{prompt_id}
pub async fn history(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> ProxyResult<Response> {
    let route = ProxyRoute::History;
    let upstream = state
        .http
        .get(state.upstream(&["history", prompt_id.as_str()]))
        .send()
        .await
        .map_err(|e| ProxyError::new(route, e))?;

    relay(route, upstream).await
}

/// GET /view
///
/// Empty `filename`, `subfolder` and `type` values are dropped; an absent
/// `type` defaults to `output`. The artifact body is streamed back with its content type and
/// content disposition.
pub async fn view(
    State(state): State<AppState>,
    Query(params): Query<ViewParams>,
) -> ProxyResult<Response> {
    let route = ProxyRoute::View;
    let mut url = state.upstream(&["view"]);
    {
        let mut query = url.query_pairs_mut();
        if let Some(filename) = params.filename.as_deref().filter(|s| !s.is_empty()) {
            query.append_pair("filename", filename);
        }
        if let Some(subfolder) = params.subfolder.as_deref().filter(|s| !s.is_empty()) {
            query.append_pair("subfolder", subfolder);
        }
        match params.kind.as_deref() {
            Some("") => {}
            Some(kind) => {
                query.append_pair("type", kind);
            }
            None => {
                query.append_pair("type", DEFAULT_VIEW_TYPE);
            }
        }
    }

    let upstream = state
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| ProxyError::new(route, e))?;

    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, content_type);
    if let Some(disposition) = upstream.headers().get(CONTENT_DISPOSITION) {
        headers.insert(CONTENT_DISPOSITION, disposition.clone());
    }

    let body = Body::from_stream(upstream.bytes_stream());
    Ok((status, headers, body).into_response())
}

/// Buffer an upstream response and relay status, body and content type.
async fn relay(route: ProxyRoute, upstream: reqwest::Response) -> ProxyResult<Response> {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let body = upstream
        .bytes()
        .await
        .map_err(|e| ProxyError::new(route, e))?;

    if !status.is_success() {
        tracing::warn!(route = ?route, status = status.as_u16(), "Engine returned an error status");
    }

    Ok((status, [(CONTENT_TYPE, content_type)], body).into_response())
}
