//! Integration tests for `ComfyUIApi` against an in-process fake proxy.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use rmbg_comfyui::api::{ComfyUIApi, ComfyUIApiError, RemoteJobClient};
use rmbg_core::normalize::{normalize, CanonicalImage};
use rmbg_core::output::JobOutputRef;
use rmbg_core::source::SourceImage;
use rmbg_core::types::{JobHandle, SessionId};
use rmbg_core::workflow::JobDefinition;
use serde_json::{json, Value};

/// Serve `router` on an ephemeral port and return its base URL.
async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn canonical() -> CanonicalImage {
    let img = image::RgbImage::from_pixel(6, 3, image::Rgb([1, 2, 3]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    let source = SourceImage::accept("cat.jpg", "image/png", bytes.into_inner()).unwrap();
    normalize(&source).unwrap()
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_sends_multipart_image_field_and_returns_name() {
    async fn upload(headers: HeaderMap, body: Bytes) -> Json<Value> {
        let content_type = headers[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains(r#"name="image""#));
        assert!(text.contains(r#"filename="cat.png""#));
        assert!(text.contains("image/png"));
        Json(json!({ "name": "cat (1).png", "subfolder": "", "type": "input" }))
    }

    let base = spawn_server(Router::new().route("/upload", post(upload))).await;
    let api = ComfyUIApi::new(format!("{base}/"));

    let asset = api.upload_asset(&canonical()).await.unwrap();
    assert_eq!(asset.name, "cat (1).png");
}

#[tokio::test]
async fn upload_without_name_is_malformed() {
    let router = Router::new().route("/upload", post(|| async { Json(json!({ "name": "" })) }));
    let api = ComfyUIApi::new(spawn_server(router).await);

    let result = api.upload_asset(&canonical()).await;
    assert_matches!(result, Err(ComfyUIApiError::MalformedResponse(_)));
}

#[tokio::test]
async fn upload_error_status_is_reported() {
    let router = Router::new().route(
        "/upload",
        post(|| async { (StatusCode::BAD_REQUEST, "no image") }),
    );
    let api = ComfyUIApi::new(spawn_server(router).await);

    let result = api.upload_asset(&canonical()).await;
    assert_matches!(
        result,
        Err(ComfyUIApiError::ApiError { status: 400, body }) if body == "no image"
    );
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_sends_prompt_and_client_id() {
    type Captured = Arc<Mutex<Option<Value>>>;

    async fn submit(State(captured): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
        *captured.lock().unwrap() = Some(body);
        Json(json!({ "prompt_id": "abc123", "number": 4, "node_errors": {} }))
    }

    let captured: Captured = Arc::default();
    let router = Router::new()
        .route("/submit", post(submit))
        .with_state(Arc::clone(&captured));
    let api = ComfyUIApi::new(spawn_server(router).await);

    let session = SessionId::from("session-1".to_string());
    let definition = JobDefinition::default_template();
    let handle = api.submit_job(&definition, &session).await.unwrap();

    assert_eq!(handle, JobHandle::new("abc123"));
    let body = captured.lock().unwrap().take().unwrap();
    assert_eq!(body["client_id"], "session-1");
    assert_eq!(body["prompt"]["1"]["class_type"], "LoadImage");
}

#[tokio::test]
async fn submit_without_prompt_id_is_malformed() {
    let router = Router::new().route("/submit", post(|| async { Json(json!({ "number": 1 })) }));
    let api = ComfyUIApi::new(spawn_server(router).await);

    let result = api
        .submit_job(&JobDefinition::default_template(), &SessionId::generate())
        .await;
    assert_matches!(result, Err(ComfyUIApiError::MalformedResponse(_)));
}

#[tokio::test]
async fn submit_rejection_is_reported() {
    let router = Router::new().route(
        "/submit",
        post(|| async {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "type": "prompt_outputs_failed_validation" } })),
            )
        }),
    );
    let api = ComfyUIApi::new(spawn_server(router).await);

    let result = api
        .submit_job(&JobDefinition::default_template(), &SessionId::generate())
        .await;
    assert_matches!(result, Err(ComfyUIApiError::ApiError { status: 400, .. }));
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

async fn history(Path(id): Path<String>) -> Json<Value> {
    if id == "abc123" {
        Json(json!({
            "abc123": {
                "outputs": {
                    "3": { "images": [{ "filename": "out.png", "subfolder": "", "type": "output" }] }
                },
                "status": { "status_str": "success", "completed": true }
            }
        }))
    } else {
        Json(json!({}))
    }
}

#[tokio::test]
async fn fetch_job_record_returns_record_when_present() {
    let router = Router::new().route("/history/{id}", get(history));
    let api = ComfyUIApi::new(spawn_server(router).await);

    let record = api
        .fetch_job_record(&JobHandle::new("abc123"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        record.first_output(),
        Some(&JobOutputRef::new("out.png", "", "output"))
    );
}

#[tokio::test]
async fn fetch_job_record_absent_is_none_not_error() {
    let router = Router::new().route("/history/{id}", get(history));
    let api = ComfyUIApi::new(spawn_server(router).await);

    let record = api.fetch_job_record(&JobHandle::new("pending")).await.unwrap();
    assert!(record.is_none());
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_output_downloads_artifact_bytes() {
    async fn view(Query(params): Query<Vec<(String, String)>>) -> (StatusCode, Vec<u8>) {
        assert_eq!(
            params,
            vec![
                ("filename".to_string(), "out.png".to_string()),
                ("subfolder".to_string(), String::new()),
                ("type".to_string(), "output".to_string()),
            ]
        );
        (StatusCode::OK, vec![0x89, b'P', b'N', b'G'])
    }

    let base = spawn_server(Router::new().route("/view", get(view))).await;
    let api = ComfyUIApi::new(base.clone());
    let output = JobOutputRef::new("out.png", "", "output");

    assert_eq!(
        api.resolve_output(&output),
        format!("{base}/view?filename=out.png&subfolder=&type=output")
    );
    let bytes = api.fetch_output(&output).await.unwrap();
    assert_eq!(&bytes[..], &[0x89, b'P', b'N', b'G']);
}
