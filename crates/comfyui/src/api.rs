//! REST client for the job endpoints exposed by the local proxy.
//!
//! Wraps upload, submission, history retrieval and artifact download using
//! [`reqwest`]. None of the calls retry; the caller owns retry policy.

use async_trait::async_trait;
use bytes::Bytes;
use rmbg_core::normalize::CanonicalImage;
use rmbg_core::output::{HistoryResponse, JobOutputRef, JobRecord};
use rmbg_core::types::{JobHandle, SessionId, UploadedAssetRef};
use rmbg_core::workflow::JobDefinition;
use serde::Deserialize;

/// Multipart field carrying the uploaded image.
pub const UPLOAD_FIELD: &str = "image";

/// The three remote operations the orchestrator depends on.
///
/// [`ComfyUIApi`] is the production implementation; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Upload a canonical image and return the name the engine stored it under.
    async fn upload_asset(&self, image: &CanonicalImage)
        -> Result<UploadedAssetRef, ComfyUIApiError>;

    /// Queue a job definition, tagged with the caller's session id.
    async fn submit_job(
        &self,
        definition: &JobDefinition,
        session_id: &SessionId,
    ) -> Result<JobHandle, ComfyUIApiError>;

    /// Fetch the history record for a job.
    ///
    /// `Ok(None)` means the engine has no record yet (still running, or
    /// unknown); the two cases are indistinguishable.
    async fn fetch_job_record(&self, handle: &JobHandle)
        -> Result<Option<JobRecord>, ComfyUIApiError>;
}

/// HTTP client for the proxy in front of one engine instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response of `POST /upload`.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    name: Option<String>,
}

/// Response of `POST /submit` after successfully queuing a job.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    number: Option<i64>,
}

/// Errors from the REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body lacked a required field.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ComfyUIApi {
    /// Create a client for a proxy base URL, e.g. `http://127.0.0.1:3000`.
    ///
    /// Trailing slashes are trimmed.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Absolute URL of an output artifact.
    pub fn resolve_output(&self, output: &JobOutputRef) -> String {
        format!("{}{}", self.api_url, output.view_path())
    }

    /// Download the bytes of an output artifact via `GET /view`.
    pub async fn fetch_output(&self, output: &JobOutputRef) -> Result<Bytes, ComfyUIApiError> {
        let response = self.client.get(self.resolve_output(output)).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise capture
    /// the status and body text in a [`ComfyUIApiError::ApiError`].
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ComfyUIApiError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl RemoteJobClient for ComfyUIApi {
    async fn upload_asset(
        &self,
        image: &CanonicalImage,
    ) -> Result<UploadedAssetRef, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name().to_string())
            .mime_str(image.mime_type())?;
        let form = reqwest::multipart::Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .client
            .post(format!("{}/upload", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let body: UploadResponse = Self::parse_response(response).await?;
        match body.name {
            Some(name) if !name.is_empty() => {
                tracing::debug!(name = %name, "Image uploaded");
                Ok(UploadedAssetRef::new(name))
            }
            _ => Err(ComfyUIApiError::MalformedResponse(
                "upload response has no name".to_string(),
            )),
        }
    }

    async fn submit_job(
        &self,
        definition: &JobDefinition,
        session_id: &SessionId,
    ) -> Result<JobHandle, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": definition,
            "client_id": session_id,
        });

        let response = self
            .client
            .post(format!("{}/submit", self.api_url))
            .json(&body)
            .send()
            .await?;

        let body: SubmitResponse = Self::parse_response(response).await?;
        match body.prompt_id {
            Some(id) if !id.is_empty() => {
                tracing::debug!(prompt_id = %id, queue_number = ?body.number, "Job queued");
                Ok(JobHandle::new(id))
            }
            _ => Err(ComfyUIApiError::MalformedResponse(
                "submit response has no prompt_id".to_string(),
            )),
        }
    }

    async fn fetch_job_record(
        &self,
        handle: &JobHandle,
    ) -> Result<Option<JobRecord>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, handle))
            .send()
            .await?;

        let mut history: HistoryResponse = Self::parse_response(response).await?;
        Ok(history.shift_remove(handle.as_str()))
    }
}
