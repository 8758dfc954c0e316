use rmbg_comfyui::api::ComfyUIApiError;
use rmbg_core::error::CoreError;

/// Errors surfaced by the [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Validation, decoding or normalization of the selected file failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Upload failed: {0}")]
    Upload(#[source] ComfyUIApiError),

    #[error("Submission failed: {0}")]
    Submit(#[source] ComfyUIApiError),

    /// The engine reported that the job itself failed.
    #[error("Job failed: {0}")]
    Execution(String),

    /// A job is already in flight.
    #[error("A job is already running")]
    Busy,

    #[error("The pipeline has been shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Single human-readable line shown alongside the `Error` phase.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Core(CoreError::Validation(msg)) => msg.clone(),
            PipelineError::Core(CoreError::Decode(_)) => {
                "The file could not be read as an image".to_string()
            }
            PipelineError::Core(CoreError::Render(_)) => {
                "The image could not be prepared for upload".to_string()
            }
            PipelineError::Upload(_) => {
                "Uploading the image failed. Please try again".to_string()
            }
            PipelineError::Submit(_) => {
                "The background removal job could not be started. Please try again".to_string()
            }
            PipelineError::Execution(msg) => format!("Background removal failed: {msg}"),
            PipelineError::Busy => "Please wait for the current job to finish".to_string(),
            PipelineError::ShutDown => "The session has ended".to_string(),
            PipelineError::Core(CoreError::Internal(_)) | PipelineError::Internal(_) => {
                "Something went wrong. Please try again".to_string()
            }
        }
    }
}
