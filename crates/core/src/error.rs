#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The input was rejected before any decoding or network activity.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Could not decode image: {0}")]
    Decode(String),

    /// The square canvas could not be allocated or encoded.
    #[error("Could not render image: {0}")]
    Render(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
