//! WebSocket client for the engine's real-time channel.
//!
//! [`ComfyUIClient`] holds the channel base URL. Call
//! [`ComfyUIClient::connect`] to establish a live [`ComfyUIConnection`]
//! addressed to one session.

use rmbg_core::types::SessionId;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type used by the channel.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the real-time endpoint.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection bound to one session.
pub struct ComfyUIConnection {
    /// Session id sent as `clientId` during the handshake.
    pub session_id: SessionId,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl ComfyUIClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        let ws_url = ws_url.into().trim_end_matches('/').to_string();
        Self { ws_url }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full endpoint URL for `session_id`.
    pub fn endpoint(&self, session_id: &SessionId) -> String {
        format!("{}/ws?clientId={}", self.ws_url, session_id)
    }

    /// Connect to the channel endpoint.
    ///
    /// The engine addresses progress messages to the `clientId` query
    /// parameter, which must match the `client_id` used on submission.
    pub async fn connect(
        &self,
        session_id: &SessionId,
    ) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.endpoint(session_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to real-time channel at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(session_id = %session_id, "Connected to real-time channel at {}", self.ws_url);

        Ok(ComfyUIConnection {
            session_id: session_id.clone(),
            ws_stream,
        })
    }
}

/// Errors raised by the real-time channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
