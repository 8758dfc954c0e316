use std::sync::Arc;

use reqwest::Url;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Pooled client used for every upstream request.
    pub http: reqwest::Client,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }

    /// Engine URL for the given path segments, each percent-encoded.
    pub fn upstream(&self, segments: &[&str]) -> Url {
        let mut url = self.config.comfy_base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_base_url;

    fn state(base: &str) -> AppState {
        AppState::new(ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            comfy_base_url: parse_base_url(base).unwrap(),
            request_timeout_secs: 30,
        })
    }

    #[test]
    fn upstream_joins_segments() {
        let state = state("http://127.0.0.1:8188/");
        assert_eq!(
            state.upstream(&["upload", "image"]).as_str(),
            "http://127.0.0.1:8188/upload/image"
        );
    }

    #[test]
    fn upstream_encodes_path_segments() {
        let state = state("http://127.0.0.1:8188");
        assert_eq!(
            state.upstream(&["history", "a b/c"]).as_str(),
            "http://127.0.0.1:8188/history/a%20b%2Fc"
        );
    }

    #[test]
    fn upstream_keeps_base_path() {
        let state = state("https://gpu.internal/comfy/");
        assert_eq!(
            state.upstream(&["prompt"]).as_str(),
            "https://gpu.internal/comfy/prompt"
        );
    }
}
