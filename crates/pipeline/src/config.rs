use std::path::PathBuf;
use std::time::Duration;

use rmbg_comfyui::poller::DEFAULT_POLL_INTERVAL;

/// Connection settings for the pipeline.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the HTTP proxy (default: `http://127.0.0.1:3000`).
    pub proxy_url: String,
    /// Base URL of the engine's real-time endpoint (default: `ws://127.0.0.1:8188`).
    pub ws_url: String,
    /// Job template on disk; the bundled template is used when unset.
    pub workflow_path: Option<PathBuf>,
    /// History poll interval (default: 2000 ms).
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy_url: "http://127.0.0.1:3000".into(),
            ws_url: "ws://127.0.0.1:8188".into(),
            workflow_path: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `RMBG_PROXY_URL`        | `http://127.0.0.1:3000`  |
    /// | `COMFY_WS_URL`          | `ws://127.0.0.1:8188`    |
    /// | `RMBG_WORKFLOW_PATH`    | unset (bundled template) |
    /// | `RMBG_POLL_INTERVAL_MS` | `2000`                   |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let proxy_url = lookup("RMBG_PROXY_URL").unwrap_or(defaults.proxy_url);
        let ws_url = lookup("COMFY_WS_URL").unwrap_or(defaults.ws_url);

        let workflow_path = lookup("RMBG_WORKFLOW_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let poll_interval = match lookup("RMBG_POLL_INTERVAL_MS") {
            Some(ms) => Duration::from_millis(
                ms.parse()
                    .expect("RMBG_POLL_INTERVAL_MS must be a valid u64"),
            ),
            None => defaults.poll_interval,
        };

        Self {
            proxy_url,
            ws_url,
            workflow_path,
            poll_interval,
        }
    }
}
