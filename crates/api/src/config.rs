use reqwest::Url;

/// Default engine address for local development.
pub const DEFAULT_COMFY_BASE_URL: &str = "http://127.0.0.1:8188";

/// Proxy configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Base URL of the engine, without trailing slash.
    pub comfy_base_url: Url,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                  |
    /// |------------------------|--------------------------|
    /// | `HOST`                 | `0.0.0.0`                |
    /// | `PORT`                 | `3000`                   |
    /// | `COMFY_BASE_URL`       | `http://127.0.0.1:8188`  |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                     |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let comfy_base_url = std::env::var("COMFY_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_COMFY_BASE_URL.into());
        let comfy_base_url = parse_base_url(&comfy_base_url)
            .unwrap_or_else(|e| panic!("COMFY_BASE_URL must be an absolute http(s) URL: {e}"));

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            comfy_base_url,
            request_timeout_secs,
        }
    }
}

/// Parse an engine base URL, ignoring trailing slashes.
pub fn parse_base_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim().trim_end_matches('/')).map_err(|e| e.to_string())?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(format!("'{raw}' is not an http(s) base URL"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_trimmed() {
        let url = parse_base_url("http://10.0.0.5:8188///").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:8188/");
        assert_eq!(url.port(), Some(8188));
    }

    #[test]
    fn path_prefix_is_kept() {
        let url = parse_base_url("https://gpu.internal/comfy/").unwrap();
        assert_eq!(url.path(), "/comfy");
    }

    #[test]
    fn non_http_urls_are_rejected() {
        assert!(parse_base_url("mailto:ops@example.com").is_err());
        assert!(parse_base_url("ws://127.0.0.1:8188").is_err());
        assert!(parse_base_url("not a url").is_err());
    }
}
