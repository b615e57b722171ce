//! Server configuration read from the environment.

use std::time::Duration;

use axum::http::HeaderValue;
use reviewq_core::defaults;

/// Default request body ceiling for uploads (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// HTTP server settings.
///
/// | Variable | Default |
/// |----------|---------|
/// | `HOST` | `0.0.0.0` |
/// | `PORT` | `3000` |
/// | `UPLOAD_DIR` | `./data/uploads` |
/// | `ALLOWED_ORIGINS` | `http://localhost:3000` |
/// | `MAX_UPLOAD_BYTES` | 50 MiB |
/// | `PUSH_KEEPALIVE_SECS` | `15` |
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: String,
    pub allowed_origins: Vec<HeaderValue>,
    pub max_upload_bytes: usize,
    pub keepalive: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
            upload_dir: defaults::UPLOAD_DIR.to_string(),
            allowed_origins: vec![HeaderValue::from_static("http://localhost:3000")],
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            keepalive: Duration::from_secs(defaults::PUSH_KEEPALIVE_SECS),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(base.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.port),
            upload_dir: std::env::var("UPLOAD_DIR").unwrap_or(base.upload_dir),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| parse_allowed_origins(&v))
                .filter(|origins| !origins.is_empty())
                .unwrap_or(base.allowed_origins),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.max_upload_bytes),
            keepalive: std::env::var("PUSH_KEEPALIVE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(base.keepalive),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse a comma-separated origin list, skipping blank and invalid entries.
pub fn parse_allowed_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}
