// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Backend endpoints and refresh policy for a session.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the REST backend.
    #[arg(long, default_value = "http://127.0.0.1:8000", env = "CARELINK_API_URL")]
    pub api_url: String,

    /// Path of the login endpoint.
    #[arg(long, default_value = "/api/token/", env = "CARELINK_LOGIN_PATH")]
    pub login_path: String,

    /// Path of the refresh endpoint.
    #[arg(long, default_value = "/api/token/refresh/", env = "CARELINK_REFRESH_PATH")]
    pub refresh_path: String,

    /// Refresh access tokens this many seconds before they expire.
    #[arg(long, default_value_t = 120, env = "CARELINK_EXPIRY_SKEW_SECS")]
    pub expiry_skew_secs: u64,

    /// Refresh attempts per cycle before forcing logout.
    #[arg(long, default_value_t = 3, env = "CARELINK_REFRESH_ATTEMPTS")]
    pub refresh_attempts: u32,

    /// Delay between refresh attempts in milliseconds.
    #[arg(long, default_value_t = 500, env = "CARELINK_REFRESH_RETRY_DELAY_MS")]
    pub refresh_retry_delay_ms: u64,

    /// Timeout of a single refresh call in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "CARELINK_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: u64,

    /// Timeout of ordinary requests in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "CARELINK_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Token file shared by every carelink process. Defaults to the state dir.
    #[arg(long, env = "CARELINK_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".to_owned(),
            login_path: "/api/token/".to_owned(),
            refresh_path: "/api/token/refresh/".to_owned(),
            expiry_skew_secs: 120,
            refresh_attempts: 3,
            refresh_retry_delay_ms: 500,
            refresh_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            token_file: None,
        }
    }
}

impl SessionConfig {
    pub fn expiry_skew(&self) -> Duration {
        Duration::from_secs(self.expiry_skew_secs)
    }

    pub fn refresh_retry_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_retry_delay_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn login_url(&self) -> String {
        self.resolve_url(&self.login_path)
    }

    pub fn refresh_url(&self) -> String {
        self.resolve_url(&self.refresh_path)
    }

    /// Join a path onto the API base URL. Absolute URLs pass through.
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        let base = self.api_url.trim_end_matches('/');
        if path.is_empty() {
            base.to_owned()
        } else if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    pub fn token_file_path(&self) -> PathBuf {
        self.token_file.clone().unwrap_or_else(|| state_dir().join("tokens.json"))
    }
}

/// Resolve the state directory for persisted tokens.
///
/// Checks `CARELINK_STATE_DIR`, then `$XDG_STATE_HOME/carelink`,
/// then `$HOME/.local/state/carelink`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CARELINK_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("carelink");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/carelink");
    }
    PathBuf::from(".carelink")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
