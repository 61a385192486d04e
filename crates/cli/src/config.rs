// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use carelink_session::SessionConfig;

use crate::command::Command;

/// Sign in to the care platform API and issue authenticated requests.
#[derive(Debug, Parser)]
#[command(name = "carelink", version)]
pub struct Config {
    #[command(flatten)]
    pub session: SessionConfig,

    /// Log format (json or text).
    #[arg(long, env = "CARELINK_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error) or a tracing filter.
    #[arg(long, env = "CARELINK_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid --log-format: {other} (expected json or text)"),
        }

        let url = &self.session.api_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("--api-url must be an http(s) URL: {url}");
        }

        if self.session.refresh_attempts == 0 {
            anyhow::bail!("--refresh-attempts must be at least 1");
        }
        if self.session.refresh_timeout_ms == 0 || self.session.request_timeout_ms == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
