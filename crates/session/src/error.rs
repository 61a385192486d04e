// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the session core.
///
/// Authentication failures (`AuthExpired`) are terminal for the session and
/// are handled centrally: by the time a caller sees one, credentials have
/// already been cleared. Business failures (`Http`) are passed through
/// untouched for the caller to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A token could not be decoded. Freshness checks treat this as expired.
    MalformedToken(String),
    /// Refresh exhausted or impossible; forced logout has run.
    AuthExpired,
    /// Non-2xx response from a resource endpoint.
    Http { status: u16, body: String },
    /// The login endpoint rejected the credentials.
    Login { status: u16, body: String },
    /// Network or transport failure on an ordinary request.
    Transport(String),
    /// The token store could not be written.
    Storage(String),
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "MALFORMED_TOKEN",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::Http { .. } => "HTTP_ERROR",
            Self::Login { .. } => "LOGIN_FAILED",
            Self::Transport(_) => "TRANSPORT",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::Login { status, .. } => Some(*status),
            Self::AuthExpired => Some(401),
            _ => None,
        }
    }

    /// Whether the caller should stop and let the login navigation happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken(msg) => write!(f, "malformed token: {msg}"),
            Self::AuthExpired => f.write_str("session expired, please log in again"),
            Self::Http { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::Login { status, body } => write!(f, "login failed ({status}): {body}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Storage(msg) => write!(f, "token storage error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
