// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle events and the application-shell boundary.

use serde::{Deserialize, Serialize};

use crate::store::ChangeOrigin;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// Explicit user logout.
    User,
    /// A refresh was needed but no token pair is stored.
    NoRefreshToken,
    /// The stored refresh token is expired or undecodable.
    RefreshTokenExpired,
    /// The refresh endpoint rejected the token (invalid, expired, blacklisted).
    RefreshRejected,
    /// Every refresh attempt in the retry budget failed.
    RefreshExhausted,
    /// The server kept answering 401 after a successful refresh.
    Unauthorized,
    /// A refreshed pair could not be persisted.
    StorageFailure,
    /// Another process sharing the token store logged out.
    External,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::NoRefreshToken => "no_refresh_token",
            Self::RefreshTokenExpired => "refresh_token_expired",
            Self::RefreshRejected => "refresh_rejected",
            Self::RefreshExhausted => "refresh_exhausted",
            Self::Unauthorized => "unauthorized",
            Self::StorageFailure => "storage_failure",
            Self::External => "external",
        }
    }

    /// Forced logouts send the user back to the login entry point.
    pub fn is_forced(&self) -> bool {
        !matches!(self, Self::User)
    }
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events broadcast by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    /// A new access token is in the store, either refreshed here or adopted
    /// from another process.
    Refreshed { origin: ChangeOrigin },
    LoggedOut { reason: LogoutReason },
}

/// The application shell: whatever owns navigation.
pub trait Shell: Send + Sync {
    /// Invoked once per forced logout, after credentials are cleared.
    fn navigate_to_login(&self, reason: LogoutReason);
}

/// Shell for embedders that only watch [`SessionEvent`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopShell;

impl Shell for NoopShell {
    fn navigate_to_login(&self, _reason: LogoutReason) {}
}
