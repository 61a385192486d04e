// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use carelink_session::{LogoutReason, Shell};

/// Terminal shell: a forced logout tells the user how to sign in again.
#[derive(Debug, Default, Clone, Copy)]
pub struct CliShell;

impl Shell for CliShell {
    fn navigate_to_login(&self, reason: LogoutReason) {
        eprintln!("{}", login_prompt(reason));
    }
}

pub fn login_prompt(reason: LogoutReason) -> String {
    let why = match reason {
        LogoutReason::User => "you logged out",
        LogoutReason::NoRefreshToken => "no stored session",
        LogoutReason::RefreshTokenExpired => "the session expired",
        LogoutReason::RefreshRejected => "the server revoked the session",
        LogoutReason::RefreshExhausted => "the token could not be refreshed",
        LogoutReason::Unauthorized => "the server refused the session",
        LogoutReason::StorageFailure => "the token file could not be written",
        LogoutReason::External => "another carelink process logged out",
    };
    format!("Session ended: {why}. Run `carelink login` to sign in again.")
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
