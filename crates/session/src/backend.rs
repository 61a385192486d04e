// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login and refresh endpoints.
//!
//! The backend issues a `{access, refresh}` pair on login and rotates both on
//! refresh; a rotated-away refresh token is blacklisted and answers 401.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::store::TokenPair;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Login form credentials.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("email", &self.email).finish_non_exhaustive()
    }
}

/// Tokens returned by a successful refresh. Backends without rotation omit
/// the refresh token; the caller keeps the old one.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("rotated", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Failure of a single refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The refresh token was refused outright. Retrying cannot help.
    Rejected(String),
    /// Network failure, timeout, or server error. Worth retrying.
    Transient(String),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "rejected: {msg}"),
            Self::Transient(msg) => write!(f, "transient: {msg}"),
        }
    }
}

/// The authentication endpoints consumed by the session core.
pub trait AuthBackend: Send + Sync {
    fn login<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<TokenPair, SessionError>>;

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<RefreshedTokens, RefreshError>>;
}

/// Token endpoint response. Accepts both `access`/`refresh` and the OAuth
/// style `access_token`/`refresh_token` field names.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "access")]
    access_token: String,
    #[serde(default, alias = "refresh")]
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// [`AuthBackend`] over the REST login and refresh endpoints.
pub struct HttpBackend {
    http: reqwest::Client,
    login_url: String,
    refresh_url: String,
}

impl HttpBackend {
    pub fn new(http: reqwest::Client, config: &SessionConfig) -> Self {
        Self { http, login_url: config.login_url(), refresh_url: config.refresh_url() }
    }

    async fn do_login(&self, credentials: &Credentials) -> Result<TokenPair, SessionError> {
        let resp = self.http.post(&self.login_url).json(credentials).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(SessionError::Login { status: status.as_u16(), body });
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            SessionError::Login { status: status.as_u16(), body: format!("parse response: {e}") }
        })?;
        TokenPair::from_parts(Some(token.access_token), token.refresh_token).ok_or_else(|| {
            SessionError::Login {
                status: status.as_u16(),
                body: "response is missing the refresh token".to_owned(),
            }
        })
    }

    async fn do_refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
        let resp = self
            .http
            .post(&self.refresh_url)
            .json(&RefreshRequest { refresh: refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Transient(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let body =
            resp.text().await.map_err(|e| RefreshError::Transient(format!("read body: {e}")))?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "refresh endpoint refused");
            return Err(match status.as_u16() {
                400 | 401 | 403 => RefreshError::Rejected(format!("HTTP {status}: {body}")),
                _ => RefreshError::Transient(format!("HTTP {status}: {body}")),
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshError::Transient(format!("parse response: {e}")))?;
        Ok(RefreshedTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token.filter(|r| !r.is_empty()),
        })
    }
}

impl AuthBackend for HttpBackend {
    fn login<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, Result<TokenPair, SessionError>> {
        Box::pin(self.do_login(credentials))
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<RefreshedTokens, RefreshError>> {
        Box::pin(self.do_refresh(refresh_token))
    }
}

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build the HTTP client shared by the backend and the request wrapper.
pub fn build_http_client(config: &SessionConfig) -> Result<reqwest::Client, SessionError> {
    ensure_crypto();
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| SessionError::Transport(format!("build HTTP client: {e}")))
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
