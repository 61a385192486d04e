// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token minting, a scripted backend, and a
//! recording shell.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::backend::{AuthBackend, BoxFuture, Credentials, RefreshError, RefreshedTokens};
use crate::claims::epoch_secs;
use crate::error::SessionError;
use crate::events::{LogoutReason, Shell};
use crate::store::{TokenPair, TokenStore};

/// Password accepted by [`FakeBackend::login`].
pub const GOOD_PASSWORD: &str = "correct";

const HEADER: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";

static JTI: AtomicU64 = AtomicU64::new(1);

/// Build an unsigned JWT-shaped token carrying `claims`.
pub fn mint_token(claims: Value) -> String {
    format!("{HEADER}.{}.test-signature", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

fn expiry(ttl_secs: i64) -> u64 {
    epoch_secs().saturating_add_signed(ttl_secs)
}

/// Access token expiring `ttl_secs` from now (negative for already expired).
pub fn access_token(ttl_secs: i64) -> String {
    mint_token(json!({
        "exp": expiry(ttl_secs),
        "token_type": "access",
        "user_id": 7,
        "role": "nurse",
        "jti": format!("a{}", JTI.fetch_add(1, Ordering::Relaxed)),
    }))
}

/// Refresh token expiring `ttl_secs` from now. Every call yields a distinct
/// token.
pub fn refresh_token(ttl_secs: i64) -> String {
    mint_token(json!({
        "exp": expiry(ttl_secs),
        "token_type": "refresh",
        "user_id": 7,
        "jti": format!("r{}", JTI.fetch_add(1, Ordering::Relaxed)),
    }))
}

/// A pair with the given access and refresh lifetimes.
pub fn token_pair(access_ttl_secs: i64, refresh_ttl_secs: i64) -> TokenPair {
    TokenPair::new(access_token(access_ttl_secs), refresh_token(refresh_ttl_secs))
}

/// Scripted outcome of one [`FakeBackend::refresh`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeRefresh {
    Ok,
    Transient,
    Rejected,
    /// Never answers; exercises the refresh timeout.
    Hang,
}

/// In-process [`AuthBackend`] with scripted refresh outcomes and call
/// counters. Once the script runs out every refresh succeeds.
pub struct FakeBackend {
    script: Mutex<VecDeque<FakeRefresh>>,
    latency: Duration,
    rotate: bool,
    login_pair: Mutex<Option<TokenPair>>,
    refresh_calls: AtomicU32,
    login_calls: AtomicU32,
    seen_refresh_tokens: Mutex<Vec<String>>,
    issued: Mutex<Vec<TokenPair>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            latency: Duration::ZERO,
            rotate: true,
            login_pair: Mutex::new(None),
            refresh_calls: AtomicU32::new(0),
            login_calls: AtomicU32::new(0),
            seen_refresh_tokens: Mutex::new(Vec::new()),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Queue refresh outcomes, consumed in order.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = FakeRefresh>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    /// Delay every refresh answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Answer refreshes with an access token only.
    pub fn without_rotation(mut self) -> Self {
        self.rotate = false;
        self
    }

    /// Pair returned by the next successful login instead of a fresh one.
    pub fn with_login_pair(self, pair: TokenPair) -> Self {
        *self.login_pair.lock() = Some(pair);
        self
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented to the backend, in call order.
    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.seen_refresh_tokens.lock().clone()
    }

    /// Access tokens handed out by successful refreshes, in order.
    pub fn issued_access_tokens(&self) -> Vec<String> {
        self.issued.lock().iter().map(|p| p.access_token.clone()).collect()
    }

    async fn do_refresh(&self, refresh: &str) -> Result<RefreshedTokens, RefreshError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_refresh_tokens.lock().push(refresh.to_owned());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let outcome = self.script.lock().pop_front().unwrap_or(FakeRefresh::Ok);
        match outcome {
            FakeRefresh::Ok => {
                let pair = token_pair(3600, 86_400);
                self.issued.lock().push(pair.clone());
                Ok(RefreshedTokens {
                    access_token: pair.access_token,
                    refresh_token: self.rotate.then_some(pair.refresh_token),
                })
            }
            FakeRefresh::Transient => Err(RefreshError::Transient("HTTP 503".to_owned())),
            FakeRefresh::Rejected => {
                Err(RefreshError::Rejected("HTTP 401: token is blacklisted".to_owned()))
            }
            FakeRefresh::Hang => std::future::pending().await,
        }
    }

    async fn do_login(&self, credentials: &Credentials) -> Result<TokenPair, SessionError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if credentials.password != GOOD_PASSWORD {
            return Err(SessionError::Login {
                status: 401,
                body: r#"{"detail":"No active account found with the given credentials"}"#
                    .to_owned(),
            });
        }
        Ok(self.login_pair.lock().take().unwrap_or_else(|| token_pair(3600, 86_400)))
    }
}

impl AuthBackend for FakeBackend {
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

/// [`Shell`] that records every navigation, and optionally whether the
/// store still held credentials at that moment.
#[derive(Default)]
pub struct RecordingShell {
    store: Option<Arc<dyn TokenStore>>,
    navigations: Mutex<Vec<LogoutReason>>,
    credentials_present: Mutex<Vec<bool>>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watching(store: Arc<dyn TokenStore>) -> Self {
        Self { store: Some(store), ..Self::default() }
    }

    pub fn navigations(&self) -> Vec<LogoutReason> {
        self.navigations.lock().clone()
    }

    /// For each navigation, whether the watched store still held a pair.
    pub fn credentials_present(&self) -> Vec<bool> {
        self.credentials_present.lock().clone()
    }
}

impl Shell for RecordingShell {
    fn navigate_to_login(&self, reason: LogoutReason) {
        if let Some(ref store) = self.store {
            self.credentials_present.lock().push(store.load().is_some());
        }
        self.navigations.lock().push(reason);
    }
}
