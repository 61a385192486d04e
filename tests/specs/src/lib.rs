// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end session scenarios.
//!
//! Runs a mock token backend over real HTTP (login, rotating refresh with a
//! blacklist, one protected resource) and wires a [`Session`] to it with a
//! file-backed token store in a temp dir.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use carelink_session::claims::{self, epoch_secs};
use carelink_session::test_support::{mint_token, RecordingShell, GOOD_PASSWORD};
use carelink_session::{FileStore, Session, SessionConfig, TokenPair, TokenStore};

pub const TIMEOUT: Duration = Duration::from_secs(10);

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[derive(Default)]
struct Ledger {
    live_access: HashSet<String>,
    live_refresh: HashSet<String>,
    blacklist: HashSet<String>,
    seen_bearers: Vec<String>,
}

struct BackendState {
    access_ttl: i64,
    refresh_ttl: i64,
    jti: AtomicU64,
    login_calls: AtomicU32,
    refresh_calls: AtomicU32,
    resource_calls: AtomicU32,
    failing_refreshes: AtomicU32,
    refresh_delay_ms: AtomicU64,
    ledger: Mutex<Ledger>,
}

impl BackendState {
    fn mint(&self, kind: &str, ttl: i64) -> String {
        mint_token(json!({
            "exp": epoch_secs().saturating_add_signed(ttl),
            "token_type": kind,
            "user_id": 7,
            "role": "nurse",
            "jti": format!("{kind}-{}", self.jti.fetch_add(1, Ordering::Relaxed)),
        }))
    }

    fn issue(&self, access_ttl: i64, refresh_ttl: i64) -> TokenPair {
        let pair = TokenPair::new(self.mint("access", access_ttl), self.mint("refresh", refresh_ttl));
        let mut ledger = self.ledger.lock();
        ledger.live_access.insert(pair.access_token.clone());
        ledger.live_refresh.insert(pair.refresh_token.clone());
        pair
    }
}

/// Mock token backend. Refresh always rotates, and a rotated-away refresh
/// token is blacklisted.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<BackendState>,
}

impl MockBackend {
    /// Serve with the given lifetimes for newly issued tokens.
    pub async fn start(access_ttl: i64, refresh_ttl: i64) -> anyhow::Result<Self> {
        ensure_crypto();
        let state = Arc::new(BackendState {
            access_ttl,
            refresh_ttl,
            jti: AtomicU64::new(1),
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            resource_calls: AtomicU32::new(0),
            failing_refreshes: AtomicU32::new(0),
            refresh_delay_ms: AtomicU64::new(0),
            ledger: Mutex::new(Ledger::default()),
        });
        let app = Router::new()
            .route("/api/token/", post(login))
            .route("/api/token/refresh/", post(refresh))
            .route("/api/patients/", get(patients))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Issue a pair outside the login flow, as if from an earlier login.
    pub fn issue(&self, access_ttl: i64, refresh_ttl: i64) -> TokenPair {
        self.state.issue(access_ttl, refresh_ttl)
    }

    /// The next `n` refresh calls answer 503.
    pub fn fail_next_refreshes(&self, n: u32) {
        self.state.failing_refreshes.store(n, Ordering::SeqCst);
    }

    /// Delay every refresh response.
    pub fn set_refresh_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.refresh_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Invalidate a token server-side, as an admin action would.
    pub fn revoke(&self, token: &str) {
        let mut ledger = self.state.ledger.lock();
        ledger.live_access.remove(token);
        if ledger.live_refresh.remove(token) {
            ledger.blacklist.insert(token.to_owned());
        }
    }

    pub fn is_blacklisted(&self, token: &str) -> bool {
        self.state.ledger.lock().blacklist.contains(token)
    }

    pub fn login_calls(&self) -> u32 {
        self.state.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn resource_calls(&self) -> u32 {
        self.state.resource_calls.load(Ordering::SeqCst)
    }

    /// Bearer tokens the protected resource accepted, in arrival order.
    pub fn seen_bearers(&self) -> Vec<String> {
        self.state.ledger.lock().seen_bearers.clone()
    }
}

fn token_not_valid(detail: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": detail, "code": "token_not_valid"})))
        .into_response()
}

async fn login(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    if body["password"].as_str() != Some(GOOD_PASSWORD) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "No active account found with the given credentials"})),
        )
            .into_response();
    }
    let pair = state.issue(state.access_ttl, state.refresh_ttl);
    Json(json!({"access": pair.access_token, "refresh": pair.refresh_token})).into_response()
}

async fn refresh(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let failing = state
        .failing_refreshes
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response();
    }

    let Some(presented) = body["refresh"].as_str() else {
        return (StatusCode::BAD_REQUEST, Json(json!({"refresh": ["This field is required."]})))
            .into_response();
    };
    {
        let mut ledger = state.ledger.lock();
        if ledger.blacklist.contains(presented) {
            return token_not_valid("Token is blacklisted");
        }
        if !ledger.live_refresh.remove(presented)
            || claims::is_expired(presented, Duration::ZERO)
        {
            return token_not_valid("Token is invalid or expired");
        }
        ledger.blacklist.insert(presented.to_owned());
    }
    let pair = state.issue(state.access_ttl, state.refresh_ttl);
    Json(json!({"access": pair.access_token, "refresh": pair.refresh_token})).into_response()
}

async fn patients(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.resource_calls.fetch_add(1, Ordering::SeqCst);
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_owned();
    {
        let mut ledger = state.ledger.lock();
        if !ledger.live_access.contains(&bearer) || claims::is_expired(&bearer, Duration::ZERO) {
            return token_not_valid("Given token not valid for any token type");
        }
        ledger.seen_bearers.push(bearer);
    }
    Json(json!([{"id": 1, "name": "A. Patient"}])).into_response()
}

/// A session wired to a [`MockBackend`] through a token file in a temp dir.
pub struct Scenario {
    pub backend: MockBackend,
    pub session: Session,
    pub store: Arc<FileStore>,
    pub shell: Arc<RecordingShell>,
    _dir: tempfile::TempDir,
}

impl Scenario {
    /// Start a backend issuing 10-minute access and 1-day refresh tokens,
    /// with a fast retry delay.
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut SessionConfig)) -> anyhow::Result<Self> {
        let backend = MockBackend::start(600, 86_400).await?;
        let dir = tempfile::tempdir()?;
        let mut config = SessionConfig {
            api_url: backend.base_url(),
            refresh_retry_delay_ms: 20,
            refresh_timeout_ms: 2_000,
            token_file: Some(dir.path().join("tokens.json")),
            ..SessionConfig::default()
        };
        tweak(&mut config);

        let (session, store, shell) = open_session(config)?;
        Ok(Self { backend, session, store, shell, _dir: dir })
    }

    /// A second session over the same token file, as another process would see it.
    pub fn sibling(&self) -> anyhow::Result<Session> {
        let (session, _, _) = open_session(self.session.config().clone())?;
        Ok(session)
    }

    pub fn token_file(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }

    /// Store a backend-issued pair as if a login happened earlier.
    pub fn seed(&self, access_ttl: i64, refresh_ttl: i64) -> anyhow::Result<TokenPair> {
        let pair = self.backend.issue(access_ttl, refresh_ttl);
        self.store.save(&pair)?;
        Ok(pair)
    }

    pub fn stored(&self) -> Option<TokenPair> {
        self.store.load()
    }
}

fn open_session(
    config: SessionConfig,
) -> anyhow::Result<(Session, Arc<FileStore>, Arc<RecordingShell>)> {
    let store = Arc::new(FileStore::open(config.token_file_path()));
    let shell = Arc::new(RecordingShell::watching(Arc::clone(&store) as Arc<dyn TokenStore>));
    let session =
        Session::builder(config).file_store(Arc::clone(&store)).shell(shell.clone()).build()?;
    Ok((session, store, shell))
}
