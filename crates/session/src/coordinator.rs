// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access token refresh.
//!
//! At most one refresh cycle runs at a time. Every caller that needs a fresh
//! token while a cycle is in flight queues a oneshot waiter and receives the
//! cycle's outcome. The cycle itself runs on its own task, so callers may be
//! dropped at any point without stranding the others.
//!
//! A session generation counter guards against stale cycles: logging out or
//! logging in while a cycle is in flight bumps the generation, and the cycle
//! discards its result when it settles. The status stays `Refreshing` until
//! that abandoned call returns, so a new cycle never overlaps it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::backend::{AuthBackend, RefreshError};
use crate::claims;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{LogoutReason, SessionEvent, Shell};
use crate::store::{ChangeOrigin, TokenPair, TokenStore};

/// Retry budget and timing for refresh cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Access tokens expiring within this window are refreshed proactively.
    pub skew: Duration,
    /// Refresh calls per cycle before giving up.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Bound on a single refresh call.
    pub timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for RefreshPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            skew: config.expiry_skew(),
            max_attempts: config.refresh_attempts,
            retry_delay: config.refresh_retry_delay(),
            timeout: config.refresh_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    Idle,
    Refreshing,
}

type Waiter = oneshot::Sender<Result<String, SessionError>>;

struct RefreshState {
    status: RefreshStatus,
    waiters: Vec<Waiter>,
    attempt_count: u32,
    generation: u64,
}

impl RefreshState {
    /// The cycle is done: return to Idle and hand back the queued waiters.
    fn settle(&mut self) -> Vec<Waiter> {
        self.status = RefreshStatus::Idle;
        self.attempt_count = 0;
        std::mem::take(&mut self.waiters)
    }

    /// Start a new session generation and hand back the queued waiters. A
    /// cycle still on the wire keeps the status until it notices.
    fn next_generation(&mut self) -> Vec<Waiter> {
        self.generation += 1;
        self.attempt_count = 0;
        std::mem::take(&mut self.waiters)
    }
}

/// What a caller of `join_or_start` needs.
#[derive(Clone, Copy)]
enum Need<'a> {
    /// A refresh, whatever the stored token.
    Refresh,
    /// A token outside the skew window.
    Fresh,
    /// Any fresh token other than this one.
    Replacing(&'a str),
}

impl Need<'_> {
    /// A stored token that already satisfies the caller.
    fn satisfied_by(&self, pair: &TokenPair, skew: Duration) -> Option<String> {
        let usable = match self {
            Need::Refresh => false,
            Need::Fresh => !claims::is_expired(&pair.access_token, skew),
            Need::Replacing(rejected) => {
                pair.access_token != *rejected && !claims::is_expired(&pair.access_token, skew)
            }
        };
        usable.then(|| pair.access_token.clone())
    }
}

/// Precondition for ending a session.
enum Guard<'a> {
    Always,
    /// Only if no other session change happened since this generation.
    Generation(u64),
    /// Only if the store still holds this access token.
    AccessToken(&'a str),
}

/// How a cycle ended.
enum CycleOutcome {
    Refreshed(TokenPair),
    Failed(LogoutReason),
    /// The session ended or restarted while the cycle ran.
    Abandoned,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    backend: Arc<dyn AuthBackend>,
    shell: Arc<dyn Shell>,
    policy: RefreshPolicy,
    state: Mutex<RefreshState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

/// Owner of the session state machine: refresh cycles, session start and
/// session end.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        backend: Arc<dyn AuthBackend>,
        shell: Arc<dyn Shell>,
        policy: RefreshPolicy,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                shell,
                policy,
                state: Mutex::new(RefreshState {
                    status: RefreshStatus::Idle,
                    waiters: Vec::new(),
                    attempt_count: 0,
                    generation: 0,
                }),
                event_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.inner.policy
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    pub fn backend(&self) -> &Arc<dyn AuthBackend> {
        &self.inner.backend
    }

    pub fn status(&self) -> RefreshStatus {
        self.inner.state.lock().status
    }

    /// Refresh calls made so far by the in-flight cycle (0 when idle).
    pub fn attempt_count(&self) -> u32 {
        self.inner.state.lock().attempt_count
    }

    /// Return a usable access token, refreshing first when the stored one is
    /// missing, expired, or inside the skew window.
    pub async fn ensure_fresh_access_token(&self) -> Result<String, SessionError> {
        self.join_or_start(Need::Fresh).await
    }

    /// Refresh regardless of the stored token's expiry. Joins a cycle already
    /// in flight instead of starting a second one.
    pub async fn force_refresh(&self) -> Result<String, SessionError> {
        self.join_or_start(Need::Refresh).await
    }

    /// Replace an access token the server refused. When another caller has
    /// already replaced it, the stored token is returned without a new cycle,
    /// so a burst of 401s costs one refresh.
    pub async fn refresh_rejected(&self, rejected: &str) -> Result<String, SessionError> {
        self.join_or_start(Need::Replacing(rejected)).await
    }

    /// Persist a freshly issued pair and start a new session generation.
    /// Callers waiting on a cycle from the previous generation receive the new
    /// access token.
    pub fn begin_session(&self, pair: &TokenPair) -> Result<(), SessionError> {
        let waiters = {
            let mut state = self.inner.state.lock();
            self.inner.store.save(pair)?;
            state.next_generation()
        };
        info!(waiters = waiters.len(), "session started");
        let _ = self.inner.event_tx.send(SessionEvent::LoggedIn);
        for waiter in waiters {
            let _ = waiter.send(Ok(pair.access_token.clone()));
        }
        Ok(())
    }

    /// End the session: clear the store, reset refresh state, publish the
    /// logout, navigate to login for forced logouts, then fail every waiter
    /// with [`SessionError::AuthExpired`].
    ///
    /// The store is cleared before any waiter resumes. An error means the
    /// store could not be cleared; every other step still ran.
    pub fn end_session(&self, reason: LogoutReason) -> Result<(), SessionError> {
        self.inner.end_session(reason, Guard::Always).unwrap_or(Ok(()))
    }

    /// End the session because the server refused `access_token` even after
    /// a refresh. A no-op when the store no longer holds that token, so
    /// concurrent failures log out once.
    pub fn end_session_for(&self, access_token: &str, reason: LogoutReason) {
        let _ = self.inner.end_session(reason, Guard::AccessToken(access_token));
    }

    /// Another process wrote a new pair to the shared store.
    pub fn adopt_external(&self) {
        debug!("adopted token pair written by another process");
        let _ = self.inner.event_tx.send(SessionEvent::Refreshed { origin: ChangeOrigin::External });
    }

    async fn join_or_start(&self, need: Need<'_>) -> Result<String, SessionError> {
        let skew = self.inner.policy.skew;
        // Lock-free fast path.
        if let Some(token) = self.inner.store.load().and_then(|p| need.satisfied_by(&p, skew)) {
            return Ok(token);
        }

        let (tx, rx) = oneshot::channel();
        let start = {
            let mut state = self.inner.state.lock();
            if state.status == RefreshStatus::Idle {
                // A cycle may have settled since the load above.
                if let Some(token) =
                    self.inner.store.load().and_then(|p| need.satisfied_by(&p, skew))
                {
                    return Ok(token);
                }
            }
            state.waiters.push(tx);
            match state.status {
                RefreshStatus::Refreshing => None,
                RefreshStatus::Idle => {
                    state.status = RefreshStatus::Refreshing;
                    Some(state.generation)
                }
            }
        };

        match start {
            Some(generation) => spawn_cycle(Arc::clone(&self.inner), generation),
            None => debug!("joining in-flight refresh cycle"),
        }

        // The sender only drops if the cycle task died; treat it as expired.
        rx.await.unwrap_or(Err(SessionError::AuthExpired))
    }
}

/// Run cycles on one task until no caller is left waiting.
fn spawn_cycle(inner: Arc<Inner>, generation: u64) {
    tokio::spawn(async move {
        let mut generation = generation;
        loop {
            debug!(generation, "starting refresh cycle");
            match inner.run_cycle(generation).await {
                Some(next) => generation = next,
                None => break,
            }
        }
    });
}

impl Inner {
    /// Returns the generation to run next when the cycle was abandoned with
    /// callers queued behind it.
    async fn run_cycle(&self, generation: u64) -> Option<u64> {
        let settled = match self.refresh_pair(generation).await {
            CycleOutcome::Refreshed(pair) => self.settle_success(generation, pair),
            CycleOutcome::Failed(reason) => {
                self.end_session(reason, Guard::Generation(generation)).is_some()
            }
            CycleOutcome::Abandoned => false,
        };
        if settled {
            return None;
        }
        debug!(generation, "refresh cycle abandoned by session change");
        self.hand_off()
    }

    /// After an abandoned cycle: go Idle, or keep the status and run again for
    /// callers that queued behind the abandoned call.
    fn hand_off(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if state.waiters.is_empty() {
            state.settle();
            return None;
        }
        Some(state.generation)
    }

    async fn refresh_pair(&self, generation: u64) -> CycleOutcome {
        let Some(current) = self.store.load() else {
            warn!("refresh needed but no token pair is stored");
            return CycleOutcome::Failed(LogoutReason::NoRefreshToken);
        };
        if claims::is_expired(&current.refresh_token, Duration::ZERO) {
            warn!("refresh token expired");
            return CycleOutcome::Failed(LogoutReason::RefreshTokenExpired);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        loop {
            let attempt = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return CycleOutcome::Abandoned;
                }
                state.attempt_count += 1;
                state.attempt_count
            };

            debug!(attempt, "calling refresh endpoint");
            let result = match tokio::time::timeout(
                self.policy.timeout,
                self.backend.refresh(&current.refresh_token),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RefreshError::Transient(format!(
                    "timed out after {}ms",
                    self.policy.timeout.as_millis()
                ))),
            };

            let err = match result {
                Ok(tokens) => match claims::decode(&tokens.access_token) {
                    Ok(_) => {
                        return CycleOutcome::Refreshed(TokenPair {
                            access_token: tokens.access_token,
                            refresh_token: tokens.refresh_token.unwrap_or(current.refresh_token),
                        });
                    }
                    Err(e) => RefreshError::Transient(e.to_string()),
                },
                Err(e) => e,
            };

            match err {
                RefreshError::Rejected(msg) => {
                    warn!(attempt, error = %msg, "refresh token rejected");
                    return CycleOutcome::Failed(LogoutReason::RefreshRejected);
                }
                RefreshError::Transient(msg) if attempt >= max_attempts => {
                    warn!(attempt, error = %msg, "refresh attempts exhausted");
                    return CycleOutcome::Failed(LogoutReason::RefreshExhausted);
                }
                RefreshError::Transient(msg) => {
                    warn!(attempt, error = %msg, "refresh attempt failed, retrying");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
            }
        }
    }

    /// False when the session changed while the call ran.
    fn settle_success(&self, generation: u64, pair: TokenPair) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(generation, "discarding refresh result from an ended session");
            return false;
        }
        if let Err(e) = self.store.save(&pair) {
            drop(state);
            error!("failed to persist refreshed tokens: {e}");
            return self
                .end_session(LogoutReason::StorageFailure, Guard::Generation(generation))
                .is_some();
        }
        let waiters = state.settle();
        drop(state);

        info!(waiters = waiters.len(), "access token refreshed");
        let _ = self.event_tx.send(SessionEvent::Refreshed { origin: ChangeOrigin::Local });
        for waiter in waiters {
            let _ = waiter.send(Ok(pair.access_token.clone()));
        }
        true
    }

    /// Returns `None` when the guard no longer holds and nothing was done.
    fn end_session(
        &self,
        reason: LogoutReason,
        guard: Guard<'_>,
    ) -> Option<Result<(), SessionError>> {
        let (cleared, waiters) = {
            let mut state = self.state.lock();
            let (holds, from_cycle) = match guard {
                Guard::Always => (true, false),
                Guard::Generation(g) => (g == state.generation, true),
                Guard::AccessToken(token) => {
                    (self.store.load().is_some_and(|p| p.access_token == token), false)
                }
            };
            if !holds {
                return None;
            }
            // An external logout already emptied the shared store.
            let cleared = match reason {
                LogoutReason::External => Ok(()),
                _ => self.store.clear(),
            };
            let mut waiters = state.next_generation();
            if from_cycle {
                waiters.extend(state.settle());
            }
            (cleared, waiters)
        };

        if let Err(ref e) = cleared {
            error!(reason = %reason, "failed to clear token store: {e}");
        }
        if reason.is_forced() {
            warn!(reason = %reason, waiters = waiters.len(), "session ended");
        } else {
            info!(reason = %reason, "logged out");
        }

        let _ = self.event_tx.send(SessionEvent::LoggedOut { reason });
        if reason.is_forced() {
            self.shell.navigate_to_login(reason);
        }
        for waiter in waiters {
            let _ = waiter.send(Err(SessionError::AuthExpired));
        }
        Some(cleared)
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
