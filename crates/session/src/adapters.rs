// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin reactive views over a [`Session`] for UI code.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::claims::{self, DecodedClaims};
use crate::error::SessionError;
use crate::request::{AuthenticatedClient, RequestOptions};
use crate::session::Session;
use crate::store::TokenPair;

/// Authentication state as the UI renders it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    pub authenticated: bool,
    /// Claims of the current access token, for display.
    pub claims: Option<DecodedClaims>,
}

impl AuthSnapshot {
    pub fn from_pair(pair: Option<&TokenPair>) -> Self {
        match pair {
            Some(pair) => Self {
                authenticated: !claims::is_expired(&pair.refresh_token, Duration::ZERO),
                claims: claims::decode(&pair.access_token).ok(),
            },
            None => Self { authenticated: false, claims: None },
        }
    }
}

/// Reactive authentication state, republished on every session event.
pub struct AuthWatch {
    rx: watch::Receiver<AuthSnapshot>,
}

impl AuthWatch {
    /// Start following `session` until `shutdown` fires.
    pub fn spawn(session: &Session, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let store = session.coordinator().store().clone();
        let mut events = session.subscribe();
        let (tx, rx) = watch::channel(AuthSnapshot::from_pair(store.load().as_ref()));

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                if let Err(RecvError::Closed) = event {
                    break;
                }
                let snapshot = AuthSnapshot::from_pair(store.load().as_ref());
                tx.send_if_modified(|current| {
                    if *current == snapshot {
                        return false;
                    }
                    *current = snapshot;
                    true
                });
            }
            debug!("auth watch stopped");
        });
        (Self { rx }, handle)
    }

    pub fn current(&self) -> AuthSnapshot {
        self.rx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.rx.borrow().authenticated
    }

    /// Wait for the next change. `None` once the watch has stopped.
    pub async fn changed(&mut self) -> Option<AuthSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn receiver(&self) -> watch::Receiver<AuthSnapshot> {
        self.rx.clone()
    }
}

/// Progress of a [`TrackedRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    Idle,
    Loading,
    Succeeded,
    Failed(String),
}

/// Request-with-loading-state convenience over [`AuthenticatedClient`].
pub struct TrackedRequest {
    client: AuthenticatedClient,
    status: watch::Sender<RequestStatus>,
}

impl TrackedRequest {
    pub fn new(client: AuthenticatedClient) -> Self {
        let (status, _) = watch::channel(RequestStatus::Idle);
        Self { client, status }
    }

    pub fn status(&self) -> RequestStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<RequestStatus> {
        self.status.subscribe()
    }

    /// Issue the request, publishing `Loading` while it runs and the outcome
    /// after. Dropping the future mid-flight returns the status to `Idle`.
    pub async fn run<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<T, SessionError> {
        let mut guard = Loading::start(&self.status);
        let result = self.client.request_json(url, options).await;
        guard.finish(match &result {
            Ok(_) => RequestStatus::Succeeded,
            Err(e) => RequestStatus::Failed(e.to_string()),
        });
        result
    }

    pub fn reset(&self) {
        self.status.send_replace(RequestStatus::Idle);
    }
}

/// Holds `Loading` for the duration of a call.
struct Loading<'a> {
    status: &'a watch::Sender<RequestStatus>,
    done: bool,
}

impl<'a> Loading<'a> {
    fn start(status: &'a watch::Sender<RequestStatus>) -> Self {
        status.send_replace(RequestStatus::Loading);
        Self { status, done: false }
    }

    fn finish(&mut self, outcome: RequestStatus) {
        self.done = true;
        self.status.send_replace(outcome);
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.status.send_replace(RequestStatus::Idle);
        }
    }
}

#[cfg(test)]
#[path = "adapters_tests.rs"]
mod tests;
