// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session facade: one object per signed-in user, shared by `Arc` or by
//! cloning its cheap handles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::AuthSnapshot;
use crate::backend::{build_http_client, AuthBackend, Credentials, HttpBackend};
use crate::claims::{self, DecodedClaims};
use crate::config::SessionConfig;
use crate::coordinator::{RefreshCoordinator, RefreshPolicy};
use crate::error::SessionError;
use crate::events::{LogoutReason, NoopShell, SessionEvent, Shell};
use crate::request::{AuthenticatedClient, RequestOptions};
use crate::store::{ChangeOrigin, FileStore, StoreEvent, TokenStore};

/// Assembles a [`Session`]. Unset parts default to the file store at the
/// configured path, the HTTP backend, and a shell that never navigates.
pub struct SessionBuilder {
    config: SessionConfig,
    store: Option<Arc<dyn TokenStore>>,
    file_store: Option<Arc<FileStore>>,
    backend: Option<Arc<dyn AuthBackend>>,
    shell: Option<Arc<dyn Shell>>,
    http: Option<reqwest::Client>,
}

impl SessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self { config, store: None, file_store: None, backend: None, shell: None, http: None }
    }

    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self.file_store = None;
        self
    }

    /// Use a file store; [`Session::spawn_store_sync`] will watch it.
    pub fn file_store(mut self, store: Arc<FileStore>) -> Self {
        self.store = Some(store.clone());
        self.file_store = Some(store);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn AuthBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn shell(mut self, shell: Arc<dyn Shell>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<Session, SessionError> {
        let config = Arc::new(self.config);
        let http = match self.http {
            Some(http) => http,
            None => build_http_client(&config)?,
        };

        let (store, file_store) = match (self.store, self.file_store) {
            (Some(store), file_store) => (store, file_store),
            (None, _) => {
                let file = Arc::new(FileStore::open(config.token_file_path()));
                (file.clone() as Arc<dyn TokenStore>, Some(file))
            }
        };
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(HttpBackend::new(http.clone(), &config)));
        let shell = self.shell.unwrap_or_else(|| Arc::new(NoopShell));

        let coordinator =
            RefreshCoordinator::new(store, backend, shell, RefreshPolicy::from(&*config));
        let client = AuthenticatedClient::new(http, Arc::clone(&config), coordinator.clone());
        Ok(Session { config, coordinator, client, file_store })
    }
}

/// An authenticated session against one backend.
pub struct Session {
    config: Arc<SessionConfig>,
    coordinator: RefreshCoordinator,
    client: AuthenticatedClient,
    file_store: Option<Arc<FileStore>>,
}

impl Session {
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Cloneable request handle for tasks that outlive a borrow of the
    /// session.
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.coordinator.subscribe()
    }

    /// Exchange credentials for a token pair and persist it.
    pub async fn login(&self, credentials: &Credentials) -> Result<(), SessionError> {
        let pair = self.coordinator.backend().login(credentials).await?;
        // A bad login response says nothing about the pair already stored.
        if let Err(e) = claims::decode(&pair.access_token) {
            warn!("login returned an undecodable access token: {e}");
            return Err(e);
        }
        self.coordinator.begin_session(&pair)?;
        info!(email = %credentials.email, "logged in");
        Ok(())
    }

    /// Explicit user logout. Does not navigate.
    pub fn logout(&self) -> Result<(), SessionError> {
        self.coordinator.end_session(LogoutReason::User)
    }

    /// A pair is stored and its refresh token has not expired. The access
    /// token may still need a refresh.
    pub fn is_authenticated(&self) -> bool {
        self.coordinator
            .store()
            .load()
            .is_some_and(|p| !claims::is_expired(&p.refresh_token, Duration::ZERO))
    }

    pub fn auth_snapshot(&self) -> AuthSnapshot {
        AuthSnapshot::from_pair(self.coordinator.store().load().as_ref())
    }

    /// Claims of the stored access token, for display only.
    pub fn token_metadata(&self) -> Option<DecodedClaims> {
        let pair = self.coordinator.store().load()?;
        claims::decode(&pair.access_token).ok()
    }

    pub async fn ensure_fresh_access_token(&self) -> Result<String, SessionError> {
        self.coordinator.ensure_fresh_access_token().await
    }

    pub async fn request(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<reqwest::Response, SessionError> {
        self.client.request(url, options).await
    }

    /// Follow changes other processes make to the shared store until
    /// `shutdown` fires: an external clear ends this session, an external
    /// save is adopted.
    pub fn spawn_store_sync(
        &self,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, SessionError> {
        // Subscribe before the watcher starts so no reconciled change is missed.
        let rx = self.coordinator.store().subscribe();
        let mut handles = Vec::with_capacity(2);
        if let Some(ref file) = self.file_store {
            handles.push(file.spawn_watcher(shutdown.clone())?);
        }
        handles.push(spawn_store_listener(self.coordinator.clone(), rx, shutdown));
        Ok(handles)
    }
}

fn spawn_store_listener(
    coordinator: RefreshCoordinator,
    mut rx: broadcast::Receiver<StoreEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Ok(StoreEvent::Cleared { origin: ChangeOrigin::External }) => {
                    let _ = coordinator.end_session(LogoutReason::External);
                }
                Ok(StoreEvent::Saved { origin: ChangeOrigin::External, .. }) => {
                    coordinator.adopt_external();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "store listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("store listener stopped");
    })
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
