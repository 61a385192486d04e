// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token persistence shared by every task of a session (and, for the file
//! store, by every process pointed at the same file).
//!
//! Each store publishes [`StoreEvent`]s so the session can react to changes
//! made elsewhere: an external clear means another process logged out.

pub mod file;

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SessionError;

pub use file::FileStore;

/// The persisted credential unit. Both members are always present; a store
/// holding only one of them loads as absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into() }
    }

    /// Build a pair from optional parts; `None` unless both are non-empty.
    pub fn from_parts(access_token: Option<String>, refresh_token: Option<String>) -> Option<Self> {
        match (access_token, refresh_token) {
            (Some(a), Some(r)) if !a.is_empty() && !r.is_empty() => Some(Self::new(a, r)),
            _ => None,
        }
    }
}

// Tokens are bearer secrets; keep them out of debug logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(token: &str) -> String {
    let tail: String = token.chars().rev().take(6).collect::<Vec<_>>().into_iter().rev().collect();
    format!("…{tail}")
}

/// Who caused a store change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// This process wrote the store.
    Local,
    /// Another process sharing the store wrote it.
    External,
}

/// Change notification published by a [`TokenStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Saved { pair: TokenPair, origin: ChangeOrigin },
    Cleared { origin: ChangeOrigin },
}

impl StoreEvent {
    pub fn origin(&self) -> ChangeOrigin {
        match self {
            Self::Saved { origin, .. } | Self::Cleared { origin } => *origin,
        }
    }
}

/// Durable key-value persistence of the [`TokenPair`].
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<TokenPair>;

    /// Replace both tokens. Readers never observe a half-updated pair.
    fn save(&self, pair: &TokenPair) -> Result<(), SessionError>;

    /// Remove both tokens.
    fn clear(&self) -> Result<(), SessionError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-process store. Used by tests and by embedders that persist elsewhere.
pub struct MemoryStore {
    pair: RwLock<Option<TokenPair>>,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self { pair: RwLock::new(None), event_tx }
    }

    pub fn with_pair(pair: TokenPair) -> Self {
        let store = Self::new();
        *store.pair.write() = Some(pair);
        store
    }

    /// Apply a change as if another process sharing this store made it.
    pub fn apply_external(&self, pair: Option<TokenPair>) {
        *self.pair.write() = pair.clone();
        let event = match pair {
            Some(pair) => StoreEvent::Saved { pair, origin: ChangeOrigin::External },
            None => StoreEvent::Cleared { origin: ChangeOrigin::External },
        };
        let _ = self.event_tx.send(event);
    }
}

impl TokenStore for MemoryStore {
    fn load(&self) -> Option<TokenPair> {
        self.pair.read().clone()
    }

    fn save(&self, pair: &TokenPair) -> Result<(), SessionError> {
        *self.pair.write() = Some(pair.clone());
        let _ = self
            .event_tx
            .send(StoreEvent::Saved { pair: pair.clone(), origin: ChangeOrigin::Local });
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        *self.pair.write() = None;
        let _ = self.event_tx.send(StoreEvent::Cleared { origin: ChangeOrigin::Local });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
