// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed token store shared by every process using the same path.
//!
//! The file holds two keys, `access_token` and `refresh_token`, written
//! atomically (tmp file + rename). A `notify` watcher on the parent directory
//! reconciles writes made by other processes into the in-memory cache and
//! republishes them as [`ChangeOrigin::External`] events.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::store::{ChangeOrigin, StoreEvent, TokenPair, TokenStore};

/// On-disk layout. Either key may be missing when another writer left a
/// partial file; such a file loads as "no pair".
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

pub struct FileStore {
    path: PathBuf,
    /// Last state this process wrote or reconciled. Held across file writes
    /// so the watcher never mistakes our own write for an external one.
    cache: Mutex<Option<TokenPair>>,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl FileStore {
    /// Open the store at `path`. A missing or unreadable file means logged out.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (event_tx, _) = broadcast::channel(64);
        let cache = read_pair(&path);
        debug!(path = %path.display(), present = cache.is_some(), "opened token store");
        Self { path, cache: Mutex::new(cache), event_tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and publish an external event if it differs from
    /// what this process last saw.
    pub fn reconcile(&self) -> Option<StoreEvent> {
        let mut cache = self.cache.lock();
        let on_disk = read_pair(&self.path);
        if *cache == on_disk {
            return None;
        }
        *cache = on_disk.clone();
        drop(cache);

        let event = match on_disk {
            Some(pair) => StoreEvent::Saved { pair, origin: ChangeOrigin::External },
            None => StoreEvent::Cleared { origin: ChangeOrigin::External },
        };
        info!(path = %self.path.display(), event = event_kind(&event), "token store changed externally");
        let _ = self.event_tx.send(event.clone());
        Some(event)
    }

    /// Watch the file for writes by other processes until `shutdown` fires.
    pub fn spawn_watcher(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, SessionError> {
        use notify::{RecursiveMode, Watcher};

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| SessionError::Storage(format!("create {}: {e}", dir.display())))?;

        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
            let _ = wake_tx.try_send(());
        })
        .map_err(|e| SessionError::Storage(format!("watcher: {e}")))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| SessionError::Storage(format!("watch {}: {e}", dir.display())))?;

        let store = Arc::clone(self);
        Ok(tokio::spawn(async move {
            // The watcher stops delivering events once dropped.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    woke = wake_rx.recv() => {
                        if woke.is_none() {
                            break;
                        }
                        store.reconcile();
                    }
                }
            }
            debug!(path = %store.path.display(), "token store watcher stopped");
        }))
    }

    fn write(&self, persisted: &PersistedTokens) -> Result<(), SessionError> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SessionError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(persisted)
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        // Unique tmp name so concurrent writers never share a tmp file.
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp = self.path.with_file_name(tmp_name);
        write_private(&tmp, json.as_bytes())
            .map_err(|e| SessionError::Storage(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| SessionError::Storage(format!("rename {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Create `path` readable by the owner only; it holds bearer tokens.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

impl TokenStore for FileStore {
    fn load(&self) -> Option<TokenPair> {
        self.cache.lock().clone()
    }

    fn save(&self, pair: &TokenPair) -> Result<(), SessionError> {
        let mut cache = self.cache.lock();
        self.write(&PersistedTokens {
            access_token: Some(pair.access_token.clone()),
            refresh_token: Some(pair.refresh_token.clone()),
        })?;
        *cache = Some(pair.clone());
        drop(cache);

        debug!(path = %self.path.display(), "persisted token pair");
        let _ = self
            .event_tx
            .send(StoreEvent::Saved { pair: pair.clone(), origin: ChangeOrigin::Local });
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        let mut cache = self.cache.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SessionError::Storage(format!(
                    "remove {}: {e}",
                    self.path.display()
                )));
            }
        }
        *cache = None;
        drop(cache);

        debug!(path = %self.path.display(), "cleared token pair");
        let _ = self.event_tx.send(StoreEvent::Cleared { origin: ChangeOrigin::Local });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }
}

fn read_pair(path: &Path) -> Option<TokenPair> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), "failed to read token store: {e}");
            return None;
        }
    };
    match serde_json::from_str::<PersistedTokens>(&data) {
        Ok(p) => TokenPair::from_parts(p.access_token, p.refresh_token),
        Err(e) => {
            warn!(path = %path.display(), "failed to parse token store: {e}");
            None
        }
    }
}

fn event_kind(event: &StoreEvent) -> &'static str {
    match event {
        StoreEvent::Saved { .. } => "saved",
        StoreEvent::Cleared { .. } => "cleared",
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
