// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side session lifecycle for the care platform API.
//!
//! A [`Session`] keeps a short-lived access token and a long-lived refresh
//! token in a [`TokenStore`], refreshes the access token before it expires
//! (one network refresh no matter how many tasks ask), retries a request
//! once after a 401, and ends the session centrally when the refresh token
//! is gone or refused.

pub mod adapters;
pub mod backend;
pub mod claims;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod request;
pub mod session;
pub mod store;
pub mod test_support;

pub use adapters::{AuthSnapshot, AuthWatch, RequestStatus, TrackedRequest};
pub use backend::{AuthBackend, Credentials, HttpBackend};
pub use claims::{DecodedClaims, Freshness};
pub use config::SessionConfig;
pub use coordinator::{RefreshCoordinator, RefreshPolicy, RefreshStatus};
pub use error::SessionError;
pub use events::{LogoutReason, NoopShell, SessionEvent, Shell};
pub use request::{AuthenticatedClient, RequestBody, RequestOptions};
pub use session::{Session, SessionBuilder};
pub use store::{ChangeOrigin, FileStore, MemoryStore, StoreEvent, TokenPair, TokenStore};
