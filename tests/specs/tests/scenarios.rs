// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session scenarios over real HTTP and a real token file.

use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use carelink_session::test_support::GOOD_PASSWORD;
use carelink_session::{
    ChangeOrigin, Credentials, LogoutReason, Session, SessionError, SessionEvent,
};
use carelink_specs::{Scenario, TIMEOUT};

/// Wait until `expected` arrives, skipping other events.
async fn wait_for_event(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    expected: SessionEvent,
) -> anyhow::Result<()> {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            if events.recv().await? == expected {
                return anyhow::Ok(());
            }
        }
    })
    .await?
}

async fn fetch_patients(session: &Session) -> Result<Value, SessionError> {
    session.client().request_json("/api/patients/", &Default::default()).await
}

// -- Expiry-driven refresh ----------------------------------------------------

#[tokio::test]
async fn near_expiry_access_token_is_refreshed() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    let seeded = s.seed(30, 86_400)?;

    let token = s.session.ensure_fresh_access_token().await?;

    assert_ne!(token, seeded.access_token);
    assert_eq!(s.backend.refresh_calls(), 1);
    let stored = s.stored().ok_or_else(|| anyhow::anyhow!("store empty"))?;
    assert_eq!(stored.access_token, token);
    assert_ne!(stored.refresh_token, seeded.refresh_token);
    assert!(s.backend.is_blacklisted(&seeded.refresh_token));
    Ok(())
}

#[tokio::test]
async fn valid_access_token_is_used_as_is() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    let seeded = s.seed(600, 86_400)?;

    let token = s.session.ensure_fresh_access_token().await?;

    assert_eq!(token, seeded.access_token);
    assert_eq!(s.backend.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_one_refresh() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    s.seed(30, 86_400)?;
    s.backend.set_refresh_delay(Duration::from_millis(100));

    let results = join_all((0..5).map(|_| fetch_patients(&s.session))).await;

    for result in results {
        assert_eq!(result?[0]["id"], 1);
    }
    assert_eq!(s.backend.refresh_calls(), 1);
    let stored = s.stored().ok_or_else(|| anyhow::anyhow!("store empty"))?;
    let bearers = s.backend.seen_bearers();
    assert_eq!(bearers.len(), 5);
    assert!(bearers.iter().all(|b| *b == stored.access_token));
    Ok(())
}

#[tokio::test]
async fn exhausted_refresh_budget_logs_out_every_waiter() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    s.seed(30, 86_400)?;
    s.backend.fail_next_refreshes(3);
    let mut events = s.session.subscribe();

    let results = join_all((0..5).map(|_| s.session.ensure_fresh_access_token())).await;

    for result in results {
        assert_eq!(result, Err(SessionError::AuthExpired));
    }
    assert_eq!(s.backend.refresh_calls(), 3);
    assert!(s.stored().is_none());
    assert_eq!(s.shell.navigations(), vec![LogoutReason::RefreshExhausted]);
    assert_eq!(s.shell.credentials_present(), vec![false]);
    wait_for_event(
        &mut events,
        SessionEvent::LoggedOut { reason: LogoutReason::RefreshExhausted },
    )
    .await?;
    Ok(())
}

#[tokio::test]
async fn missing_refresh_token_fails_without_network() -> anyhow::Result<()> {
    let s = Scenario::start().await?;

    let result = s.session.ensure_fresh_access_token().await;

    assert_eq!(result, Err(SessionError::AuthExpired));
    assert_eq!(s.backend.refresh_calls(), 0);
    assert_eq!(s.backend.login_calls(), 0);
    assert_eq!(s.backend.resource_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn transient_failure_recovers_within_budget() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    s.seed(30, 86_400)?;
    s.backend.fail_next_refreshes(2);

    let patients = fetch_patients(&s.session).await?;

    assert_eq!(patients[0]["name"], "A. Patient");
    assert_eq!(s.backend.refresh_calls(), 3);
    assert!(s.shell.navigations().is_empty());
    Ok(())
}

// -- Rotation and revocation --------------------------------------------------

#[tokio::test]
async fn rotated_refresh_token_is_never_presented_again() -> anyhow::Result<()> {
    let s = Scenario::start_with(|c| c.expiry_skew_secs = 900).await?;
    let seeded = s.seed(600, 86_400)?;

    // With the skew above the access lifetime, every call refreshes.
    let first = s.session.ensure_fresh_access_token().await?;
    let second = s.session.ensure_fresh_access_token().await?;

    assert_ne!(first, second);
    assert_eq!(s.backend.refresh_calls(), 2);
    assert!(s.backend.is_blacklisted(&seeded.refresh_token));
    assert!(s.shell.navigations().is_empty());
    Ok(())
}

#[tokio::test]
async fn revoked_refresh_token_ends_session_without_retries() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    let seeded = s.seed(30, 86_400)?;
    s.backend.revoke(&seeded.refresh_token);

    let result = fetch_patients(&s.session).await;

    assert_eq!(result, Err(SessionError::AuthExpired));
    assert_eq!(s.backend.refresh_calls(), 1);
    assert_eq!(s.backend.resource_calls(), 0);
    assert!(s.stored().is_none());
    assert_eq!(s.shell.navigations(), vec![LogoutReason::RefreshRejected]);
    Ok(())
}

#[tokio::test]
async fn server_side_401_refreshes_and_retries_once() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    let seeded = s.seed(600, 86_400)?;
    s.backend.revoke(&seeded.access_token);

    let patients = fetch_patients(&s.session).await?;

    assert_eq!(patients[0]["id"], 1);
    assert_eq!(s.backend.refresh_calls(), 1);
    assert_eq!(s.backend.resource_calls(), 2);
    let stored = s.stored().ok_or_else(|| anyhow::anyhow!("store empty"))?;
    assert_eq!(s.backend.seen_bearers(), vec![stored.access_token]);
    Ok(())
}

// -- Login and logout ---------------------------------------------------------

#[tokio::test]
async fn login_then_request_then_logout() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    let mut events = s.session.subscribe();

    s.session.login(&Credentials::new("nurse@clinic.test", GOOD_PASSWORD)).await?;
    assert!(s.session.is_authenticated());
    assert!(s.token_file().exists());
    wait_for_event(&mut events, SessionEvent::LoggedIn).await?;

    fetch_patients(&s.session).await?;
    assert_eq!(s.backend.refresh_calls(), 0);

    s.session.logout()?;
    assert!(!s.session.is_authenticated());
    assert!(s.stored().is_none());
    assert!(s.shell.navigations().is_empty());

    let result = fetch_patients(&s.session).await;
    assert_eq!(result, Err(SessionError::AuthExpired));
    assert_eq!(s.backend.resource_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn wrong_password_stores_nothing() -> anyhow::Result<()> {
    let s = Scenario::start().await?;

    let result = s.session.login(&Credentials::new("nurse@clinic.test", "nope")).await;

    assert!(matches!(result, Err(SessionError::Login { status: 401, .. })));
    assert!(s.stored().is_none());
    Ok(())
}

// -- Shared token file --------------------------------------------------------

#[tokio::test]
async fn rotation_by_one_process_is_adopted_by_another() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    s.seed(30, 86_400)?;
    let other = s.sibling()?;
    let shutdown = CancellationToken::new();
    let _sync = other.spawn_store_sync(shutdown.clone())?;
    let mut events = other.subscribe();

    let token = s.session.ensure_fresh_access_token().await?;
    wait_for_event(&mut events, SessionEvent::Refreshed { origin: ChangeOrigin::External })
        .await?;

    assert_eq!(other.ensure_fresh_access_token().await?, token);
    assert_eq!(s.backend.refresh_calls(), 1);
    shutdown.cancel();
    Ok(())
}

#[tokio::test]
async fn logout_in_one_process_ends_the_other() -> anyhow::Result<()> {
    let s = Scenario::start().await?;
    s.seed(600, 86_400)?;
    let other = s.sibling()?;
    let shutdown = CancellationToken::new();
    let _sync = other.spawn_store_sync(shutdown.clone())?;
    let mut events = other.subscribe();

    s.session.logout()?;
    wait_for_event(&mut events, SessionEvent::LoggedOut { reason: LogoutReason::External })
        .await?;

    assert!(!other.is_authenticated());
    assert_eq!(fetch_patients(&other).await, Err(SessionError::AuthExpired));
    shutdown.cancel();
    Ok(())
}
