// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn from_parts_requires_both_tokens() {
    assert!(TokenPair::from_parts(Some("a".into()), Some("r".into())).is_some());
    assert!(TokenPair::from_parts(Some("a".into()), None).is_none());
    assert!(TokenPair::from_parts(None, Some("r".into())).is_none());
    assert!(TokenPair::from_parts(Some(String::new()), Some("r".into())).is_none());
}

#[test]
fn debug_output_redacts_tokens() {
    let pair = TokenPair::new("header.payload.secret-signature", "refresh-secret-value");
    let rendered = format!("{pair:?}");
    assert!(!rendered.contains("payload"));
    assert!(!rendered.contains("refresh-secret"));
    assert!(rendered.contains("nature"));
}

#[test]
fn memory_store_round_trips_and_clears() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    assert!(store.load().is_none());

    let pair = TokenPair::new("access-1", "refresh-1");
    store.save(&pair)?;
    assert_eq!(store.load(), Some(pair));

    store.clear()?;
    assert!(store.load().is_none());
    Ok(())
}

#[tokio::test]
async fn memory_store_publishes_local_events() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let mut rx = store.subscribe();

    let pair = TokenPair::new("a", "r");
    store.save(&pair)?;
    store.clear()?;

    assert_eq!(rx.recv().await?, StoreEvent::Saved { pair, origin: ChangeOrigin::Local });
    assert_eq!(rx.recv().await?, StoreEvent::Cleared { origin: ChangeOrigin::Local });
    Ok(())
}

#[tokio::test]
async fn apply_external_marks_origin() -> anyhow::Result<()> {
    let store = MemoryStore::with_pair(TokenPair::new("a", "r"));
    let mut rx = store.subscribe();

    store.apply_external(None);

    assert!(store.load().is_none());
    let event = rx.recv().await?;
    assert_eq!(event.origin(), ChangeOrigin::External);
    assert!(matches!(event, StoreEvent::Cleared { .. }));
    Ok(())
}
