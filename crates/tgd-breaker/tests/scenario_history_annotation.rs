use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use tgd_breaker::{AnnotateOutcome, BreakerConfig, CircuitBreaker};
use tgd_schemas::{Clock, ManualClock};
use tgd_store::MemoryStore;

async fn harness(history_cap: i64) -> (CircuitBreaker, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 2, 16, 14, 0, 0).unwrap(),
    ));
    let config = BreakerConfig {
        history_cap,
        ..BreakerConfig::sane_defaults()
    };
    let cb = CircuitBreaker::new(store, clock.clone(), config)
        .await
        .unwrap();
    (cb, clock)
}

#[tokio::test]
async fn reset_annotation_lands_on_newest_entry() {
    let (cb, clock) = harness(1000).await;

    cb.trip("FIRST", None).await.unwrap();
    cb.reset("ops").await.unwrap();
    clock.advance(Duration::minutes(10));
    cb.trip("SECOND", None).await.unwrap();

    let reset_at = clock.now();
    let outcome = cb
        .update_history_with_reset(reset_at, "alice", Some("manual review done".to_string()))
        .await
        .unwrap();

    let AnnotateOutcome::Annotated(entry) = outcome else {
        panic!("expected annotation");
    };
    assert_eq!(entry.reason, "SECOND");
    assert_eq!(entry.reset_by.as_deref(), Some("alice"));
    assert_eq!(entry.reset_reason.as_deref(), Some("manual review done"));

    // Newest entry carries the annotation; the older one is untouched.
    let history = cb.get_history(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reason, "SECOND");
    assert!(history[0].is_annotated());
    assert_eq!(history[1].reason, "FIRST");
    assert!(!history[1].is_annotated());
}

#[tokio::test]
async fn annotation_is_idempotent() {
    let (cb, clock) = harness(1000).await;

    cb.trip("DAILY_LOSS_EXCEEDED", None).await.unwrap();
    let first_at = clock.now();
    cb.update_history_with_reset(first_at, "alice", None)
        .await
        .unwrap();

    // Second call with different metadata must be a no-op.
    clock.advance(Duration::minutes(1));
    let outcome = cb
        .update_history_with_reset(clock.now(), "mallory", Some("other".to_string()))
        .await
        .unwrap();
    assert_eq!(outcome, AnnotateOutcome::AlreadyAnnotated);

    let history = cb.get_history(1).await.unwrap();
    assert_eq!(history[0].reset_at, Some(first_at));
    assert_eq!(history[0].reset_by.as_deref(), Some("alice"));
    assert_eq!(history[0].reset_reason, None);
}

#[tokio::test]
async fn annotation_with_no_history_is_reported() {
    let (cb, clock) = harness(1000).await;
    let outcome = cb
        .update_history_with_reset(clock.now(), "ops", None)
        .await
        .unwrap();
    assert_eq!(outcome, AnnotateOutcome::NoHistory);
}

#[tokio::test]
async fn history_evicts_oldest_beyond_cap() {
    let (cb, clock) = harness(3).await;

    for n in 0..5 {
        cb.trip(&format!("TRIP_{n}"), None).await.unwrap();
        cb.reset("ops").await.unwrap();
        clock.advance(Duration::minutes(1));
    }

    let history = cb.get_history(10).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].reason, "TRIP_4");
    assert_eq!(history[2].reason, "TRIP_2");
}
