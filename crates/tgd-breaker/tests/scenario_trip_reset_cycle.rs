use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use tgd_breaker::{BreakerConfig, BreakerError, CircuitBreaker, TripOutcome};
use tgd_schemas::{BreakerState, ManualClock};
use tgd_store::MemoryStore;

async fn harness() -> (CircuitBreaker, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 2, 16, 14, 0, 0).unwrap(),
    ));
    let cb = CircuitBreaker::new(store.clone(), clock.clone(), BreakerConfig::sane_defaults())
        .await
        .unwrap();
    (cb, store, clock)
}

#[tokio::test]
async fn fresh_breaker_is_open() {
    let (cb, _store, _clock) = harness().await;
    assert_eq!(cb.get_state().await.unwrap(), BreakerState::Open);
    assert!(!cb.is_tripped().await.unwrap());
    assert_eq!(cb.get_trip_reason().await.unwrap(), None);
}

#[tokio::test]
async fn trip_records_reason_details_and_daily_count() {
    let (cb, _store, _clock) = harness().await;

    let outcome = cb
        .trip("DAILY_LOSS_EXCEEDED", Some(json!({"pnl": -12_500})))
        .await
        .unwrap();
    assert!(outcome.did_trip());

    assert!(cb.is_tripped().await.unwrap());
    let status = cb.get_status().await.unwrap();
    assert_eq!(status.state, BreakerState::Tripped);
    assert_eq!(status.trip_reason.as_deref(), Some("DAILY_LOSS_EXCEEDED"));
    assert_eq!(status.trip_count_today, 1);
    assert_eq!(
        cb.get_trip_details().await.unwrap(),
        Some(json!({"pnl": -12_500}))
    );
}

#[tokio::test]
async fn double_trip_is_a_clean_noop() {
    let (cb, _store, clock) = harness().await;

    assert!(cb.trip("DAILY_LOSS_EXCEEDED", None).await.unwrap().did_trip());
    clock.advance(chrono::Duration::seconds(1));

    // Second trip observes TRIPPED and aborts: no error, no state
    // change, no second history entry.
    let second = cb.trip("SOMETHING_ELSE", None).await.unwrap();
    assert_eq!(second, TripOutcome::AlreadyTripped);

    let status = cb.get_status().await.unwrap();
    assert_eq!(status.trip_reason.as_deref(), Some("DAILY_LOSS_EXCEEDED"));
    assert_eq!(status.trip_count_today, 1);
    assert_eq!(cb.get_history(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reset_requires_tripped() {
    let (cb, _store, _clock) = harness().await;
    assert!(matches!(
        cb.reset("ops").await.unwrap_err(),
        BreakerError::NotTripped
    ));
}

#[tokio::test]
async fn reset_enters_quiet_period_and_keeps_trip_reason() {
    let (cb, _store, clock) = harness().await;

    cb.trip("ORDER_REJECT_STORM", None).await.unwrap();
    clock.advance(chrono::Duration::seconds(30));
    let rec = cb.reset("ops").await.unwrap();
    assert_eq!(rec.state, BreakerState::QuietPeriod);
    assert_eq!(rec.reset_by.as_deref(), Some("ops"));

    assert_eq!(cb.get_state().await.unwrap(), BreakerState::QuietPeriod);
    assert!(!cb.is_tripped().await.unwrap());
    // Reason persists through the quiet period for display.
    assert_eq!(
        cb.get_trip_reason().await.unwrap().as_deref(),
        Some("ORDER_REJECT_STORM")
    );
}

#[tokio::test]
async fn trip_from_quiet_period_starts_a_new_cycle() {
    let (cb, _store, clock) = harness().await;

    cb.trip("FIRST", None).await.unwrap();
    cb.reset("ops").await.unwrap();
    clock.advance(chrono::Duration::seconds(10));

    let outcome = cb.trip("SECOND", None).await.unwrap();
    assert!(outcome.did_trip());

    let status = cb.get_status().await.unwrap();
    assert_eq!(status.state, BreakerState::Tripped);
    assert_eq!(status.trip_reason.as_deref(), Some("SECOND"));
    assert_eq!(status.trip_count_today, 2);
    // The new cycle cleared the previous reset metadata.
    assert!(status.reset_at.is_none());
    assert!(status.reset_by.is_none());
}

#[tokio::test]
async fn trip_counter_rolls_over_at_utc_midnight() {
    let (cb, _store, clock) = harness().await;

    cb.trip("FIRST", None).await.unwrap();
    cb.reset("ops").await.unwrap();

    clock.advance(chrono::Duration::days(1));
    let outcome = cb.trip("NEXT_DAY", None).await.unwrap();
    let TripOutcome::Tripped(rec) = outcome else {
        panic!("expected a fresh trip");
    };
    assert_eq!(rec.trip_count_today, 1);
}
