use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use tgd_breaker::{BreakerConfig, CircuitBreaker, STATE_KEY};
use tgd_schemas::{BreakerState, CircuitBreakerRecord, ManualClock};
use tgd_store::{MemoryStore, StateStore};

async fn harness(quiet: Duration) -> (CircuitBreaker, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 2, 16, 14, 0, 0).unwrap(),
    ));
    let config = BreakerConfig {
        quiet_period: quiet,
        ..BreakerConfig::sane_defaults()
    };
    let cb = CircuitBreaker::new(store.clone(), clock.clone(), config)
        .await
        .unwrap();
    (cb, store, clock)
}

#[tokio::test]
async fn quiet_period_holds_until_cool_down_elapses() {
    let (cb, _store, clock) = harness(Duration::minutes(5)).await;

    cb.trip("DAILY_LOSS_EXCEEDED", None).await.unwrap();
    cb.reset("ops").await.unwrap();

    // One second short of the cool-down: still quiet.
    clock.advance(Duration::minutes(5) - Duration::seconds(1));
    assert_eq!(cb.get_state().await.unwrap(), BreakerState::QuietPeriod);

    // Cool-down elapsed: the read performs the transition and returns OPEN.
    clock.advance(Duration::seconds(1));
    assert_eq!(cb.get_state().await.unwrap(), BreakerState::Open);

    // The transition persisted; later reads see plain OPEN without
    // re-triggering anything.
    let status = cb.get_status().await.unwrap();
    assert_eq!(status.state, BreakerState::Open);
    assert!(status.reset_at.is_some());
    assert_eq!(cb.get_state().await.unwrap(), BreakerState::Open);
}

#[tokio::test]
async fn is_tripped_clears_once_quiet_period_elapses() {
    let (cb, _store, clock) = harness(Duration::seconds(60)).await;

    cb.trip("FEED_GAP", None).await.unwrap();
    assert!(cb.is_tripped().await.unwrap());

    cb.reset("ops").await.unwrap();
    assert!(!cb.is_tripped().await.unwrap());

    clock.advance(Duration::seconds(61));
    assert!(!cb.is_tripped().await.unwrap());
    assert_eq!(cb.get_status().await.unwrap().state, BreakerState::Open);
}

/// A QUIET_PERIOD record with no reset_at cannot prove the cool-down
/// elapsed; the read must return QUIET_PERIOD without attempting the
/// transition.
#[tokio::test]
async fn quiet_period_without_reset_at_does_not_transition() {
    let (cb, store, clock) = harness(Duration::seconds(1)).await;

    cb.trip("X", None).await.unwrap();
    cb.reset("ops").await.unwrap();

    // Record surgery: strip reset_at while leaving QUIET_PERIOD.
    let mut rec: CircuitBreakerRecord =
        serde_json::from_str(&store.get(STATE_KEY).await.unwrap().unwrap()).unwrap();
    rec.reset_at = None;
    store
        .set(STATE_KEY, &serde_json::to_string(&rec).unwrap())
        .await
        .unwrap();

    clock.advance(Duration::hours(1));
    assert_eq!(cb.get_state().await.unwrap(), BreakerState::QuietPeriod);
    assert_eq!(
        cb.get_status().await.unwrap().state,
        BreakerState::QuietPeriod
    );
}
