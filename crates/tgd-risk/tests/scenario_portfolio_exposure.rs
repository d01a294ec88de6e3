use std::sync::Arc;

use chrono::{TimeZone, Utc};

use tgd_breaker::{BreakerConfig, CircuitBreaker};
use tgd_killswitch::KillSwitch;
use tgd_risk::{PortfolioPosition, RiskChecker};
use tgd_schemas::{ManualClock, RiskConfig};
use tgd_store::MemoryStore;

async fn checker(cfg: RiskConfig) -> RiskChecker {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 2, 16, 14, 0, 0).unwrap(),
    ));
    let ks = Arc::new(
        KillSwitch::new(store.clone(), clock.clone())
            .await
            .unwrap(),
    );
    let cb = Arc::new(
        CircuitBreaker::new(store, clock, BreakerConfig::sane_defaults())
            .await
            .unwrap(),
    );
    RiskChecker::new(cfg, ks, cb)
}

fn limits(total: f64, long: f64, short: f64) -> RiskConfig {
    let mut cfg = RiskConfig::sane_defaults();
    cfg.portfolio.max_total_notional = total;
    cfg.portfolio.max_long_exposure = long;
    cfg.portfolio.max_short_exposure = short;
    cfg
}

fn pos(symbol: &str, qty: i64, price: f64) -> PortfolioPosition {
    PortfolioPosition {
        symbol: symbol.to_string(),
        qty,
        price,
    }
}

#[tokio::test]
async fn empty_portfolio_passes() {
    let rc = checker(limits(100_000.0, 50_000.0, 50_000.0)).await;
    assert!(rc.check_portfolio_exposure(&[]).is_allowed());
}

#[tokio::test]
async fn within_all_limits_passes() {
    let rc = checker(limits(100_000.0, 50_000.0, 50_000.0)).await;
    let verdict = rc.check_portfolio_exposure(&[
        pos("AAPL", 100, 150.0),  // +15k long
        pos("MSFT", -50, 300.0),  // 15k short
        pos("FLAT", 0, 999.0),    // ignored
    ]);
    assert!(verdict.is_allowed());
}

#[tokio::test]
async fn total_notional_violation_wins_over_later_checks() {
    // Long alone also breaches, but total is checked first.
    let rc = checker(limits(20_000.0, 10_000.0, 50_000.0)).await;
    let verdict = rc.check_portfolio_exposure(&[pos("AAPL", 200, 150.0)]); // 30k
    assert!(!verdict.is_allowed());
    assert!(verdict.reason().starts_with("Total notional"));
    assert!(verdict.reason().contains("30000.00"));
    assert!(verdict.reason().contains("20000.00"));
}

#[tokio::test]
async fn long_exposure_checked_before_short() {
    let rc = checker(limits(1_000_000.0, 10_000.0, 10_000.0)).await;
    let verdict = rc.check_portfolio_exposure(&[
        pos("AAPL", 100, 150.0), // 15k long — breach
        pos("MSFT", -50, 300.0), // 15k short — also breach
    ]);
    assert!(verdict.reason().starts_with("Long exposure"));
}

#[tokio::test]
async fn short_exposure_violation_reported_with_magnitude() {
    let rc = checker(limits(1_000_000.0, 100_000.0, 10_000.0)).await;
    let verdict = rc.check_portfolio_exposure(&[pos("MSFT", -50, 300.0)]); // 15k short
    assert!(!verdict.is_allowed());
    assert!(verdict.reason().starts_with("Short exposure"));
    assert!(verdict.reason().contains("15000.00"));
}
