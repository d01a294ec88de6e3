//! tgd-testkit
//!
//! Scenario harness for the control plane: one call wires a fresh
//! in-memory store, a manual clock, both halt controls, the reservation
//! protocol and a risk checker the way production wiring does —
//! explicit handles, no globals. Cross-crate scenario tests live in
//! this crate's `tests/` directory.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};

use tgd_breaker::{BreakerConfig, CircuitBreaker};
use tgd_killswitch::KillSwitch;
use tgd_reservation::PositionReservations;
use tgd_risk::RiskChecker;
use tgd_schemas::{ManualClock, RiskConfig};
use tgd_store::MemoryStore;

/// Everything a scenario needs, wired against one shared store.
pub struct ControlPlane {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub kill_switch: Arc<KillSwitch>,
    pub breaker: Arc<CircuitBreaker>,
    pub reservations: Arc<PositionReservations>,
    pub checker: RiskChecker,
}

/// Fixed, deterministic scenario start time.
pub fn scenario_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 16, 14, 30, 0).unwrap()
}

/// Wire a full control plane with default breaker tunables.
pub async fn control_plane(config: RiskConfig) -> Result<ControlPlane> {
    control_plane_with(config, BreakerConfig::sane_defaults()).await
}

/// Wire a full control plane with explicit breaker tunables.
pub async fn control_plane_with(
    config: RiskConfig,
    breaker_config: BreakerConfig,
) -> Result<ControlPlane> {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(scenario_start()));

    let kill_switch = Arc::new(KillSwitch::new(store.clone(), clock.clone()).await?);
    let breaker = Arc::new(CircuitBreaker::new(store.clone(), clock.clone(), breaker_config).await?);
    let reservations = Arc::new(PositionReservations::new(store.clone(), clock.clone()));

    config.validate()?;
    let checker = RiskChecker::new(config, kill_switch.clone(), breaker.clone())
        .with_reservations(reservations.clone());

    Ok(ControlPlane {
        store,
        clock,
        kill_switch,
        breaker,
        reservations,
        checker,
    })
}

/// Install a fmt subscriber honoring RUST_LOG; safe to call from every
/// test (later calls are no-ops).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}
