//! tgd-schemas
//!
//! Shared data model for the pre-trade control plane:
//! - control-state records (kill switch, circuit breaker) and their
//!   history entries, typed once here and JSON-encoded only at the store
//!   boundary
//! - `RiskConfig` and its sub-limit blocks
//! - `OrderSide` and the position arithmetic rule shared by the risk
//!   checker and the reservation protocol
//! - the injectable `Clock` (system + manual)
//!
//! No IO. Everything here is plain data plus deterministic helpers.

mod breaker;
mod clock;
mod config;
mod kill_switch;
mod order;

pub use breaker::{BreakerState, CircuitBreakerRecord, TripHistoryEntry};
pub use clock::{next_daily_count, Clock, ManualClock, SystemClock};
pub use config::{ConfigError, LossLimits, PortfolioLimits, PositionLimits, RiskConfig};
pub use kill_switch::{KillSwitchEventKind, KillSwitchHistoryEntry, KillSwitchRecord, KillSwitchState};
pub use order::{position_after, OrderSide, ParseSideError};
