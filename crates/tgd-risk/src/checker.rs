use std::sync::Arc;

use tracing::warn;

use tgd_breaker::CircuitBreaker;
use tgd_killswitch::KillSwitch;
use tgd_reservation::{PositionReservations, ReservationError, ReserveOutcome};
use tgd_schemas::{position_after, RiskConfig};

use crate::types::{OrderCheck, OrderVerdict, PortfolioPosition, RiskError};

/// The admission gate. Holds the immutable [`RiskConfig`] plus handles
/// to the halt controls; every check re-reads control state from the
/// store — nothing is cached between calls.
pub struct RiskChecker {
    config: RiskConfig,
    kill_switch: Arc<KillSwitch>,
    breaker: Arc<CircuitBreaker>,
    reservations: Option<Arc<PositionReservations>>,
}

impl RiskChecker {
    pub fn new(
        config: RiskConfig,
        kill_switch: Arc<KillSwitch>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            kill_switch,
            breaker,
            reservations: None,
        }
    }

    /// Wire in the reservation collaborator; enables the atomic path of
    /// [`validate_order_with_reservation`](Self::validate_order_with_reservation).
    pub fn with_reservations(mut self, reservations: Arc<PositionReservations>) -> Self {
        self.reservations = Some(reservations);
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Ordered fail-fast validation. See the crate docs for the check
    /// order; the first failing check's message is returned verbatim.
    pub async fn validate_order(&self, check: &OrderCheck) -> Result<OrderVerdict, RiskError> {
        ensure_qty(check.qty)?;

        if let Some(verdict) = self.check_halts(check).await? {
            return Ok(verdict);
        }

        // 3: static position size limit.
        if !check.skip_position_limit {
            let new_position = position_after(check.current_position, check.side, check.qty);
            let max = self.config.position.max_position_size;
            // unsigned_abs: |i64::MIN| must not wrap back under the limit.
            if new_position.unsigned_abs() > max.unsigned_abs() {
                return Ok(OrderVerdict::rejected(format!(
                    "Position limit exceeded: new position {new_position} would exceed max {max}"
                )));
            }
        }

        // 4: percentage limit (opportunistic).
        if let Some(verdict) = self.check_position_pct(check) {
            return Ok(verdict);
        }

        Ok(OrderVerdict::Allowed)
    }

    /// Like [`validate_order`](Self::validate_order), but delegates the
    /// position-size check to an atomic reservation when the
    /// collaborator is configured. On a rejected-but-reserved order the
    /// caller owns the returned token and must release it when it
    /// abandons the order (the same obligation it has for any order it
    /// does not submit).
    pub async fn validate_order_with_reservation(
        &self,
        check: &OrderCheck,
    ) -> Result<(OrderVerdict, Option<ReserveOutcome>), RiskError> {
        let Some(reservations) = &self.reservations else {
            return Ok((self.validate_order(check).await?, None));
        };

        ensure_qty(check.qty)?;

        if let Some(verdict) = self.check_halts(check).await? {
            return Ok((verdict, None));
        }

        // 3, atomic: the reservation re-checks against the store's
        // authoritative counter, not the caller's belief.
        let outcome = if check.skip_position_limit {
            None
        } else {
            let outcome = reservations
                .reserve(
                    &check.symbol,
                    check.side,
                    check.qty,
                    self.config.position.max_position_size,
                    check.current_position,
                )
                .await?;
            if !outcome.success {
                let reason = outcome.reason.clone();
                return Ok((OrderVerdict::rejected(reason), Some(outcome)));
            }
            Some(outcome)
        };

        // 4 still runs against the caller-supplied numbers.
        if let Some(verdict) = self.check_position_pct(check) {
            return Ok((verdict, outcome));
        }

        Ok((OrderVerdict::Allowed, outcome))
    }

    /// Portfolio-wide exposure check: total, then long, then short.
    /// Pure arithmetic over the supplied snapshot; an empty snapshot
    /// passes.
    pub fn check_portfolio_exposure(&self, positions: &[PortfolioPosition]) -> OrderVerdict {
        let mut total = 0.0_f64;
        let mut long = 0.0_f64;
        let mut short = 0.0_f64;
        for p in positions {
            if p.qty == 0 {
                continue;
            }
            let notional = p.qty as f64 * p.price;
            total += notional.abs();
            if p.qty > 0 {
                long += notional;
            } else {
                short += notional.abs();
            }
        }

        let limits = &self.config.portfolio;
        if total > limits.max_total_notional {
            return OrderVerdict::rejected(format!(
                "Total notional ${total:.2} exceeds limit ${:.2}",
                limits.max_total_notional
            ));
        }
        if long > limits.max_long_exposure {
            return OrderVerdict::rejected(format!(
                "Long exposure ${long:.2} exceeds limit ${:.2}",
                limits.max_long_exposure
            ));
        }
        if short > limits.max_short_exposure {
            return OrderVerdict::rejected(format!(
                "Short exposure ${short:.2} exceeds limit ${:.2}",
                limits.max_short_exposure
            ));
        }
        OrderVerdict::Allowed
    }

    /// Pass-through to the reservation collaborator. `Ok(false)` when no
    /// collaborator is configured or the token is unknown; store
    /// failures still propagate.
    pub async fn confirm_reservation(&self, symbol: &str, token: &str) -> Result<bool, RiskError> {
        let Some(reservations) = &self.reservations else {
            return Ok(false);
        };
        match reservations.confirm(symbol, token).await {
            Ok(()) => Ok(true),
            Err(ReservationError::UnknownToken { .. }) => {
                warn!(symbol, token, "confirm for unknown reservation token");
                Ok(false)
            }
            Err(e) => Err(RiskError::Reservation(e)),
        }
    }

    /// Pass-through to the reservation collaborator; same contract as
    /// [`confirm_reservation`](Self::confirm_reservation).
    pub async fn release_reservation(&self, symbol: &str, token: &str) -> Result<bool, RiskError> {
        let Some(reservations) = &self.reservations else {
            return Ok(false);
        };
        match reservations.release(symbol, token).await {
            Ok(()) => Ok(true),
            Err(ReservationError::UnknownToken { .. }) => {
                warn!(symbol, token, "release for unknown reservation token");
                Ok(false)
            }
            Err(e) => Err(RiskError::Reservation(e)),
        }
    }

    // -- internals ----------------------------------------------------------

    /// Checks 0–2: kill switch, breaker, blacklist. Each control is
    /// re-read from the store; any read failure propagates as
    /// [`RiskError`] — an unknown halt state never admits an order.
    async fn check_halts(&self, check: &OrderCheck) -> Result<Option<OrderVerdict>, RiskError> {
        if self.kill_switch.is_engaged().await? {
            return Ok(Some(OrderVerdict::rejected(
                "Kill switch ENGAGED: all trading halted",
            )));
        }

        if self.breaker.is_tripped().await? {
            let reason = self
                .breaker
                .get_trip_reason()
                .await?
                .unwrap_or_else(|| "unknown".to_string());
            return Ok(Some(OrderVerdict::rejected(format!(
                "Circuit breaker TRIPPED: {reason}"
            ))));
        }

        if self.config.is_blacklisted(&check.symbol) {
            return Ok(Some(OrderVerdict::rejected(format!(
                "Symbol {} is blacklisted",
                check.symbol
            ))));
        }

        Ok(None)
    }

    /// Check 4. Opportunistic: runs only when price and portfolio value
    /// are both present and usable; otherwise it is skipped, not failed.
    fn check_position_pct(&self, check: &OrderCheck) -> Option<OrderVerdict> {
        let (Some(price), Some(portfolio_value)) = (check.current_price, check.portfolio_value)
        else {
            return None;
        };
        if !portfolio_value.is_finite() || portfolio_value <= 0.0 {
            return None;
        }

        let notional = check.qty as f64 * price;
        let pct = notional / portfolio_value;
        let max_pct = self.config.position.max_position_pct;
        if pct > max_pct {
            return Some(OrderVerdict::rejected(format!(
                "Position size {:.1}% of portfolio exceeds max {:.1}% (${:.2} notional vs ${:.2} portfolio)",
                pct * 100.0,
                max_pct * 100.0,
                notional,
                portfolio_value
            )));
        }
        None
    }
}

fn ensure_qty(qty: i64) -> Result<(), RiskError> {
    if qty <= 0 {
        return Err(RiskError::InvalidQuantity { qty });
    }
    Ok(())
}
