use tgd_breaker::BreakerError;
use tgd_killswitch::KillSwitchError;
use tgd_reservation::ReservationError;
use tgd_schemas::OrderSide;

/// One order candidate to validate.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderCheck {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: i64,
    /// The caller's view of the current signed position.
    pub current_position: i64,
    /// Optional; enables the percentage limit when both price and
    /// portfolio value are present.
    pub current_price: Option<f64>,
    pub portfolio_value: Option<f64>,
    /// Skip the static position-size check (e.g. for liquidation-only
    /// flows that must always be able to reduce risk).
    pub skip_position_limit: bool,
}

impl OrderCheck {
    pub fn new(symbol: impl Into<String>, side: OrderSide, qty: i64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            qty,
            current_position: 0,
            current_price: None,
            portfolio_value: None,
            skip_position_limit: false,
        }
    }
}

/// Admission decision for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderVerdict {
    Allowed,
    Rejected { reason: String },
}

impl OrderVerdict {
    pub fn rejected(reason: impl Into<String>) -> Self {
        OrderVerdict::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, OrderVerdict::Allowed)
    }

    /// The rejection message; empty for an allowed order.
    pub fn reason(&self) -> &str {
        match self {
            OrderVerdict::Allowed => "",
            OrderVerdict::Rejected { reason } => reason,
        }
    }
}

/// One portfolio line for the exposure check.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioPosition {
    pub symbol: String,
    /// Signed quantity; zero-qty lines are ignored.
    pub qty: i64,
    pub price: f64,
}

/// The safety subsystem could not prove a safe state. Callers must
/// treat this as "refuse all orders", not as a per-order rejection.
#[derive(Debug)]
pub enum RiskError {
    KillSwitch(KillSwitchError),
    Breaker(BreakerError),
    Reservation(ReservationError),
    /// Non-positive quantity: programmer error, never retried.
    InvalidQuantity { qty: i64 },
}

impl std::fmt::Display for RiskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskError::KillSwitch(e) => write!(f, "risk check unavailable: {e}"),
            RiskError::Breaker(e) => write!(f, "risk check unavailable: {e}"),
            RiskError::Reservation(e) => write!(f, "risk check unavailable: {e}"),
            RiskError::InvalidQuantity { qty } => {
                write!(f, "invalid order quantity {qty} (must be >= 1)")
            }
        }
    }
}

impl std::error::Error for RiskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RiskError::KillSwitch(e) => Some(e),
            RiskError::Breaker(e) => Some(e),
            RiskError::Reservation(e) => Some(e),
            RiskError::InvalidQuantity { .. } => None,
        }
    }
}

impl From<KillSwitchError> for RiskError {
    fn from(e: KillSwitchError) -> Self {
        RiskError::KillSwitch(e)
    }
}

impl From<BreakerError> for RiskError {
    fn from(e: BreakerError) -> Self {
        RiskError::Breaker(e)
    }
}

impl From<ReservationError> for RiskError {
    fn from(e: ReservationError) -> Self {
        RiskError::Reservation(e)
    }
}
