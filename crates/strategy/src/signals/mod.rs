pub mod cross;
pub mod ranging;
pub mod transition;
pub mod trending;
pub mod volatile;

pub use cross::{detect_cross, Cross};
pub use ranging::RangingSignal;
pub use transition::TransitionSignal;
pub use trending::TrendingSignal;
pub use volatile::VolatileSignal;

use common::{Action, Bar, Decision, IndicatorSnapshot, OrderSide, Position, RegimeState};

use crate::config::RegimeSizing;

/// Everything a generator may look at for one bar.
#[derive(Debug, Clone)]
pub struct SignalContext<'a> {
    pub bar: &'a Bar,
    pub current: &'a IndicatorSnapshot,
    pub previous: Option<&'a IndicatorSnapshot>,
    pub regime: RegimeState,
    /// Cached view of the real position.
    pub position: &'a Position,
    /// Highest high / lowest low / mean volume of the bars before `bar`.
    pub prior_high: Option<f64>,
    pub prior_low: Option<f64>,
    pub prior_avg_volume: Option<f64>,
    /// Loss ratio beyond which an existing same-direction position may be
    /// averaged into.
    pub add_loss_threshold: f64,
}

impl SignalContext<'_> {
    pub fn hold(&self, reason: impl Into<String>) -> Decision {
        Decision::hold(self.regime, self.bar.timestamp, reason)
    }

    /// Build a trading decision, or a hold if the entry guard refuses it.
    pub fn propose(&self, side: OrderSide, sizing: RegimeSizing, reason: impl Into<String>) -> Decision {
        if !entry_allowed(self.position, side, self.bar.close, self.add_loss_threshold) {
            return self.hold(format!("{side} blocked: same-direction position already open"));
        }
        Decision {
            action: Action::from(side),
            reason: reason.into(),
            regime: self.regime,
            position_ratio: sizing.position_ratio,
            stop_multiplier: sizing.stop_multiplier,
            atr: self.current.atr,
            observed_volume: self.position.volume(side),
            timestamp: self.bar.timestamp,
        }
    }
}

/// Same-direction duplicate guard shared by every generator.
///
/// Entry is allowed when no same-direction position exists. An existing one
/// only lets a new entry through when it is already underwater by more than
/// `add_loss_threshold`, leaving the final cap and distance checks to the
/// risk controller.
pub fn entry_allowed(position: &Position, side: OrderSide, price: f64, add_loss_threshold: f64) -> bool {
    match position.pnl_ratio(side, price) {
        None => !position.has(side),
        Some(pnl) => -pnl > add_loss_threshold,
    }
}

/// One rule set per market regime.
pub trait SignalGenerator: Send + Sync {
    /// The regime this generator trades.
    fn regime(&self) -> RegimeState;

    /// Map the bar and indicators to a decision. Must be free of side effects.
    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision;
}
