use common::{Decision, OrderSide, RegimeState};

use crate::config::{RegimeSizing, SignalConfig};
use crate::signals::{detect_cross, SignalContext, SignalGenerator};

/// Early entries on a fresh MA cross with relaxed RSI bounds and small size.
#[derive(Debug, Clone)]
pub struct TransitionSignal {
    buy_max_rsi: f64,
    sell_min_rsi: f64,
    min_cross_magnitude: f64,
    sizing: RegimeSizing,
}

impl TransitionSignal {
    pub fn new(cfg: &SignalConfig) -> Self {
        Self {
            buy_max_rsi: cfg.transition_buy_max_rsi,
            sell_min_rsi: cfg.transition_sell_min_rsi,
            min_cross_magnitude: cfg.min_cross_magnitude,
            sizing: cfg.transition,
        }
    }
}

impl SignalGenerator for TransitionSignal {
    fn regime(&self) -> RegimeState {
        RegimeState::Transition
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision {
        let Some(cross) = detect_cross(ctx.previous, ctx.current, self.min_cross_magnitude) else {
            return ctx.hold("transition: no MA cross");
        };
        if !cross.confirmed_by(ctx.bar.close, ctx.current.fast_ma) {
            return ctx.hold(format!("transition: {} cross not confirmed by price", cross.side));
        }

        let rsi = ctx.current.rsi;
        let rsi_ok = cross.saturated_rsi(rsi)
            || match cross.side {
                OrderSide::Buy => rsi <= self.buy_max_rsi,
                OrderSide::Sell => rsi >= self.sell_min_rsi,
            };
        if !rsi_ok {
            return ctx.hold(format!("transition: RSI {rsi:.1} rejects {} cross", cross.side));
        }

        let label = match cross.side {
            OrderSide::Buy => "golden",
            OrderSide::Sell => "death",
        };
        ctx.propose(
            cross.side,
            self.sizing,
            format!(
                "transition: {label} cross ({:.3}%), RSI {rsi:.1}",
                cross.magnitude * 100.0
            ),
        )
    }
}
