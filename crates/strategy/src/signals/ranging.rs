use common::{Decision, OrderSide, RegimeState};

use crate::config::{RegimeSizing, SignalConfig};
use crate::signals::{SignalContext, SignalGenerator};

/// Mean reversion inside a narrow, calm market: fade RSI extremes.
#[derive(Debug, Clone)]
pub struct RangingSignal {
    oversold: f64,
    overbought: f64,
    sizing: RegimeSizing,
}

impl RangingSignal {
    pub fn new(cfg: &SignalConfig) -> Self {
        Self {
            oversold: cfg.oversold,
            overbought: cfg.overbought,
            sizing: cfg.ranging,
        }
    }
}

impl SignalGenerator for RangingSignal {
    fn regime(&self) -> RegimeState {
        RegimeState::Ranging
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision {
        let rsi = ctx.current.rsi;
        if rsi < self.oversold {
            ctx.propose(
                OrderSide::Buy,
                self.sizing,
                format!("ranging: RSI {rsi:.1} below {:.0}", self.oversold),
            )
        } else if rsi > self.overbought {
            ctx.propose(
                OrderSide::Sell,
                self.sizing,
                format!("ranging: RSI {rsi:.1} above {:.0}", self.overbought),
            )
        } else {
            ctx.hold(format!("ranging: RSI {rsi:.1} inside band"))
        }
    }
}
