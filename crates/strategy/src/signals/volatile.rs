use common::{Decision, OrderSide, RegimeState};

use crate::config::{RegimeSizing, SignalConfig};
use crate::signals::{SignalContext, SignalGenerator};

/// Only trades capitulation-grade RSI readings while volatility is high.
#[derive(Debug, Clone)]
pub struct VolatileSignal {
    oversold: f64,
    overbought: f64,
    sizing: RegimeSizing,
}

impl VolatileSignal {
    pub fn new(cfg: &SignalConfig) -> Self {
        Self {
            oversold: cfg.volatile_oversold,
            overbought: cfg.volatile_overbought,
            sizing: cfg.volatile,
        }
    }
}

impl SignalGenerator for VolatileSignal {
    fn regime(&self) -> RegimeState {
        RegimeState::Volatile
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision {
        let rsi = ctx.current.rsi;
        if rsi <= self.oversold {
            ctx.propose(
                OrderSide::Buy,
                self.sizing,
                format!("volatile: extreme RSI {rsi:.1}"),
            )
        } else if rsi >= self.overbought {
            ctx.propose(
                OrderSide::Sell,
                self.sizing,
                format!("volatile: extreme RSI {rsi:.1}"),
            )
        } else {
            ctx.hold(format!("volatile: RSI {rsi:.1} not extreme"))
        }
    }
}
