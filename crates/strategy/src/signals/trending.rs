use common::{Decision, OrderSide, RegimeState};

use crate::config::{RegimeSizing, SignalConfig};
use crate::signals::{detect_cross, SignalContext, SignalGenerator};

/// Full-size trend entries: MA cross, neutral RSI, trend strength and a
/// false-breakout filter must all agree.
#[derive(Debug, Clone)]
pub struct TrendingSignal {
    oversold: f64,
    overbought: f64,
    trend_threshold: f64,
    min_cross_magnitude: f64,
    volume_factor: f64,
    sizing: RegimeSizing,
}

impl TrendingSignal {
    pub fn new(cfg: &SignalConfig, trend_threshold: f64) -> Self {
        Self {
            oversold: cfg.oversold,
            overbought: cfg.overbought,
            trend_threshold,
            min_cross_magnitude: cfg.min_cross_magnitude,
            volume_factor: cfg.volume_factor,
            sizing: cfg.trending,
        }
    }

    /// Volume surge over the prior average, or a close beyond the prior
    /// extreme in the direction of the trade.
    fn breakout_confirmed(&self, ctx: &SignalContext<'_>, side: OrderSide) -> bool {
        let volume_surge = ctx
            .prior_avg_volume
            .is_some_and(|avg| ctx.bar.volume >= self.volume_factor * avg);
        let price_break = match side {
            OrderSide::Buy => ctx.prior_high.is_some_and(|high| ctx.bar.close > high),
            OrderSide::Sell => ctx.prior_low.is_some_and(|low| ctx.bar.close < low),
        };
        volume_surge || price_break
    }
}

impl SignalGenerator for TrendingSignal {
    fn regime(&self) -> RegimeState {
        RegimeState::Trending
    }

    fn evaluate(&self, ctx: &SignalContext<'_>) -> Decision {
        let Some(cross) = detect_cross(ctx.previous, ctx.current, self.min_cross_magnitude) else {
            return ctx.hold("trending: no MA cross");
        };
        if !cross.confirmed_by(ctx.bar.close, ctx.current.fast_ma) {
            return ctx.hold(format!("trending: {} cross not confirmed by price", cross.side));
        }

        let rsi = ctx.current.rsi;
        let neutral = rsi > self.oversold && rsi < self.overbought;
        if !neutral && !cross.saturated_rsi(rsi) {
            return ctx.hold(format!("trending: RSI {rsi:.1} outside neutral band"));
        }

        let strength = ctx.current.ma_distance();
        if strength <= self.trend_threshold {
            return ctx.hold(format!("trending: MA distance {:.3}% too weak", strength * 100.0));
        }

        if !self.breakout_confirmed(ctx, cross.side) {
            return ctx.hold("trending: breakout lacks volume or range extension");
        }

        let kind = if cross.established { "established" } else { "fresh" };
        ctx.propose(
            cross.side,
            self.sizing,
            format!(
                "trending: {kind} {} cross, strength {:.3}%, RSI {rsi:.1}",
                cross.side,
                strength * 100.0
            ),
        )
    }
}
