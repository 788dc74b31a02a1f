use serde::{Deserialize, Serialize};

use common::{Error, RegimeState, Result};

/// Strategy parameters for one instrument.
///
/// Lives under `[instrument.strategy]` in the session file:
/// ```toml
/// [instrument.strategy.indicators]
/// fast_window = 5
/// slow_window = 20
///
/// [instrument.strategy.regime]
/// trend_threshold = 0.002
///
/// [instrument.strategy.signals.volatile]
/// position_ratio = 0.5
/// stop_multiplier = 1.5
/// ```
/// Every field has a default, so any table may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategyParams {
    pub indicators: IndicatorConfig,
    pub regime: RegimeConfig,
    pub signals: SignalConfig,
}

impl StrategyParams {
    pub fn validate(&self) -> Result<()> {
        self.indicators.validate()?;
        self.regime.validate()?;
        self.signals.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub fast_window: usize,
    pub slow_window: usize,
    pub rsi_window: usize,
    pub atr_window: usize,
    /// Ring buffer capacity in bars. Must cover the longest lookback.
    pub capacity: usize,
    /// Number of past snapshots kept for cross detection.
    pub history_len: usize,
    /// ATR floor as a fraction of the close (0.0005 = 0.05%).
    pub atr_floor_ratio: f64,
    /// Expected bar spacing; enables missing-bar warnings when set.
    pub bar_interval_secs: Option<u64>,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            fast_window: 5,
            slow_window: 20,
            rsi_window: 14,
            atr_window: 14,
            capacity: 100,
            history_len: 10,
            atr_floor_ratio: 0.0005,
            bar_interval_secs: None,
        }
    }
}

impl IndicatorConfig {
    /// Bars needed before every indicator is defined. RSI and ATR need one
    /// extra bar for the first price change / previous close.
    pub fn warmup_len(&self) -> usize {
        self.fast_window
            .max(self.slow_window)
            .max(self.rsi_window + 1)
            .max(self.atr_window + 1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fast_window == 0 {
            return Err(invalid("indicators.fast_window", "must be >= 1"));
        }
        if self.fast_window >= self.slow_window {
            return Err(invalid(
                "indicators.fast_window",
                "must be smaller than indicators.slow_window",
            ));
        }
        if self.rsi_window < 2 {
            return Err(invalid("indicators.rsi_window", "must be >= 2"));
        }
        if self.atr_window == 0 {
            return Err(invalid("indicators.atr_window", "must be >= 1"));
        }
        if self.capacity < self.warmup_len() {
            return Err(invalid(
                "indicators.capacity",
                &format!("must cover the longest lookback ({})", self.warmup_len()),
            ));
        }
        if self.history_len < 2 {
            return Err(invalid("indicators.history_len", "must be >= 2"));
        }
        if !(self.atr_floor_ratio > 0.0 && self.atr_floor_ratio < 1.0) {
            return Err(invalid("indicators.atr_floor_ratio", "must be in (0, 1)"));
        }
        if self.bar_interval_secs == Some(0) {
            return Err(invalid("indicators.bar_interval_secs", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// MA distance above which the market is trending (0.002 = 0.2%).
    pub trend_threshold: f64,
    /// MA distance below which the market may be ranging.
    pub range_threshold: f64,
    /// ATR/price below which a narrow market counts as ranging.
    pub low_vol_threshold: f64,
    /// ATR/price above which the market is volatile.
    pub high_vol_threshold: f64,
    /// Consecutive identical classifications required before switching.
    /// 1 disables hysteresis.
    pub confirm_bars: u32,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            trend_threshold: 0.002,
            range_threshold: 0.0005,
            low_vol_threshold: 0.008,
            high_vol_threshold: 0.015,
            confirm_bars: 1,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("regime.trend_threshold", self.trend_threshold),
            ("regime.range_threshold", self.range_threshold),
            ("regime.low_vol_threshold", self.low_vol_threshold),
            ("regime.high_vol_threshold", self.high_vol_threshold),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(key, "must be a positive number"));
            }
        }
        if self.range_threshold >= self.trend_threshold {
            return Err(invalid(
                "regime.range_threshold",
                "must be smaller than regime.trend_threshold",
            ));
        }
        if self.low_vol_threshold >= self.high_vol_threshold {
            return Err(invalid(
                "regime.low_vol_threshold",
                "must be smaller than regime.high_vol_threshold",
            ));
        }
        if self.confirm_bars == 0 {
            return Err(invalid("regime.confirm_bars", "must be >= 1"));
        }
        Ok(())
    }
}

/// Sizing and stop settings for the generator of one regime.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RegimeSizing {
    pub position_ratio: f64,
    pub stop_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalConfig {
    pub oversold: f64,
    pub overbought: f64,
    /// Transition buys need RSI at or below this.
    pub transition_buy_max_rsi: f64,
    /// Transition sells need RSI at or above this.
    pub transition_sell_min_rsi: f64,
    pub volatile_oversold: f64,
    pub volatile_overbought: f64,
    /// Minimum |fast - slow| / slow right after a cross.
    pub min_cross_magnitude: f64,
    /// Bars looked back for the breakout high/low and average volume.
    pub breakout_lookback: usize,
    /// Volume multiple of the prior average that confirms a breakout.
    pub volume_factor: f64,
    pub ranging: RegimeSizing,
    pub transition: RegimeSizing,
    pub trending: RegimeSizing,
    pub volatile: RegimeSizing,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            oversold: 30.0,
            overbought: 70.0,
            transition_buy_max_rsi: 65.0,
            transition_sell_min_rsi: 35.0,
            volatile_oversold: 25.0,
            volatile_overbought: 75.0,
            min_cross_magnitude: 0.0001,
            breakout_lookback: 10,
            volume_factor: 1.2,
            ranging: RegimeSizing { position_ratio: 0.5, stop_multiplier: 1.0 },
            transition: RegimeSizing { position_ratio: 0.3, stop_multiplier: 1.0 },
            trending: RegimeSizing { position_ratio: 1.0, stop_multiplier: 2.0 },
            volatile: RegimeSizing { position_ratio: 0.5, stop_multiplier: 1.5 },
        }
    }
}

impl SignalConfig {
    pub fn sizing(&self, regime: RegimeState) -> RegimeSizing {
        match regime {
            RegimeState::Ranging => self.ranging,
            RegimeState::Transition => self.transition,
            RegimeState::Trending => self.trending,
            RegimeState::Volatile => self.volatile,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let rsi_bounds = [
            ("signals.oversold", self.oversold),
            ("signals.overbought", self.overbought),
            ("signals.transition_buy_max_rsi", self.transition_buy_max_rsi),
            ("signals.transition_sell_min_rsi", self.transition_sell_min_rsi),
            ("signals.volatile_oversold", self.volatile_oversold),
            ("signals.volatile_overbought", self.volatile_overbought),
        ];
        for (key, value) in rsi_bounds {
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(key, "must be within [0, 100]"));
            }
        }
        if self.oversold >= self.overbought {
            return Err(invalid("signals.oversold", "must be below signals.overbought"));
        }
        if self.volatile_oversold >= self.volatile_overbought {
            return Err(invalid(
                "signals.volatile_oversold",
                "must be below signals.volatile_overbought",
            ));
        }
        if !(self.min_cross_magnitude >= 0.0 && self.min_cross_magnitude.is_finite()) {
            return Err(invalid("signals.min_cross_magnitude", "must be >= 0"));
        }
        if self.breakout_lookback == 0 {
            return Err(invalid("signals.breakout_lookback", "must be >= 1"));
        }
        if !(self.volume_factor > 0.0) {
            return Err(invalid("signals.volume_factor", "must be positive"));
        }
        for (name, sizing) in [
            ("ranging", self.ranging),
            ("transition", self.transition),
            ("trending", self.trending),
            ("volatile", self.volatile),
        ] {
            if !(sizing.position_ratio > 0.0 && sizing.position_ratio <= 1.0) {
                return Err(invalid(
                    &format!("signals.{name}.position_ratio"),
                    "must be in (0, 1]",
                ));
            }
            if !(sizing.stop_multiplier > 0.0 && sizing.stop_multiplier.is_finite()) {
                return Err(invalid(
                    &format!("signals.{name}.stop_multiplier"),
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::Config(format!("{key} {reason}"))
}
