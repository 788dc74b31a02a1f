use tracing::info;

use common::{IndicatorSnapshot, RegimeState};

use crate::config::RegimeConfig;

/// Raw threshold classification of one snapshot.
///
/// Checks run in order: Volatile, Trending, Ranging, then Transition as the
/// catch-all. Comparisons against thresholds are strict, so a distance
/// exactly equal to `trend_threshold` is not Trending.
pub fn raw_regime(snapshot: &IndicatorSnapshot, config: &RegimeConfig) -> RegimeState {
    let distance = snapshot.ma_distance();
    let volatility = snapshot.volatility();

    if volatility > config.high_vol_threshold {
        RegimeState::Volatile
    } else if distance > config.trend_threshold {
        RegimeState::Trending
    } else if distance < config.range_threshold && volatility < config.low_vol_threshold {
        RegimeState::Ranging
    } else {
        RegimeState::Transition
    }
}

/// Regime state machine with optional hysteresis.
///
/// With `confirm_bars == 1` every call returns the raw classification. With
/// N > 1 the first classification is adopted immediately and later switches
/// need N consecutive identical raw classifications.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
    current: Option<RegimeState>,
    candidate: Option<(RegimeState, u32)>,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            current: None,
            candidate: None,
        }
    }

    pub fn classify(&mut self, snapshot: &IndicatorSnapshot) -> RegimeState {
        let raw = raw_regime(snapshot, &self.config);

        let Some(current) = self.current else {
            self.current = Some(raw);
            return raw;
        };

        if raw == current {
            self.candidate = None;
            return current;
        }

        let streak = match self.candidate {
            Some((regime, n)) if regime == raw => n + 1,
            _ => 1,
        };

        if streak >= self.config.confirm_bars {
            info!(from = %current, to = %raw, "Regime switch");
            self.current = Some(raw);
            self.candidate = None;
            raw
        } else {
            self.candidate = Some((raw, streak));
            current
        }
    }

    pub fn current(&self) -> Option<RegimeState> {
        self.current
    }
}
