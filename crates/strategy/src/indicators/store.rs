use std::collections::VecDeque;

use tracing::warn;

use common::{Bar, Error, IndicatorSnapshot, Result};

use crate::config::IndicatorConfig;
use crate::indicators::{Atr, RollingMean, Rsi};

/// Rolling bar buffer plus incrementally maintained indicators for one
/// instrument.
///
/// Bars must arrive in strictly increasing timestamp order; anything else is
/// rejected as a data gap without touching state. `ready` latches once the
/// warm-up length has been observed.
#[derive(Debug, Clone)]
pub struct IndicatorStore {
    config: IndicatorConfig,
    bars: VecDeque<Bar>,
    fast: RollingMean,
    slow: RollingMean,
    rsi: Rsi,
    atr: Atr,
    last_rsi: f64,
    history: VecDeque<IndicatorSnapshot>,
    observed: usize,
    ready: bool,
}

impl IndicatorStore {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            bars: VecDeque::with_capacity(config.capacity),
            fast: RollingMean::new(config.fast_window),
            slow: RollingMean::new(config.slow_window),
            rsi: Rsi::new(config.rsi_window),
            atr: Atr::new(config.atr_window),
            last_rsi: 50.0,
            history: VecDeque::with_capacity(config.history_len),
            observed: 0,
            ready: false,
            config,
        }
    }

    /// Ingest one bar and return the resulting snapshot.
    pub fn update(&mut self, bar: &Bar) -> Result<IndicatorSnapshot> {
        if let Some(last) = self.bars.back() {
            if bar.timestamp <= last.timestamp {
                return Err(Error::DataGap {
                    instrument: bar.instrument.clone(),
                    last: last.timestamp,
                    got: bar.timestamp,
                });
            }
            if let Some(interval) = self.config.bar_interval_secs {
                let gap = (bar.timestamp - last.timestamp).num_seconds();
                if gap * 2 > interval as i64 * 3 {
                    warn!(
                        instrument = %bar.instrument,
                        gap_secs = gap,
                        expected_secs = interval,
                        "Missing bars detected; indicators continue across the gap"
                    );
                }
            }
        }

        if self.bars.len() == self.config.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar.clone());
        self.observed += 1;

        let fast_ma = self.fast.update(bar.close);
        let slow_ma = self.slow.update(bar.close);
        if let Some(rsi) = self.rsi.update(bar.close) {
            self.last_rsi = rsi;
        }
        let raw_atr = self.atr.update(bar.high, bar.low, bar.close);

        if self.observed >= self.config.warmup_len() {
            self.ready = true;
        }

        let mut atr = raw_atr.unwrap_or(0.0);
        let mut atr_floored = false;
        if self.ready {
            let floor = bar.close.abs() * self.config.atr_floor_ratio;
            if !(atr >= floor) {
                warn!(
                    instrument = %bar.instrument,
                    atr = atr,
                    floor = floor,
                    "ATR below floor; substituting floor"
                );
                atr = floor;
                atr_floored = true;
            }
        }

        let snapshot = IndicatorSnapshot {
            fast_ma,
            slow_ma,
            rsi: self.last_rsi,
            atr,
            close: bar.close,
            timestamp: bar.timestamp,
            ready: self.ready,
            atr_floored,
        };

        if self.history.len() == self.config.history_len {
            self.history.pop_front();
        }
        self.history.push_back(snapshot.clone());

        Ok(snapshot)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn observed(&self) -> usize {
        self.observed
    }

    pub fn warmup_len(&self) -> usize {
        self.config.warmup_len()
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<&IndicatorSnapshot> {
        self.history.back()
    }

    /// Snapshot from the bar before the most recent one.
    pub fn previous(&self) -> Option<&IndicatorSnapshot> {
        let n = self.history.len();
        if n < 2 {
            return None;
        }
        self.history.get(n - 2)
    }

    /// Retained snapshots, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &IndicatorSnapshot> {
        self.history.iter()
    }

    /// The up-to-`lookback` bars preceding the newest bar.
    fn prior_bars(&self, lookback: usize) -> impl Iterator<Item = &Bar> {
        let end = self.bars.len().saturating_sub(1);
        let start = end.saturating_sub(lookback);
        self.bars.range(start..end)
    }

    /// Highest high of the bars preceding the newest one.
    pub fn prior_high(&self, lookback: usize) -> Option<f64> {
        self.prior_bars(lookback).map(|b| b.high).reduce(f64::max)
    }

    /// Lowest low of the bars preceding the newest one.
    pub fn prior_low(&self, lookback: usize) -> Option<f64> {
        self.prior_bars(lookback).map(|b| b.low).reduce(f64::min)
    }

    /// Mean volume of the bars preceding the newest one.
    pub fn prior_avg_volume(&self, lookback: usize) -> Option<f64> {
        let (sum, count) = self
            .prior_bars(lookback)
            .fold((0.0, 0usize), |(s, n), b| (s + b.volume, n + 1));
        (count > 0).then(|| sum / count as f64)
    }
}
