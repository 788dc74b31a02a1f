//! Average True Range (ATR), updated one bar at a time.
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|).
//! The first bar has no previous close and contributes no TR. The first
//! `period` TRs seed a plain mean, later ones use Wilder smoothing
//! (alpha = 1/period). Defined after `period + 1` bars.

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self {
            period,
            prev_close: None,
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let Some(prev_close) = self.prev_close.replace(close) else {
            return None;
        };

        let tr = true_range(high, low, prev_close);
        let period = self.period as f64;

        self.value = match self.value {
            Some(prev) => Some((prev * (period - 1.0) + tr) / period),
            None => {
                self.seed_sum += tr;
                self.seen += 1;
                (self.seen == self.period).then(|| self.seed_sum / period)
            }
        };
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

pub fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}
