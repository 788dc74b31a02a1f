/// RSI (Relative Strength Index), updated one close at a time.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI):
/// the first `period` price changes seed plain averages of gains and losses,
/// every later change is folded in with weight `1/period`.
/// Returns `None` until `period + 1` closes have been seen.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    changes_seen: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        Self {
            period,
            prev_close: None,
            changes_seen: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        let period = self.period as f64;

        if self.changes_seen < self.period {
            // Seeding: accumulate sums, divide once the seed window is full
            self.avg_gain += gain;
            self.avg_loss += loss;
            self.changes_seen += 1;
            if self.changes_seen < self.period {
                return None;
            }
            self.avg_gain /= period;
            self.avg_loss /= period;
        } else {
            self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / period;
        }

        Some(self.value())
    }

    fn value(&self) -> f64 {
        if self.avg_loss == 0.0 {
            // Flat prices carry no momentum either way
            return if self.avg_gain == 0.0 { 50.0 } else { 100.0 };
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    pub fn is_ready(&self) -> bool {
        self.changes_seen >= self.period
    }
}
