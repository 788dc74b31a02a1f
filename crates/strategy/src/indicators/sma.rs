use std::collections::VecDeque;

/// Simple moving average over a fixed window, updated one value at a time.
///
/// While the window is filling, `value()` is the mean of what has been seen
/// so far.
#[derive(Debug, Clone)]
pub struct RollingMean {
    window: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl RollingMean {
    pub fn new(window: usize) -> Self {
        assert!(window >= 1, "moving average window must be >= 1");
        Self {
            window,
            values: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub fn update(&mut self, value: f64) -> f64 {
        if self.values.len() == self.window {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
        self.value()
    }

    pub fn value(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum / self.values.len() as f64
    }
}
