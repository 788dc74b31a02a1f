use common::{IndicatorSnapshot, OrderSide};

/// A fast/slow moving-average crossing between two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cross {
    /// `Buy` for a golden cross (fast moves above slow), `Sell` for a death cross.
    pub side: OrderSide,
    /// |fast - slow| / slow after the cross.
    pub magnitude: f64,
    /// The spread was already in place on the first ready bar, so there is
    /// no ready snapshot on the other side of the flip.
    pub established: bool,
}

impl Cross {
    /// Price confirmation: the close must sit beyond the fast average in the
    /// direction of the cross.
    pub fn confirmed_by(&self, close: f64, fast_ma: f64) -> bool {
        match self.side {
            OrderSide::Buy => close > fast_ma,
            OrderSide::Sell => close < fast_ma,
        }
    }

    /// An RSI pinned at 100 (buy) or 0 (sell) on an established cross, as
    /// left by a warm-up window with no opposing move.
    pub fn saturated_rsi(&self, rsi: f64) -> bool {
        self.established
            && match self.side {
                OrderSide::Buy => rsi >= 100.0,
                OrderSide::Sell => rsi <= 0.0,
            }
    }
}

/// Detect a sign flip of `fast - slow` between `previous` and `current`.
///
/// `prev <= 0 < curr` is a golden cross, `prev >= 0 > curr` a death cross.
/// `current` must be ready and the post-cross distance must reach
/// `min_magnitude`.
///
/// On the first ready bar (no previous snapshot, or one still warming up)
/// a non-zero spread is reported as an established cross in its direction.
pub fn detect_cross(
    previous: Option<&IndicatorSnapshot>,
    current: &IndicatorSnapshot,
    min_magnitude: f64,
) -> Option<Cross> {
    if !current.ready {
        return None;
    }
    let after = current.spread();

    let (side, established) = match previous.filter(|p| p.ready) {
        Some(previous) => {
            let before = previous.spread();
            if before <= 0.0 && after > 0.0 {
                (OrderSide::Buy, false)
            } else if before >= 0.0 && after < 0.0 {
                (OrderSide::Sell, false)
            } else {
                return None;
            }
        }
        None if after > 0.0 => (OrderSide::Buy, true),
        None if after < 0.0 => (OrderSide::Sell, true),
        None => return None,
    };

    let magnitude = current.ma_distance();
    (magnitude >= min_magnitude).then_some(Cross { side, magnitude, established })
}
