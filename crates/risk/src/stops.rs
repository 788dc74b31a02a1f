use serde::Serialize;

use common::{Bar, OrderSide, Position};

/// A protective stop guarding one side of the position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProtectiveStop {
    /// Side of the position being protected (Buy = long leg).
    pub side: OrderSide,
    pub stop_price: f64,
}

impl ProtectiveStop {
    fn breached_by(&self, bar: &Bar) -> bool {
        match self.side {
            OrderSide::Buy => bar.low <= self.stop_price,
            OrderSide::Sell => bar.high >= self.stop_price,
        }
    }
}

/// Armed stops for the long and short legs of one instrument.
#[derive(Debug, Clone, Default)]
pub struct StopBook {
    long: Option<ProtectiveStop>,
    short: Option<ProtectiveStop>,
}

impl StopBook {
    fn slot(&mut self, side: OrderSide) -> &mut Option<ProtectiveStop> {
        match side {
            OrderSide::Buy => &mut self.long,
            OrderSide::Sell => &mut self.short,
        }
    }

    /// Arm (or re-arm after aggregation) the stop for `side` at `distance`
    /// from the leg's average price.
    pub fn arm(&mut self, side: OrderSide, avg_price: f64, distance: f64) -> ProtectiveStop {
        let stop_price = match side {
            OrderSide::Buy => avg_price - distance,
            OrderSide::Sell => avg_price + distance,
        };
        let stop = ProtectiveStop { side, stop_price };
        *self.slot(side) = Some(stop);
        stop
    }

    pub fn disarm(&mut self, side: OrderSide) -> Option<ProtectiveStop> {
        self.slot(side).take()
    }

    pub fn get(&self, side: OrderSide) -> Option<ProtectiveStop> {
        match side {
            OrderSide::Buy => self.long,
            OrderSide::Sell => self.short,
        }
    }

    /// Drop stops whose leg is flat.
    pub fn sync(&mut self, position: &Position) {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            if !position.has(side) {
                self.slot(side).take();
            }
        }
    }

    /// Stops the bar's range has reached.
    pub fn triggered(&self, bar: &Bar) -> Vec<ProtectiveStop> {
        [self.long, self.short]
            .into_iter()
            .flatten()
            .filter(|stop| stop.breached_by(bar))
            .collect()
    }
}
