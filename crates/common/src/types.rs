use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volumes below this are treated as flat.
pub const VOLUME_EPSILON: f64 = 1e-9;

/// One aggregated price/volume bar for a single instrument.
/// Bars for an instrument arrive in strictly increasing `timestamp` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Side of an order or a position leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Whether an order opens new exposure or closes existing exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Offset {
    Open,
    Close,
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Offset::Open => write!(f, "open"),
            Offset::Close => write!(f, "close"),
        }
    }
}

/// Categorical market condition derived from indicator readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegimeState {
    Trending,
    Ranging,
    Volatile,
    Transition,
}

impl std::fmt::Display for RegimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegimeState::Trending => write!(f, "trending"),
            RegimeState::Ranging => write!(f, "ranging"),
            RegimeState::Volatile => write!(f, "volatile"),
            RegimeState::Transition => write!(f, "transition"),
        }
    }
}

/// Indicator readings derived from one bar.
///
/// Values are only meaningful once `ready` is true. `atr` has already been
/// raised to the configured floor when `atr_floored` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub fast_ma: f64,
    pub slow_ma: f64,
    pub rsi: f64,
    pub atr: f64,
    pub close: f64,
    pub timestamp: DateTime<Utc>,
    pub ready: bool,
    pub atr_floored: bool,
}

impl IndicatorSnapshot {
    /// Signed distance between the fast and slow moving averages.
    pub fn spread(&self) -> f64 {
        self.fast_ma - self.slow_ma
    }

    /// `|fast - slow| / slow`, or 0 when the slow average is not positive.
    pub fn ma_distance(&self) -> f64 {
        if self.slow_ma > 0.0 {
            self.spread().abs() / self.slow_ma
        } else {
            0.0
        }
    }

    /// `atr / close`, or 0 when the close is not positive.
    pub fn volatility(&self) -> f64 {
        if self.close > 0.0 {
            self.atr / self.close
        } else {
            0.0
        }
    }
}

/// What a signal generator proposes for the current bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    /// No trade this cycle.
    Hold,
}

impl Action {
    pub fn side(self) -> Option<OrderSide> {
        match self {
            Action::Buy => Some(OrderSide::Buy),
            Action::Sell => Some(OrderSide::Sell),
            Action::Hold => None,
        }
    }
}

impl From<OrderSide> for Action {
    fn from(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Action::Buy,
            OrderSide::Sell => Action::Sell,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "buy"),
            Action::Sell => write!(f, "sell"),
            Action::Hold => write!(f, "hold"),
        }
    }
}

/// Candidate decision for one update cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: String,
    pub regime: RegimeState,
    /// Fraction of the base volume to trade.
    pub position_ratio: f64,
    /// Multiplier applied to ATR for the protective stop distance.
    pub stop_multiplier: f64,
    /// ATR the decision was based on.
    pub atr: f64,
    /// Same-direction volume visible to the generator when it decided.
    pub observed_volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Decision {
    pub fn hold(regime: RegimeState, timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            reason: reason.into(),
            regime,
            position_ratio: 0.0,
            stop_multiplier: 0.0,
            atr: 0.0,
            observed_volume: 0.0,
            timestamp,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == Action::Hold
    }
}

/// Read-through view of the externally owned position for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub long_volume: f64,
    pub long_avg_price: f64,
    pub short_volume: f64,
    pub short_avg_price: f64,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl Position {
    pub fn volume(&self, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => self.long_volume,
            OrderSide::Sell => self.short_volume,
        }
    }

    pub fn avg_price(&self, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => self.long_avg_price,
            OrderSide::Sell => self.short_avg_price,
        }
    }

    pub fn has(&self, side: OrderSide) -> bool {
        self.volume(side) > VOLUME_EPSILON
    }

    /// Unrealized PnL of the `side` leg as a fraction of its average price.
    /// Positive means profitable. `None` when the leg is flat.
    pub fn pnl_ratio(&self, side: OrderSide, price: f64) -> Option<f64> {
        let avg = self.avg_price(side);
        if !self.has(side) || avg <= 0.0 {
            return None;
        }
        Some(match side {
            OrderSide::Buy => (price - avg) / avg,
            OrderSide::Sell => (avg - price) / avg,
        })
    }

    /// Fold a fill into the position using volume-weighted average prices.
    pub fn apply_fill(&mut self, fill: &Fill) {
        match fill.offset {
            Offset::Open => {
                let (volume, avg) = match fill.side {
                    OrderSide::Buy => (&mut self.long_volume, &mut self.long_avg_price),
                    OrderSide::Sell => (&mut self.short_volume, &mut self.short_avg_price),
                };
                let total = *volume + fill.volume;
                if total > VOLUME_EPSILON {
                    *avg = (*avg * *volume + fill.price * fill.volume) / total;
                }
                *volume = total;
            }
            Offset::Close => {
                // A buy closes the short leg, a sell closes the long leg.
                let (volume, avg) = match fill.side {
                    OrderSide::Buy => (&mut self.short_volume, &mut self.short_avg_price),
                    OrderSide::Sell => (&mut self.long_volume, &mut self.long_avg_price),
                };
                *volume = (*volume - fill.volume).max(0.0);
                if *volume <= VOLUME_EPSILON {
                    *volume = 0.0;
                    *avg = 0.0;
                }
            }
        }
    }
}

/// An order approved by the risk controller, ready for the execution path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionIntent {
    pub id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub offset: Offset,
    pub volume: f64,
    /// Reference price the intent was approved at.
    pub price: f64,
    pub regime: RegimeState,
    /// Distance between entry and protective stop. Zero for closing intents.
    pub stop_distance: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instrument: impl Into<String>,
        side: OrderSide,
        offset: Offset,
        volume: f64,
        price: f64,
        regime: RegimeState,
        stop_distance: f64,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            instrument: instrument.into(),
            side,
            offset,
            volume,
            price,
            regime,
            stop_distance,
            reason: reason.into(),
            timestamp,
        }
    }

    /// Protective stop level for an opening intent.
    pub fn stop_price(&self) -> Option<f64> {
        if self.offset != Offset::Open {
            return None;
        }
        Some(match self.side {
            OrderSide::Buy => self.price - self.stop_distance,
            OrderSide::Sell => self.price + self.stop_distance,
        })
    }
}

/// Execution confirmation from the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub instrument: String,
    pub side: OrderSide,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Synchronous answer to `submit_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderResult {
    Filled(Fill),
    /// Accepted; the fill arrives later as an `ExecutionEvent`.
    Working { order_id: String },
    Rejected { reason: String },
}

/// Order lifecycle status carried by asynchronous notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Working,
    Filled,
    Cancelled,
    Rejected(String),
}

/// Asynchronous notification from the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
    OrderUpdate {
        order_id: String,
        instrument: String,
        status: OrderStatus,
    },
    Fill(Fill),
}

impl ExecutionEvent {
    pub fn instrument(&self) -> &str {
        match self {
            ExecutionEvent::OrderUpdate { instrument, .. } => instrument,
            ExecutionEvent::Fill(fill) => &fill.instrument,
        }
    }
}

/// Reason a decision was refused by the risk controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    Throttled { elapsed_secs: i64 },
    PositionUnavailable,
    OrderInFlight,
    DuplicateEntry,
    PositionCapReached,
    AggregationTooClose { loss_ratio: f64 },
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::Throttled { elapsed_secs } => {
                write!(f, "throttled ({elapsed_secs}s since last signal)")
            }
            RejectionReason::PositionUnavailable => write!(f, "position cache too stale"),
            RejectionReason::OrderInFlight => write!(f, "same-direction order in flight"),
            RejectionReason::DuplicateEntry => write!(f, "duplicate same-direction entry"),
            RejectionReason::PositionCapReached => write!(f, "per-direction position cap reached"),
            RejectionReason::AggregationTooClose { loss_ratio } => {
                write!(f, "aggregation too close (loss {:.4}%)", loss_ratio * 100.0)
            }
            RejectionReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Current state of the trading engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
            EngineState::Paused => write!(f, "paused"),
        }
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start,
    Stop,
    Pause,
    Resume,
}

/// Events emitted by the risk and dispatch path.
#[derive(Debug, Clone)]
pub enum RiskEvent {
    DecisionRejected {
        instrument: String,
        action: Action,
        reason: RejectionReason,
    },
    OrderRejected {
        instrument: String,
        intent_id: String,
        reason: String,
    },
    OrderFailed {
        instrument: String,
        error: String,
    },
    StopTriggered {
        instrument: String,
        side: OrderSide,
        stop_price: f64,
        bar_price: f64,
    },
    PositionStale {
        instrument: String,
        error: String,
    },
}

/// Read-only status published per instrument for monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraderStatus {
    pub instrument: String,
    pub last_bar_at: Option<DateTime<Utc>>,
    pub last_regime: Option<RegimeState>,
    pub last_decision: Option<Decision>,
    pub indicators: Option<IndicatorSnapshot>,
    pub position: Position,
    pub position_stale: bool,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub bars_seen: u64,
}
