use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{
    Bar, Decision, Error, ExecutionIntent, Fill, Offset, OrderSide, OrderStatus, Position,
    RegimeState, RejectionReason, Result, RiskEvent, VOLUME_EPSILON,
};

use crate::cache::PositionCache;
use crate::stops::StopBook;
use crate::throttle::SignalThrottle;

/// Per-instrument risk parameters, `[instrument.risk]` in the session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Volume of one full-size entry; decisions trade a ratio of it.
    pub base_volume: f64,
    /// Minimum seconds between accepted decisions (inclusive).
    pub min_signal_interval_secs: u64,
    /// Open same-direction entries at which new entries stop.
    pub max_per_direction: u32,
    /// Loss ratio an existing position must exceed before adding to it.
    pub add_loss_threshold: f64,
    /// Stop distance floor as a fraction of price.
    pub min_stop_ratio: f64,
    pub cache_ttl_secs: u64,
    pub refresh_timeout_ms: u64,
    /// Hard ceiling on cache age; beyond it no new exposure is opened.
    pub max_cache_age_secs: u64,
    /// Close a profitable opposing position instead of opening against it.
    pub close_profitable_opposite: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_volume: 1.0,
            min_signal_interval_secs: 60,
            max_per_direction: 2,
            add_loss_threshold: 0.002,
            min_stop_ratio: 0.0005,
            cache_ttl_secs: 30,
            refresh_timeout_ms: 2_000,
            max_cache_age_secs: 120,
            close_profitable_opposite: true,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.base_volume > 0.0 && self.base_volume.is_finite()) {
            return Err(Error::Config("risk.base_volume must be positive".into()));
        }
        if self.max_per_direction == 0 {
            return Err(Error::Config("risk.max_per_direction must be >= 1".into()));
        }
        if !(self.add_loss_threshold >= 0.0 && self.add_loss_threshold < 1.0) {
            return Err(Error::Config("risk.add_loss_threshold must be in [0, 1)".into()));
        }
        if !(self.min_stop_ratio > 0.0 && self.min_stop_ratio < 1.0) {
            return Err(Error::Config("risk.min_stop_ratio must be in (0, 1)".into()));
        }
        if self.cache_ttl_secs == 0 || self.refresh_timeout_ms == 0 {
            return Err(Error::Config(
                "risk.cache_ttl_secs and risk.refresh_timeout_ms must be positive".into(),
            ));
        }
        if self.max_cache_age_secs < self.cache_ttl_secs {
            return Err(Error::Config(
                "risk.max_cache_age_secs must be >= risk.cache_ttl_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.max_cache_age_secs)
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    intent: ExecutionIntent,
    order_id: Option<String>,
}

impl InFlight {
    fn matches_order(&self, order_id: &str) -> bool {
        self.intent.id == order_id || self.order_id.as_deref() == Some(order_id)
    }
}

/// Opening fills per leg since that leg was last flat.
#[derive(Debug, Clone, Copy, Default)]
struct EntryCount {
    long: u32,
    short: u32,
}

impl EntryCount {
    fn get(&self, side: OrderSide) -> u32 {
        match side {
            OrderSide::Buy => self.long,
            OrderSide::Sell => self.short,
        }
    }

    fn record(&mut self, side: OrderSide) {
        match side {
            OrderSide::Buy => self.long += 1,
            OrderSide::Sell => self.short += 1,
        }
    }

    /// Forget the count of any leg the position shows flat.
    fn sync(&mut self, position: &Position) {
        if !position.has(OrderSide::Buy) {
            self.long = 0;
        }
        if !position.has(OrderSide::Sell) {
            self.short = 0;
        }
    }
}

/// The gatekeeper between signal generation and the decision dispatcher.
///
/// Every decision that would change exposure passes `process()`; nothing else
/// builds opening intents. Owns the throttle, the stop book and the in-flight
/// ledger for one instrument, and reads the position through the shared
/// cache.
pub struct RiskController {
    instrument: String,
    config: RiskConfig,
    throttle: SignalThrottle,
    cache: PositionCache,
    stops: StopBook,
    entries: EntryCount,
    in_flight: HashMap<String, InFlight>,
    risk_event_tx: mpsc::Sender<RiskEvent>,
}

impl RiskController {
    pub fn new(
        config: RiskConfig,
        cache: PositionCache,
        risk_event_tx: mpsc::Sender<RiskEvent>,
    ) -> Self {
        Self {
            instrument: cache.instrument().to_string(),
            throttle: SignalThrottle::new(config.min_signal_interval_secs),
            config,
            cache,
            stops: StopBook::default(),
            entries: EntryCount::default(),
            in_flight: HashMap::new(),
            risk_event_tx,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn cache(&self) -> &PositionCache {
        &self.cache
    }

    pub fn stops(&self) -> &StopBook {
        &self.stops
    }

    pub fn last_signal_at(&self) -> Option<DateTime<Utc>> {
        self.throttle.last_signal_at()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Same-direction entries filled here since the leg was last flat.
    pub fn entries(&self, side: OrderSide) -> u32 {
        self.entries.get(side)
    }

    /// Entries held on `side`: the local count, or the held volume in units
    /// of `entry_volume` when that is larger (positions opened elsewhere).
    fn open_entries(&self, side: OrderSide, held: f64, entry_volume: f64) -> u32 {
        let by_volume = if held > VOLUME_EPSILON && entry_volume > VOLUME_EPSILON {
            (held / entry_volume - VOLUME_EPSILON).ceil() as u32
        } else {
            0
        };
        self.entries.get(side).max(by_volume)
    }

    /// Gate a decision and turn it into an intent, or say why not.
    ///
    /// An accepted intent is recorded as in flight and holds the throttle
    /// until the dispatcher reports it filled or rejected.
    pub async fn process(
        &mut self,
        decision: &Decision,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<ExecutionIntent, RejectionReason> {
        match self.gate(decision, price, now).await {
            Ok(intent) => {
                self.throttle.mark(now, &intent.id);
                self.track_in_flight(intent.clone());
                info!(
                    instrument = %self.instrument,
                    intent_id = %intent.id,
                    side = %intent.side,
                    offset = %intent.offset,
                    volume = intent.volume,
                    stop_distance = intent.stop_distance,
                    regime = %intent.regime,
                    "Decision approved by RiskController"
                );
                Ok(intent)
            }
            Err(reason) => {
                self.reject(decision, reason.clone()).await;
                Err(reason)
            }
        }
    }

    async fn gate(
        &mut self,
        decision: &Decision,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<ExecutionIntent, RejectionReason> {
        let Some(side) = decision.action.side() else {
            return Err(RejectionReason::Other("hold decisions carry no order".into()));
        };
        if !(price.is_finite() && price > 0.0) {
            return Err(RejectionReason::Other(format!("invalid price {price}")));
        }

        // 1. Throttle
        self.throttle.permits(now)?;

        // 2. Forced refresh, falling back to the last-known value
        let position = self.refreshed_position().await?;
        self.entries.sync(&position);

        // 3. Duplicate guard
        if self.in_flight.values().any(|f| f.intent.side == side) {
            return Err(RejectionReason::OrderInFlight);
        }
        if position.volume(side) > decision.observed_volume + VOLUME_EPSILON {
            return Err(RejectionReason::DuplicateEntry);
        }

        // 4. Take profit on the opposing leg instead of hedging against it
        let opposite = side.opposite();
        if self.config.close_profitable_opposite
            && position.pnl_ratio(opposite, price).is_some_and(|pnl| pnl > 0.0)
        {
            return Ok(ExecutionIntent::new(
                &self.instrument,
                side,
                Offset::Close,
                position.volume(opposite),
                price,
                decision.regime,
                0.0,
                format!("close profitable {} leg: {}", opposite, decision.reason),
                now,
            ));
        }

        // 5. Cap and aggregation distance
        let entry_volume = self.config.base_volume * decision.position_ratio;
        let open_entries = self.open_entries(side, position.volume(side), entry_volume);
        if open_entries >= self.config.max_per_direction {
            debug!(instrument = %self.instrument, side = %side, open_entries, "Same-direction entry cap reached");
            return Err(RejectionReason::PositionCapReached);
        }
        if let Some(pnl) = position.pnl_ratio(side, price) {
            let loss_ratio = -pnl;
            if !(loss_ratio > self.config.add_loss_threshold) {
                return Err(RejectionReason::AggregationTooClose { loss_ratio });
            }
        }

        // 6. Stop distance
        let stop_distance = self.stop_distance(decision, price);

        // 7. Intent
        Ok(ExecutionIntent::new(
            &self.instrument,
            side,
            Offset::Open,
            entry_volume,
            price,
            decision.regime,
            stop_distance,
            decision.reason.clone(),
            now,
        ))
    }

    async fn refreshed_position(&self) -> Result<Position, RejectionReason> {
        let refreshed = self.cache.refresh().await;
        let stale = self.cache.is_stale().await;
        match refreshed {
            Ok(position) if !stale => Ok(position),
            Ok(_) => Err(RejectionReason::PositionUnavailable),
            Err(e) if stale => {
                warn!(instrument = %self.instrument, error = %e, "Position refresh failed and cache is too old");
                let _ = self
                    .risk_event_tx
                    .send(RiskEvent::PositionStale {
                        instrument: self.instrument.clone(),
                        error: e.to_string(),
                    })
                    .await;
                Err(RejectionReason::PositionUnavailable)
            }
            Err(e) => {
                warn!(instrument = %self.instrument, error = %e, "Position refresh failed; using last-known value");
                Ok(self.cache.snapshot().await)
            }
        }
    }

    /// `max(atr * multiplier, min_stop_ratio * price)`; never zero.
    fn stop_distance(&self, decision: &Decision, price: f64) -> f64 {
        let floor = self.config.min_stop_ratio * price;
        let atr_distance = decision.atr * decision.stop_multiplier;
        if !(atr_distance.is_finite() && atr_distance > 0.0) {
            let err = Error::DegenerateRisk(format!(
                "atr {} x multiplier {} gives no usable stop distance",
                decision.atr, decision.stop_multiplier
            ));
            warn!(instrument = %self.instrument, error = %err, floor = floor, "Using stop distance floor");
            return floor;
        }
        atr_distance.max(floor)
    }

    /// Closing intents for armed stops the bar has breached.
    ///
    /// Stop exits bypass the throttle but not the in-flight guard.
    pub async fn stop_exits(&mut self, bar: &Bar, regime: RegimeState) -> Vec<ExecutionIntent> {
        let mut exits = Vec::new();
        for stop in self.stops.triggered(bar) {
            let closing_side = stop.side.opposite();
            if self.in_flight.values().any(|f| f.intent.side == closing_side) {
                debug!(instrument = %self.instrument, side = %stop.side, "Stop hit but an order is already in flight");
                continue;
            }

            let position = self.cache.snapshot().await;
            if !position.has(stop.side) {
                self.stops.disarm(stop.side);
                continue;
            }

            let bar_price = match stop.side {
                OrderSide::Buy => bar.low,
                OrderSide::Sell => bar.high,
            };
            warn!(
                instrument = %self.instrument,
                side = %stop.side,
                stop_price = stop.stop_price,
                bar_price = bar_price,
                "Protective stop triggered"
            );
            let _ = self
                .risk_event_tx
                .send(RiskEvent::StopTriggered {
                    instrument: self.instrument.clone(),
                    side: stop.side,
                    stop_price: stop.stop_price,
                    bar_price,
                })
                .await;

            let intent = ExecutionIntent::new(
                &self.instrument,
                closing_side,
                Offset::Close,
                position.volume(stop.side),
                bar.close,
                regime,
                0.0,
                format!("protective stop at {:.4}", stop.stop_price),
                bar.timestamp,
            );
            self.track_in_flight(intent.clone());
            exits.push(intent);
        }
        exits
    }

    pub fn track_in_flight(&mut self, intent: ExecutionIntent) {
        self.in_flight.insert(
            intent.id.clone(),
            InFlight {
                intent,
                order_id: None,
            },
        );
    }

    /// Associate the collaborator's order id with a working intent.
    pub fn bind_order(&mut self, intent_id: &str, order_id: &str) {
        if let Some(entry) = self.in_flight.get_mut(intent_id) {
            entry.order_id = Some(order_id.to_string());
        }
    }

    fn take_in_flight(&mut self, order_id: &str) -> Option<ExecutionIntent> {
        let key = self
            .in_flight
            .iter()
            .find(|(_, f)| f.matches_order(order_id))
            .map(|(k, _)| k.clone())?;
        self.in_flight.remove(&key).map(|f| f.intent)
    }

    /// Apply a fill to the cache and re-arm or drop protective stops.
    pub async fn on_fill(&mut self, fill: &Fill) -> Position {
        let intent = self.take_in_flight(&fill.order_id);
        let position = self.cache.apply_fill(fill).await;

        self.entries.sync(&position);
        match fill.offset {
            Offset::Open => {
                if intent.is_some() {
                    self.entries.record(fill.side);
                }
                let distance = intent
                    .as_ref()
                    .map(|i| i.stop_distance)
                    .filter(|d| *d > 0.0);
                if let Some(distance) = distance {
                    let stop = self
                        .stops
                        .arm(fill.side, position.avg_price(fill.side), distance);
                    info!(
                        instrument = %self.instrument,
                        side = %fill.side,
                        stop_price = stop.stop_price,
                        "Protective stop armed"
                    );
                }
            }
            Offset::Close => self.stops.sync(&position),
        }

        info!(
            instrument = %self.instrument,
            order_id = %fill.order_id,
            side = %fill.side,
            offset = %fill.offset,
            price = fill.price,
            volume = fill.volume,
            long = position.long_volume,
            short = position.short_volume,
            "Fill applied"
        );
        position
    }

    /// The collaborator declined an intent: release its throttle slot and
    /// in-flight marker. No retry on the same bar.
    pub async fn on_rejected(&mut self, order_id: &str, reason: &str) {
        let intent = self.take_in_flight(order_id);
        let intent_id = intent.as_ref().map_or(order_id, |i| i.id.as_str());
        let unlocked = self.throttle.unlock(intent_id);
        warn!(
            instrument = %self.instrument,
            intent_id = %intent_id,
            reason = %reason,
            throttle_unlocked = unlocked,
            "Order rejected by execution"
        );
        let _ = self
            .risk_event_tx
            .send(RiskEvent::OrderRejected {
                instrument: self.instrument.clone(),
                intent_id: intent_id.to_string(),
                reason: reason.to_string(),
            })
            .await;
    }

    /// Submission never reached the collaborator.
    pub async fn on_failed(&mut self, intent_id: &str, error: &Error) {
        self.take_in_flight(intent_id);
        self.throttle.unlock(intent_id);
        let _ = self
            .risk_event_tx
            .send(RiskEvent::OrderFailed {
                instrument: self.instrument.clone(),
                error: error.to_string(),
            })
            .await;
    }

    pub async fn on_order_update(&mut self, order_id: &str, status: &OrderStatus) {
        match status {
            OrderStatus::Cancelled => self.on_rejected(order_id, "cancelled").await,
            OrderStatus::Rejected(reason) => self.on_rejected(order_id, reason).await,
            OrderStatus::Working | OrderStatus::Filled => {
                debug!(instrument = %self.instrument, order_id = %order_id, status = ?status, "Order update");
            }
        }
    }

    async fn reject(&self, decision: &Decision, reason: RejectionReason) {
        warn!(
            instrument = %self.instrument,
            action = %decision.action,
            regime = %decision.regime,
            reason = %reason,
            "Decision rejected by RiskController"
        );
        let _ = self
            .risk_event_tx
            .send(RiskEvent::DecisionRejected {
                instrument: self.instrument.clone(),
                action: decision.action,
                reason,
            })
            .await;
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;
    use chrono::TimeZone;
    use common::Action;
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn controller(
        client: Arc<ScriptedClient>,
    ) -> (RiskController, mpsc::Receiver<RiskEvent>) {
        let config = RiskConfig::default();
        let cache = PositionCache::new(
            "IF",
            client,
            config.cache_ttl(),
            config.refresh_timeout(),
            config.max_cache_age(),
        );
        let (tx, rx) = mpsc::channel(64);
        (RiskController::new(config, cache, tx), rx)
    }

    fn decision(action: Action, atr: f64, observed_volume: f64, at: DateTime<Utc>) -> Decision {
        Decision {
            action,
            reason: "test".into(),
            regime: RegimeState::Transition,
            position_ratio: 0.3,
            stop_multiplier: 1.0,
            atr,
            observed_volume,
            timestamp: at,
        }
    }

    fn fill_for(intent: &ExecutionIntent, price: f64) -> Fill {
        Fill {
            order_id: intent.id.clone(),
            instrument: intent.instrument.clone(),
            side: intent.side,
            offset: intent.offset,
            price,
            volume: intent.volume,
            timestamp: intent.timestamp,
        }
    }

    fn long(volume: f64, avg: f64) -> Position {
        Position {
            long_volume: volume,
            long_avg_price: avg,
            ..Position::default()
        }
    }

    #[tokio::test]
    async fn approves_flat_buy_with_atr_stop() {
        let (mut risk, _rx) = controller(ScriptedClient::new(0.0));
        let intent = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(0)), 100.0, t(0))
            .await
            .unwrap();

        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.offset, Offset::Open);
        assert!((intent.volume - 0.3).abs() < 1e-12);
        assert!((intent.stop_distance - 0.5).abs() < 1e-12);
        assert_eq!(intent.stop_price(), Some(99.5));
        assert_eq!(risk.in_flight_count(), 1);
        assert_eq!(risk.last_signal_at(), Some(t(0)));
    }

    #[tokio::test]
    async fn throttle_interval_is_inclusive() {
        let (mut risk, mut rx) = controller(ScriptedClient::new(0.0));
        let first = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(0)), 100.0, t(0))
            .await
            .unwrap();
        risk.on_fill(&fill_for(&first, 100.0)).await;

        let err = risk
            .process(&decision(Action::Sell, 0.5, 0.0, t(60)), 100.0, t(60))
            .await
            .unwrap_err();
        assert!(matches!(err, RejectionReason::Throttled { elapsed_secs: 60 }));
        assert!(matches!(rx.recv().await, Some(RiskEvent::DecisionRejected { .. })));

        assert!(risk
            .process(&decision(Action::Sell, 0.5, 0.0, t(61)), 100.0, t(61))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn aggregation_needs_loss_beyond_threshold() {
        let (mut risk, _rx) = controller(ScriptedClient::with_position(long(0.3, 100.0)));

        let err = risk
            .process(&decision(Action::Buy, 0.5, 0.3, t(0)), 100.1, t(0))
            .await
            .unwrap_err();
        assert!(matches!(err, RejectionReason::AggregationTooClose { .. }));

        let intent = risk
            .process(&decision(Action::Buy, 0.5, 0.3, t(0)), 99.79, t(0))
            .await
            .unwrap();
        assert_eq!(intent.offset, Offset::Open);
    }

    #[tokio::test]
    async fn cap_blocks_entries_at_max_per_direction() {
        let (mut risk, _rx) = controller(ScriptedClient::with_position(long(2.0, 100.0)));
        let err = risk
            .process(&decision(Action::Buy, 0.5, 2.0, t(0)), 90.0, t(0))
            .await
            .unwrap_err();
        assert_eq!(err, RejectionReason::PositionCapReached);
    }

    #[tokio::test]
    async fn cap_counts_entries_not_base_volume() {
        // Two transition-size entries already held, well under 2 x base_volume
        let (mut risk, _rx) = controller(ScriptedClient::with_position(long(0.6, 100.0)));
        let err = risk
            .process(&decision(Action::Buy, 0.5, 0.6, t(0)), 95.0, t(0))
            .await
            .unwrap_err();
        assert_eq!(err, RejectionReason::PositionCapReached);

        // One entry held leaves room for a second
        let (mut risk, _rx) = controller(ScriptedClient::with_position(long(0.3, 100.0)));
        let intent = risk
            .process(&decision(Action::Buy, 0.5, 0.3, t(0)), 95.0, t(0))
            .await
            .unwrap();
        assert!((intent.volume - 0.3).abs() < 1e-12);
    }

    #[tokio::test]
    async fn filled_entries_count_until_the_leg_is_flat() {
        let client = ScriptedClient::new(0.0);
        let (mut risk, _rx) = controller(client.clone());

        let first = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(0)), 100.0, t(0))
            .await
            .unwrap();
        risk.on_fill(&fill_for(&first, 100.0)).await;
        client.set_position(long(0.3, 100.0));

        let second = risk
            .process(&decision(Action::Buy, 0.5, 0.3, t(120)), 99.0, t(120))
            .await
            .unwrap();
        risk.on_fill(&fill_for(&second, 99.0)).await;
        client.set_position(long(0.6, 99.5));
        assert_eq!(risk.entries(OrderSide::Buy), 2);

        // A full-size entry would be one unit by volume; the local count still caps it
        let mut full = decision(Action::Buy, 0.5, 0.6, t(240));
        full.position_ratio = 1.0;
        let err = risk.process(&full, 95.0, t(240)).await.unwrap_err();
        assert_eq!(err, RejectionReason::PositionCapReached);

        // Once flat, the count starts over
        client.set_position(Position::default());
        let again = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(360)), 95.0, t(360))
            .await
            .unwrap();
        assert_eq!(risk.entries(OrderSide::Buy), 0);
        assert_eq!(again.offset, Offset::Open);
    }

    #[tokio::test]
    async fn stale_generator_view_is_a_duplicate() {
        let (mut risk, _rx) = controller(ScriptedClient::with_position(long(1.0, 100.0)));
        let err = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(0)), 90.0, t(0))
            .await
            .unwrap_err();
        assert_eq!(err, RejectionReason::DuplicateEntry);
    }

    #[tokio::test]
    async fn in_flight_order_blocks_same_side() {
        let (mut risk, _rx) = controller(ScriptedClient::new(0.0));
        risk.process(&decision(Action::Buy, 0.5, 0.0, t(0)), 100.0, t(0))
            .await
            .unwrap();
        let err = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(120)), 100.0, t(120))
            .await
            .unwrap_err();
        assert_eq!(err, RejectionReason::OrderInFlight);
    }

    #[tokio::test]
    async fn profitable_short_is_closed_instead_of_going_long() {
        let short = Position {
            short_volume: 1.0,
            short_avg_price: 100.0,
            ..Position::default()
        };
        let (mut risk, _rx) = controller(ScriptedClient::with_position(short));
        let intent = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(0)), 99.0, t(0))
            .await
            .unwrap();
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.offset, Offset::Close);
        assert_eq!(intent.volume, 1.0);
        assert_eq!(intent.stop_price(), None);
    }

    #[tokio::test]
    async fn zero_atr_falls_back_to_stop_floor() {
        let (mut risk, _rx) = controller(ScriptedClient::new(0.0));
        let intent = risk
            .process(&decision(Action::Buy, 0.0, 0.0, t(0)), 100.0, t(0))
            .await
            .unwrap();
        assert!((intent.stop_distance - 0.05).abs() < 1e-12);
        assert_ne!(intent.stop_price(), Some(intent.price));
    }

    #[tokio::test]
    async fn never_loaded_position_rejects_everything() {
        let client = ScriptedClient::new(0.0);
        client.fail();
        let (mut risk, mut rx) = controller(client);
        let err = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(0)), 100.0, t(0))
            .await
            .unwrap_err();
        assert_eq!(err, RejectionReason::PositionUnavailable);
        assert!(matches!(rx.recv().await, Some(RiskEvent::PositionStale { .. })));
    }

    #[tokio::test]
    async fn recent_cache_survives_a_failed_refresh() {
        let client = ScriptedClient::new(0.0);
        let (mut risk, _rx) = controller(client.clone());
        risk.cache().refresh().await.unwrap();
        client.fail();
        assert!(risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(0)), 100.0, t(0))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn rejected_intent_unlocks_throttle() {
        let (mut risk, mut rx) = controller(ScriptedClient::new(0.0));
        let intent = risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(0)), 100.0, t(0))
            .await
            .unwrap();

        risk.on_rejected(&intent.id, "insufficient margin").await;
        assert_eq!(risk.in_flight_count(), 0);
        assert_eq!(risk.last_signal_at(), None);
        assert!(matches!(rx.recv().await, Some(RiskEvent::OrderRejected { .. })));

        assert!(risk
            .process(&decision(Action::Buy, 0.5, 0.0, t(1)), 100.0, t(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn fill_arms_stop_and_breach_emits_single_exit() {
        let (mut risk, _rx) = controller(ScriptedClient::new(0.0));
        let mut d = decision(Action::Buy, 1.0, 0.0, t(0));
        d.stop_multiplier = 2.0;
        let intent = risk.process(&d, 100.0, t(0)).await.unwrap();
        risk.on_fill(&fill_for(&intent, 100.0)).await;
        assert_eq!(risk.in_flight_count(), 0);
        assert_eq!(risk.stops().get(OrderSide::Buy).unwrap().stop_price, 98.0);

        let bar = Bar {
            instrument: "IF".into(),
            open: 99.0,
            high: 99.0,
            low: 97.5,
            close: 98.2,
            volume: 10.0,
            timestamp: t(30),
        };
        let exits = risk.stop_exits(&bar, RegimeState::Volatile).await;
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].side, OrderSide::Sell);
        assert_eq!(exits[0].offset, Offset::Close);
        assert!((exits[0].volume - 0.3).abs() < 1e-12);

        // Exit already in flight
        assert!(risk.stop_exits(&bar, RegimeState::Volatile).await.is_empty());

        risk.on_fill(&fill_for(&exits[0], 98.2)).await;
        assert!(risk.stops().get(OrderSide::Buy).is_none());
    }

    #[test]
    fn default_config_is_valid() {
        RiskConfig::default().validate().unwrap();
    }

    #[test]
    fn max_age_below_ttl_is_rejected() {
        let cfg = RiskConfig {
            max_cache_age_secs: 10,
            ..RiskConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
