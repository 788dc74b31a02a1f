use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, watch, RwLock};

use common::{
    Bar, EngineState, Error, ExecutionClient, ExecutionEvent, IndicatorSnapshot, Offset, OrderSide,
    Position, RegimeState, RejectionReason, RiskEvent, TraderStatus,
};
use engine::{
    route_execution_events, BarOutcome, DispatchOutcome, InstrumentConfig, StrategyHandler, Trader,
};
use paper::{FillMode, PaperClient};
use risk::RiskConfig;
use strategy::StrategyParams;

const SERIES: [f64; 25] = [
    950.0, 950.6, 949.7, 950.8, 949.9, 951.0, 950.1, 951.2, 950.3, 951.4, 950.5, 951.6, 950.7,
    951.8, 950.9, 951.6, 950.3, 951.0, 949.7, 950.4, 952.4, 954.3, 956.2, 958.1, 960.0,
];

fn ts(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap() + chrono::Duration::minutes(minute)
}

fn bar(minute: i64, close: f64, spread: f64, volume: f64) -> Bar {
    Bar {
        instrument: "IF".into(),
        open: close,
        high: close + spread,
        low: close - spread,
        close,
        volume,
        timestamp: ts(minute),
    }
}

fn snapshot(fast: f64, slow: f64, rsi: f64, atr: f64, close: f64, at: DateTime<Utc>) -> IndicatorSnapshot {
    IndicatorSnapshot {
        fast_ma: fast,
        slow_ma: slow,
        rsi,
        atr,
        close,
        timestamp: at,
        ready: true,
        atr_floored: false,
    }
}

fn instrument() -> InstrumentConfig {
    InstrumentConfig {
        name: "IF main".into(),
        instrument: "IF".into(),
        strategy: StrategyParams::default(),
        risk: RiskConfig::default(),
    }
}

struct Harness {
    trader: Trader,
    client: Arc<PaperClient>,
    state: Arc<RwLock<EngineState>>,
    status: watch::Receiver<TraderStatus>,
    _risk_rx: mpsc::Receiver<RiskEvent>,
}

fn harness(slippage_bps: f64, mode: FillMode) -> Harness {
    let client = Arc::new(PaperClient::new(slippage_bps, mode));
    let (risk_tx, risk_rx) = mpsc::channel(256);
    let state = Arc::new(RwLock::new(EngineState::Running));
    let (trader, status) = Trader::new(&instrument(), client.clone(), risk_tx, state.clone());
    Harness {
        trader,
        client,
        state,
        status,
        _risk_rx: risk_rx,
    }
}

/// Ranging buy: flat averages, calm market, oversold RSI.
async fn oversold(trader: &mut Trader, minute: i64, atr: f64) -> BarOutcome {
    let b = bar(minute, 100.0, 0.2, 100.0);
    let snap = snapshot(100.0, 100.0, 20.0, atr, 100.0, b.timestamp);
    trader.evaluate(&b, &snap, Some(&snap)).await
}

#[tokio::test]
async fn replayed_series_buys_once_on_the_transition_cross() {
    let mut h = harness(10.0, FillMode::Immediate);
    let mut entries = Vec::new();

    for (i, close) in SERIES.iter().enumerate() {
        match h.trader.handle_bar(&bar(i as i64, *close, 0.3, 100.0)).await {
            Ok(outcome) => {
                assert_eq!(outcome.entries(OrderSide::Sell), 0, "bar {}", i + 1);
                if outcome.entries(OrderSide::Buy) > 0 {
                    entries.push((i + 1, outcome));
                }
            }
            Err(Error::IndicatorNotReady { .. }) => assert!(i < 19, "bar {} should be ready", i + 1),
            Err(e) => panic!("unexpected error on bar {}: {e}", i + 1),
        }
    }

    assert_eq!(entries.len(), 1);
    let (bar_no, outcome) = &entries[0];
    assert_eq!(*bar_no, 22);
    assert_eq!(outcome.regime, Some(RegimeState::Transition));
    let (intent, result) = &outcome.dispatched[0];
    assert!((intent.volume - 0.3).abs() < 1e-9);
    assert!(intent.stop_distance > 0.0);
    assert!(matches!(result, DispatchOutcome::Filled(_)));

    let status = h.status.borrow().clone();
    assert_eq!(status.bars_seen, 25);
    assert!((status.position.long_volume - 0.3).abs() < 1e-9);
    assert_eq!(status.position.short_volume, 0.0);
    assert!(h.trader.risk().stops().get(OrderSide::Buy).is_some());
}

#[tokio::test]
async fn steady_rise_buys_once_at_the_warm_up_boundary() {
    let mut h = harness(10.0, FillMode::Immediate);
    let mut buys = Vec::new();

    for i in 0..25 {
        let close = 950.0 + 10.0 * i as f64 / 24.0;
        match h.trader.handle_bar(&bar(i, close, 0.3, 100.0)).await {
            Ok(outcome) => {
                assert_eq!(outcome.regime, Some(RegimeState::Trending), "bar {}", i + 1);
                assert_eq!(outcome.entries(OrderSide::Sell), 0, "bar {}", i + 1);
                if outcome.entries(OrderSide::Buy) > 0 {
                    buys.push((i + 1, outcome));
                }
            }
            Err(Error::IndicatorNotReady { .. }) => assert!(i < 19, "bar {} should be ready", i + 1),
            Err(e) => panic!("unexpected error on bar {}: {e}", i + 1),
        }
    }

    assert_eq!(buys.len(), 1);
    let (bar_no, outcome) = &buys[0];
    assert_eq!(*bar_no, 20);
    let decision = outcome.decision.as_ref().unwrap();
    assert!(decision.reason.contains("established"));
    assert!((outcome.dispatched[0].0.volume - 1.0).abs() < 1e-9);
    assert!((h.status.borrow().position.long_volume - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn repeated_golden_cross_opens_a_single_position() {
    let mut h = harness(0.0, FillMode::Immediate);
    for i in 0..20 {
        let _ = h.trader.handle_bar(&bar(i, 100.0, 0.2, 100.0)).await;
    }

    let mut buys = 0;
    for k in 0..5 {
        let b = bar(22 + 2 * k, 101.0, 0.2, 200.0);
        let prev = snapshot(99.9, 100.0, 55.0, 0.3, 100.0, b.timestamp);
        let curr = snapshot(100.5, 100.0, 55.0, 0.3, 101.0, b.timestamp);
        let outcome = h.trader.evaluate(&b, &curr, Some(&prev)).await;
        assert_eq!(outcome.regime, Some(RegimeState::Trending));
        buys += outcome.entries(OrderSide::Buy);
    }

    assert_eq!(buys, 1);
    let position = h.client_position().await;
    assert!((position.long_volume - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn zero_atr_still_yields_a_real_stop() {
    let mut h = harness(0.0, FillMode::Immediate);
    let outcome = oversold(&mut h.trader, 0, 0.0).await;

    assert_eq!(outcome.regime, Some(RegimeState::Ranging));
    let (intent, _) = &outcome.dispatched[0];
    assert_eq!(intent.side, OrderSide::Buy);
    assert!((intent.stop_distance - 100.0 * 0.0005).abs() < 1e-9);
    assert!(intent.stop_price().unwrap() < intent.price);

    let stop = h.trader.risk().stops().get(OrderSide::Buy).unwrap();
    assert!(stop.stop_price < 100.0);
}

#[tokio::test]
async fn execution_rejection_releases_the_throttle() {
    let mut h = harness(0.0, FillMode::Immediate);
    h.client.set_reject_reason(Some("insufficient margin".into())).await;

    let outcome = oversold(&mut h.trader, 0, 0.5).await;
    assert!(matches!(outcome.dispatched[0].1, DispatchOutcome::Rejected { .. }));
    assert_eq!(h.trader.risk().last_signal_at(), None);
    assert_eq!(h.trader.risk().in_flight_count(), 0);

    // The very next bar may try again
    h.client.set_reject_reason(None).await;
    let outcome = oversold(&mut h.trader, 1, 0.5).await;
    assert!(matches!(outcome.dispatched[0].1, DispatchOutcome::Filled(_)));
}

#[tokio::test]
async fn signals_inside_the_interval_are_throttled() {
    let mut h = harness(0.0, FillMode::Immediate);
    let first = oversold(&mut h.trader, 0, 0.5).await;
    assert_eq!(first.entries(OrderSide::Buy), 1);

    // 60s later: inclusive interval, still throttled (the same-side
    // guard would also block, so try a sell)
    let b = bar(1, 100.0, 0.2, 100.0);
    let snap = snapshot(100.0, 100.0, 80.0, 0.5, 100.0, b.timestamp);
    let outcome = h.trader.evaluate(&b, &snap, Some(&snap)).await;
    assert!(matches!(outcome.rejection, Some(RejectionReason::Throttled { .. })));
}

#[tokio::test]
async fn pause_suppresses_decisions_but_not_stops() {
    let mut h = harness(0.0, FillMode::Immediate);
    let opened = oversold(&mut h.trader, 0, 0.5).await;
    assert_eq!(opened.entries(OrderSide::Buy), 1);

    *h.state.write().await = EngineState::Paused;

    let quiet = oversold(&mut h.trader, 5, 0.5).await;
    assert!(quiet.paused);
    assert!(quiet.decision.is_none());
    assert!(quiet.dispatched.is_empty());

    // Low pierces the stop at 99.5
    let crash = bar(10, 99.0, 0.3, 100.0);
    let snap = snapshot(99.8, 100.0, 40.0, 0.5, 99.0, crash.timestamp);
    let outcome = h.trader.evaluate(&crash, &snap, Some(&snap)).await;
    assert!(outcome.paused);
    assert_eq!(outcome.dispatched.len(), 1);
    let (exit, result) = &outcome.dispatched[0];
    assert_eq!((exit.side, exit.offset), (OrderSide::Sell, Offset::Close));
    assert!(matches!(result, DispatchOutcome::Filled(_)));
    assert_eq!(h.client_position().await.long_volume, 0.0);
    assert!(h.trader.risk().stops().get(OrderSide::Buy).is_none());
}

#[tokio::test]
async fn stopped_engine_trades_nothing() {
    let mut h = harness(0.0, FillMode::Immediate);
    let opened = oversold(&mut h.trader, 0, 0.5).await;
    assert_eq!(opened.entries(OrderSide::Buy), 1);

    *h.state.write().await = EngineState::Stopped;

    let quiet = oversold(&mut h.trader, 5, 0.5).await;
    assert!(quiet.stopped);
    assert!(quiet.decision.is_none());
    assert!(quiet.dispatched.is_empty());

    // Even a pierced stop is left for the next start
    let crash = bar(10, 99.0, 0.3, 100.0);
    let snap = snapshot(99.8, 100.0, 40.0, 0.5, 99.0, crash.timestamp);
    let outcome = h.trader.evaluate(&crash, &snap, Some(&snap)).await;
    assert!(outcome.stopped);
    assert!(outcome.dispatched.is_empty());
    assert!((h.client_position().await.long_volume - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn deferred_fill_keeps_the_order_in_flight_until_it_lands() {
    let (event_tx, mut event_rx) = mpsc::channel(8);
    let mut h = harness(0.0, FillMode::Deferred(event_tx));

    let first = oversold(&mut h.trader, 0, 0.5).await;
    assert!(matches!(first.dispatched[0].1, DispatchOutcome::Working { .. }));
    assert_eq!(h.trader.risk().in_flight_count(), 1);

    let second = oversold(&mut h.trader, 2, 0.5).await;
    assert!(second.dispatched.is_empty());
    assert_eq!(second.rejection, Some(RejectionReason::OrderInFlight));

    let Some(ExecutionEvent::Fill(fill)) = event_rx.recv().await else {
        panic!("expected a paper fill");
    };
    h.trader.on_fill(&fill).await;
    assert_eq!(h.trader.risk().in_flight_count(), 0);
    assert!(h.trader.risk().stops().get(OrderSide::Buy).is_some());
    assert!((h.status.borrow().position.long_volume - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn run_loop_consumes_bars_and_routed_fills() {
    let (paper_tx, paper_rx) = mpsc::channel(8);
    let h = harness(10.0, FillMode::Deferred(paper_tx));
    let mut status = h.status.clone();

    let (bar_tx, bar_rx) = mpsc::channel(64);
    let (trader_event_tx, trader_event_rx) = mpsc::channel(8);
    let routes = std::collections::HashMap::from([("IF".to_string(), trader_event_tx)]);
    tokio::spawn(route_execution_events(paper_rx, routes));
    tokio::spawn(h.trader.run(bar_rx, trader_event_rx));

    for (i, close) in SERIES.iter().enumerate() {
        bar_tx.send(bar(i as i64, *close, 0.3, 100.0)).await.unwrap();
    }

    let status = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.bars_seen == 25 && s.position.long_volume > 0.0),
    )
    .await
    .expect("fill reached the trader")
    .unwrap()
    .clone();
    assert!((status.position.long_volume - 0.3).abs() < 1e-9);
    assert_eq!(status.last_regime, Some(RegimeState::Trending));
}

impl Harness {
    async fn client_position(&self) -> Position {
        self.client.query_position("IF").await.unwrap()
    }
}
