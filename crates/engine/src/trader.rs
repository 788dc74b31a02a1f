use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use common::{
    Bar, Decision, EngineState, Error, ExecutionClient, ExecutionEvent, ExecutionIntent, Fill,
    IndicatorSnapshot, OrderSide, OrderStatus, RegimeState, RejectionReason, Result, RiskEvent,
    TraderStatus,
};
use risk::{PositionCache, RiskController};
use strategy::{IndicatorStore, RegimeClassifier, SignalContext, SignalRouter};

use crate::config::InstrumentConfig;
use crate::executor::{DecisionDispatcher, DispatchOutcome};

/// Capability set a per-instrument strategy instance exposes to the engine.
#[async_trait]
pub trait StrategyHandler: Send {
    /// Entry point invoked once per new bar.
    async fn on_bar(&mut self, bar: Bar) -> Result<BarOutcome>;

    async fn on_order_update(&mut self, order_id: &str, status: &OrderStatus);

    async fn on_fill(&mut self, fill: &Fill);
}

/// Everything one bar produced.
#[derive(Debug, Clone, Default)]
pub struct BarOutcome {
    pub regime: Option<RegimeState>,
    pub decision: Option<Decision>,
    pub rejection: Option<RejectionReason>,
    pub dispatched: Vec<(ExecutionIntent, DispatchOutcome)>,
    /// Decisions were suppressed because the engine is paused.
    pub paused: bool,
    /// Nothing was traded because the engine is stopped.
    pub stopped: bool,
}

impl BarOutcome {
    /// Opening intents dispatched for `side`.
    pub fn entries(&self, side: OrderSide) -> usize {
        self.dispatched
            .iter()
            .filter(|(i, _)| i.side == side && i.offset == common::Offset::Open)
            .count()
    }
}

/// One instrument's pipeline: indicators, regime, signals, risk and
/// dispatch. Owns all of its state; nothing is shared with other traders
/// except the execution client.
pub struct Trader {
    name: String,
    instrument: String,
    store: IndicatorStore,
    classifier: RegimeClassifier,
    router: SignalRouter,
    risk: RiskController,
    dispatcher: DecisionDispatcher,
    breakout_lookback: usize,
    engine_state: Arc<RwLock<EngineState>>,
    status: TraderStatus,
    status_tx: watch::Sender<TraderStatus>,
}

impl Trader {
    pub fn new(
        cfg: &InstrumentConfig,
        client: Arc<dyn ExecutionClient>,
        risk_event_tx: mpsc::Sender<RiskEvent>,
        engine_state: Arc<RwLock<EngineState>>,
    ) -> (Self, watch::Receiver<TraderStatus>) {
        let cache = PositionCache::new(
            &cfg.instrument,
            client.clone(),
            cfg.risk.cache_ttl(),
            cfg.risk.refresh_timeout(),
            cfg.risk.max_cache_age(),
        );
        let status = TraderStatus {
            instrument: cfg.instrument.clone(),
            ..TraderStatus::default()
        };
        let (status_tx, status_rx) = watch::channel(status.clone());

        info!(name = %cfg.name, instrument = %cfg.instrument, "Trader created");

        let trader = Self {
            name: cfg.name.clone(),
            instrument: cfg.instrument.clone(),
            store: IndicatorStore::new(cfg.strategy.indicators.clone()),
            classifier: RegimeClassifier::new(cfg.strategy.regime.clone()),
            router: SignalRouter::from_params(&cfg.strategy),
            risk: RiskController::new(cfg.risk.clone(), cache, risk_event_tx),
            dispatcher: DecisionDispatcher::new(client),
            breakout_lookback: cfg.strategy.signals.breakout_lookback,
            engine_state,
            status,
            status_tx,
        };
        (trader, status_rx)
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Shared handle for the periodic refresher.
    pub fn position_cache(&self) -> PositionCache {
        self.risk.cache().clone()
    }

    pub fn risk(&self) -> &RiskController {
        &self.risk
    }

    pub fn subscribe(&self) -> watch::Receiver<TraderStatus> {
        self.status_tx.subscribe()
    }

    /// Update indicators with `bar` and, once they are ready, evaluate it.
    pub async fn handle_bar(&mut self, bar: &Bar) -> Result<BarOutcome> {
        let snapshot = self.store.update(bar)?;
        self.status.bars_seen += 1;
        self.status.last_bar_at = Some(bar.timestamp);
        self.status.indicators = Some(snapshot.clone());

        if !snapshot.ready {
            self.publish().await;
            return Err(Error::IndicatorNotReady {
                observed: self.store.observed(),
                required: self.store.warmup_len(),
            });
        }

        let previous = self.store.previous().cloned();
        Ok(self.evaluate(bar, &snapshot, previous.as_ref()).await)
    }

    /// Run regime, signal, risk and dispatch against precomputed indicators.
    pub async fn evaluate(
        &mut self,
        bar: &Bar,
        current: &IndicatorSnapshot,
        previous: Option<&IndicatorSnapshot>,
    ) -> BarOutcome {
        let regime = self.classifier.classify(current);
        self.status.last_regime = Some(regime);
        let mut outcome = BarOutcome {
            regime: Some(regime),
            ..BarOutcome::default()
        };

        // Bars still queued after a stop only advance the indicators
        let engine_state = *self.engine_state.read().await;
        if engine_state == EngineState::Stopped {
            debug!(instrument = %self.instrument, "Engine stopped; bar not traded");
            outcome.stopped = true;
            self.publish().await;
            return outcome;
        }

        // Protective stops keep working while paused
        for intent in self.risk.stop_exits(bar, regime).await {
            let result = self.dispatcher.dispatch(&intent, &mut self.risk).await;
            outcome.dispatched.push((intent, result));
        }

        if engine_state == EngineState::Paused {
            debug!(instrument = %self.instrument, "Engine paused; decision suppressed");
            outcome.paused = true;
            self.publish().await;
            return outcome;
        }

        let position = match self.risk.cache().refresh_if_expired().await {
            Ok(position) => position,
            Err(e) => {
                debug!(instrument = %self.instrument, error = %e, "Using cached position for signal evaluation");
                self.risk.cache().snapshot().await
            }
        };

        let ctx = SignalContext {
            bar,
            current,
            previous,
            regime,
            position: &position,
            prior_high: self.store.prior_high(self.breakout_lookback),
            prior_low: self.store.prior_low(self.breakout_lookback),
            prior_avg_volume: self.store.prior_avg_volume(self.breakout_lookback),
            add_loss_threshold: self.risk.config().add_loss_threshold,
        };
        let decision = self.router.generate(&ctx);

        if decision.is_hold() {
            debug!(instrument = %self.instrument, regime = %regime, reason = %decision.reason, "No signal");
        } else {
            info!(
                instrument = %self.instrument,
                action = %decision.action,
                regime = %regime,
                rsi = current.rsi,
                close = bar.close,
                reason = %decision.reason,
                "Signal generated"
            );
            match self.risk.process(&decision, bar.close, bar.timestamp).await {
                Ok(intent) => {
                    let result = self.dispatcher.dispatch(&intent, &mut self.risk).await;
                    outcome.dispatched.push((intent, result));
                }
                Err(reason) => outcome.rejection = Some(reason),
            }
        }

        self.status.last_decision = Some(decision.clone());
        outcome.decision = Some(decision);
        self.publish().await;
        outcome
    }

    async fn publish(&mut self) {
        self.status.position = self.risk.cache().snapshot().await;
        self.status.position_stale = self.risk.cache().is_stale().await;
        self.status.last_signal_at = self.risk.last_signal_at();
        self.status_tx.send_replace(self.status.clone());
    }

    /// Single-consumer loop: bars and execution notifications for this
    /// instrument, in arrival order.
    pub async fn run(
        mut self,
        mut bar_rx: mpsc::Receiver<Bar>,
        mut event_rx: mpsc::Receiver<ExecutionEvent>,
    ) {
        info!(name = %self.name, instrument = %self.instrument, "Trader running");
        let mut events_open = true;
        loop {
            tokio::select! {
                bar = bar_rx.recv() => {
                    match bar {
                        Some(bar) => match self.on_bar(bar).await {
                            Ok(_) => {}
                            Err(Error::IndicatorNotReady { observed, required }) => {
                                debug!(instrument = %self.instrument, observed, required, "Warming up");
                            }
                            Err(e) => warn!(instrument = %self.instrument, error = %e, "Bar skipped"),
                        },
                        None => {
                            warn!(instrument = %self.instrument, "Bar channel closed — trader exiting");
                            return;
                        }
                    }
                }

                event = event_rx.recv(), if events_open => {
                    match event {
                        Some(ExecutionEvent::Fill(fill)) => self.on_fill(&fill).await,
                        Some(ExecutionEvent::OrderUpdate { order_id, status, .. }) => {
                            self.on_order_update(&order_id, &status).await
                        }
                        None => {
                            warn!(instrument = %self.instrument, "Execution event channel closed");
                            events_open = false;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StrategyHandler for Trader {
    async fn on_bar(&mut self, bar: Bar) -> Result<BarOutcome> {
        self.handle_bar(&bar).await
    }

    async fn on_order_update(&mut self, order_id: &str, status: &OrderStatus) {
        self.risk.on_order_update(order_id, status).await;
        self.publish().await;
    }

    async fn on_fill(&mut self, fill: &Fill) {
        self.risk.on_fill(fill).await;
        // A query made while the order was working may already include this
        // fill; re-read so it is not counted twice
        if let Err(e) = self.risk.cache().refresh().await {
            debug!(instrument = %self.instrument, error = %e, "Post-fill refresh failed; keeping local value");
        }
        self.publish().await;
    }
}
