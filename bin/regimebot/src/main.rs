use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, EngineCommand, ExecutionClient, ExecutionEvent, MarketDataSource, RiskEvent};
use engine::{route_execution_events, BarFeed, Engine, SessionFileConfig, Trader};
use paper::{FillMode, PaperClient, ReplaySource};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let session = SessionFileConfig::load(&cfg.session_config_path);
    let instruments = session.instrument_codes();
    info!(instruments = ?instruments, config = %cfg.session_config_path, "RegimeBot starting");

    // ── Collaborators ─────────────────────────────────────────────────────────
    let (paper_event_tx, paper_event_rx) = mpsc::channel::<ExecutionEvent>(256);
    let fill_mode = if cfg.paper_async_fills {
        FillMode::Deferred(paper_event_tx)
    } else {
        drop(paper_event_tx);
        FillMode::Immediate
    };
    let client: Arc<dyn ExecutionClient> =
        Arc::new(PaperClient::new(cfg.paper_slippage_bps, fill_mode));

    let source: Arc<dyn MarketDataSource> = Arc::new(
        ReplaySource::from_dir(&cfg.bar_source_dir, &instruments)
            .unwrap_or_else(|e| panic!("Failed to load bars from '{}': {e}", cfg.bar_source_dir)),
    );

    // ── Engine ────────────────────────────────────────────────────────────────
    let (mut engine, engine_handle) = Engine::new();
    let engine_state = engine.shared_state();
    let (risk_event_tx, mut risk_event_rx) = mpsc::channel::<RiskEvent>(256);

    let poll_interval = Duration::from_millis(cfg.bar_poll_interval_ms);
    let refresh_interval = Duration::from_millis(cfg.position_refresh_interval_ms);

    // ── Traders (one per instrument) ──────────────────────────────────────────
    let mut routes = HashMap::new();
    let mut statuses = HashMap::new();
    for instrument_cfg in &session.instruments {
        let code = instrument_cfg.instrument.clone();
        let (bar_tx, bar_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(64);

        let (trader, status_rx) = Trader::new(
            instrument_cfg,
            client.clone(),
            risk_event_tx.clone(),
            engine_state.clone(),
        );

        tokio::spawn(trader.position_cache().run_periodic(refresh_interval));
        engine.add_feed(BarFeed::new(code.clone(), source.clone(), poll_interval, bar_tx));
        tokio::spawn(trader.run(bar_rx, event_rx));

        routes.insert(code.clone(), event_tx);
        statuses.insert(code, status_rx);
    }
    drop(risk_event_tx);

    tokio::spawn(route_execution_events(paper_event_rx, routes));

    // ── Risk event logger ─────────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = risk_event_rx.recv().await {
            match event {
                RiskEvent::DecisionRejected { instrument, action, reason } => {
                    info!(instrument = %instrument, action = %action, reason = %reason, "Decision rejected");
                }
                RiskEvent::OrderRejected { instrument, intent_id, reason } => {
                    warn!(instrument = %instrument, intent_id = %intent_id, reason = %reason, "Order rejected");
                }
                RiskEvent::OrderFailed { instrument, error } => {
                    error!(instrument = %instrument, error = %error, "Order failed");
                }
                RiskEvent::StopTriggered { instrument, side, stop_price, bar_price } => {
                    warn!(
                        instrument = %instrument,
                        side = %side,
                        stop_price = stop_price,
                        bar_price = bar_price,
                        "Protective stop exit"
                    );
                }
                RiskEvent::PositionStale { instrument, error } => {
                    error!(instrument = %instrument, error = %error, "Position unavailable; entries blocked");
                }
            }
        }
    });

    // ── Status API ────────────────────────────────────────────────────────────
    let api_state = api::AppState::new(engine_state.clone(), statuses);
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, port, "Status API stopped");
        }
    });

    // ── Start ─────────────────────────────────────────────────────────────────
    tokio::spawn(engine.run());
    engine_handle.send(EngineCommand::Start).await;

    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    engine_handle.send(EngineCommand::Stop).await;
    info!("Shutdown signal received. Exiting.");
}
