use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use common::{
    Error, ExecutionClient, ExecutionEvent, ExecutionIntent, Fill, Offset, OrderResult, OrderSide,
    Position, Result, VOLUME_EPSILON,
};

/// How simulated orders are answered.
#[derive(Debug, Clone)]
pub enum FillMode {
    /// `submit_order` returns `Filled` right away.
    Immediate,
    /// `submit_order` returns `Working`; the fill arrives on the channel.
    Deferred(mpsc::Sender<ExecutionEvent>),
}

/// Simulated execution collaborator for paper trading.
///
/// Fills happen at the intent's reference price (the deciding bar's close)
/// with slippage against the trader. Keeps a long/short ledger per
/// instrument that `query_position` answers from.
pub struct PaperClient {
    positions: Arc<RwLock<HashMap<String, Position>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
    mode: FillMode,
    reject_reason: RwLock<Option<String>>,
}

impl PaperClient {
    pub fn new(slippage_bps: f64, mode: FillMode) -> Self {
        info!(
            slippage_bps = slippage_bps,
            deferred = matches!(mode, FillMode::Deferred(_)),
            "PaperClient initialized"
        );
        Self {
            positions: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
            mode,
            reject_reason: RwLock::new(None),
        }
    }

    /// Reject every subsequent order with `reason` (None to accept again).
    pub async fn set_reject_reason(&self, reason: Option<String>) {
        *self.reject_reason.write().await = reason;
    }

    fn fill_price(&self, side: OrderSide, mid: f64) -> f64 {
        // Buys pay more, sells receive less
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }
}

async fn book_fill(positions: &RwLock<HashMap<String, Position>>, fill: &Fill) {
    let mut positions = positions.write().await;
    positions
        .entry(fill.instrument.clone())
        .or_default()
        .apply_fill(fill);
}

#[async_trait]
impl ExecutionClient for PaperClient {
    async fn submit_order(&self, intent: &ExecutionIntent) -> Result<OrderResult> {
        if let Some(reason) = self.reject_reason.read().await.clone() {
            return Ok(OrderResult::Rejected { reason });
        }
        if !(intent.volume > VOLUME_EPSILON) {
            return Ok(OrderResult::Rejected {
                reason: format!("invalid volume {}", intent.volume),
            });
        }

        if intent.offset == Offset::Close {
            let held = self
                .positions
                .read()
                .await
                .get(&intent.instrument)
                .map(|p| p.volume(intent.side.opposite()))
                .unwrap_or(0.0);
            if intent.volume > held + VOLUME_EPSILON {
                return Ok(OrderResult::Rejected {
                    reason: format!("close volume {} exceeds held {held}", intent.volume),
                });
            }
        }

        let mid = intent.price;
        if !(mid.is_finite() && mid > 0.0) {
            return Err(Error::Exchange(format!(
                "PaperClient cannot fill '{}' at price {mid}",
                intent.instrument
            )));
        }

        let fill = Fill {
            order_id: intent.id.clone(),
            instrument: intent.instrument.clone(),
            side: intent.side,
            offset: intent.offset,
            price: self.fill_price(intent.side, mid),
            volume: intent.volume,
            timestamp: Utc::now(),
        };

        debug!(
            instrument = %fill.instrument,
            side = %fill.side,
            offset = %fill.offset,
            mid = mid,
            fill = fill.price,
            volume = fill.volume,
            "Paper fill simulated"
        );

        match &self.mode {
            FillMode::Immediate => {
                book_fill(&self.positions, &fill).await;
                Ok(OrderResult::Filled(fill))
            }
            FillMode::Deferred(event_tx) => {
                let positions = self.positions.clone();
                let event_tx = event_tx.clone();
                let order_id = fill.order_id.clone();
                tokio::spawn(async move {
                    book_fill(&positions, &fill).await;
                    if event_tx.send(ExecutionEvent::Fill(fill)).await.is_err() {
                        warn!("Execution event channel closed; paper fill not delivered");
                    }
                });
                Ok(OrderResult::Working { order_id })
            }
        }
    }

    async fn query_position(&self, instrument: &str) -> Result<Position> {
        Ok(self
            .positions
            .read()
            .await
            .get(instrument)
            .cloned()
            .unwrap_or_default())
    }
}
