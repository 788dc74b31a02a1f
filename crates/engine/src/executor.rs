use std::sync::Arc;

use tracing::{error, info, warn};

use common::{ExecutionClient, ExecutionIntent, Fill, OrderResult};
use risk::RiskController;

/// What happened to a dispatched intent.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Filled(Fill),
    Working { order_id: String },
    Rejected { reason: String },
    Failed(String),
}

/// Forwards approved intents to the execution collaborator and reconciles
/// the answer into the risk controller's bookkeeping.
///
/// This is the ONLY component that calls `ExecutionClient::submit_order`.
pub struct DecisionDispatcher {
    client: Arc<dyn ExecutionClient>,
}

impl DecisionDispatcher {
    pub fn new(client: Arc<dyn ExecutionClient>) -> Self {
        Self { client }
    }

    pub async fn dispatch(
        &self,
        intent: &ExecutionIntent,
        risk: &mut RiskController,
    ) -> DispatchOutcome {
        info!(
            instrument = %intent.instrument,
            intent_id = %intent.id,
            side = %intent.side,
            offset = %intent.offset,
            volume = intent.volume,
            price = intent.price,
            "Dispatching intent"
        );

        match self.client.submit_order(intent).await {
            Ok(OrderResult::Filled(fill)) => {
                info!(
                    instrument = %fill.instrument,
                    price = fill.price,
                    volume = fill.volume,
                    "Order filled"
                );
                risk.on_fill(&fill).await;
                DispatchOutcome::Filled(fill)
            }
            Ok(OrderResult::Working { order_id }) => {
                info!(instrument = %intent.instrument, order_id = %order_id, "Order working");
                risk.bind_order(&intent.id, &order_id);
                DispatchOutcome::Working { order_id }
            }
            Ok(OrderResult::Rejected { reason }) => {
                warn!(instrument = %intent.instrument, reason = %reason, "Order rejected");
                risk.on_rejected(&intent.id, &reason).await;
                DispatchOutcome::Rejected { reason }
            }
            Err(e) => {
                error!(instrument = %intent.instrument, error = %e, "Order submission failed");
                risk.on_failed(&intent.id, &e).await;
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}
