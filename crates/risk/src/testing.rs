use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use common::{Error, ExecutionClient, ExecutionIntent, OrderResult, Position, Result};

/// Answers position queries from a settable value, optionally slowly.
/// Every submission is left working.
pub(crate) struct ScriptedClient {
    position: Mutex<Result<Position, String>>,
    delay: Mutex<Duration>,
}

impl ScriptedClient {
    pub fn new(long: f64) -> Arc<Self> {
        Self::with_position(Position {
            long_volume: long,
            long_avg_price: if long > 0.0 { 100.0 } else { 0.0 },
            ..Position::default()
        })
    }

    pub fn with_position(position: Position) -> Arc<Self> {
        Arc::new(Self {
            position: Mutex::new(Ok(position)),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_position(&self, position: Position) {
        *self.position.lock().unwrap() = Ok(position);
    }

    pub fn fail(&self) {
        *self.position.lock().unwrap() = Err("gateway down".into());
    }

    pub fn set_delay(&self, d: Duration) {
        *self.delay.lock().unwrap() = d;
    }
}

#[async_trait]
impl ExecutionClient for ScriptedClient {
    async fn submit_order(&self, intent: &ExecutionIntent) -> Result<OrderResult> {
        Ok(OrderResult::Working {
            order_id: intent.id.clone(),
        })
    }

    async fn query_position(&self, _instrument: &str) -> Result<Position> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.position.lock().unwrap().clone().map_err(Error::PositionQuery)
    }
}
