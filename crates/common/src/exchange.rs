use async_trait::async_trait;

use crate::{Bar, ExecutionIntent, OrderResult, Position, Result};

/// Abstraction over the execution/account collaborator.
///
/// `PaperClient` implements this for simulation. Only the decision dispatcher
/// calls `submit_order`, and every intent it submits has passed the risk
/// controller first. `query_position` is the source of truth the position
/// cache reads through.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Submit an approved intent and return the collaborator's answer.
    async fn submit_order(&self, intent: &ExecutionIntent) -> Result<OrderResult>;

    /// Query the current position for one instrument.
    async fn query_position(&self, instrument: &str) -> Result<Position>;
}

/// Abstraction over the market-data collaborator.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Latest bar for the instrument, or `None` when nothing is available
    /// (or a finite source is exhausted).
    async fn latest_bar(&self, instrument: &str) -> Result<Option<Bar>>;
}
