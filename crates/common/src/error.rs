use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Data gap on {instrument}: bar at {got} does not follow {last}")]
    DataGap {
        instrument: String,
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    #[error("Indicators not ready: {observed}/{required} bars")]
    IndicatorNotReady { observed: usize, required: usize },

    #[error("Position query failed: {0}")]
    PositionQuery(String),

    #[error("Position query timed out after {0:?}")]
    PositionQueryTimeout(Duration),

    #[error("Degenerate risk input: {0}")]
    DegenerateRisk(String),

    #[error("Execution rejected: {reason}")]
    ExecutionRejected { reason: String },

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
