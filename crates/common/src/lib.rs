pub mod config;
pub mod error;
pub mod exchange;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::{ExecutionClient, MarketDataSource};
pub use types::*;
