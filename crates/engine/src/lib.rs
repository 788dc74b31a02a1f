pub mod config;
pub mod executor;
pub mod feed;
pub mod lifecycle;
pub mod trader;

pub use config::{InstrumentConfig, SessionFileConfig};
pub use executor::{DecisionDispatcher, DispatchOutcome};
pub use feed::BarFeed;
pub use lifecycle::{route_execution_events, Engine, EngineHandle};
pub use trader::{BarOutcome, StrategyHandler, Trader};
