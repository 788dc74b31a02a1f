pub mod atr;
pub mod rsi;
pub mod sma;
pub mod store;

pub use atr::Atr;
pub use rsi::Rsi;
pub use sma::RollingMean;
pub use store::IndicatorStore;
