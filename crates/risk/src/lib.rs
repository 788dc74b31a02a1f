pub mod cache;
pub mod controller;
pub mod stops;
pub mod throttle;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::PositionCache;
pub use controller::{RiskConfig, RiskController};
pub use stops::{ProtectiveStop, StopBook};
pub use throttle::SignalThrottle;
