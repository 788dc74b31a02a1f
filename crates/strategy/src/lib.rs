pub mod config;
pub mod indicators;
pub mod regime;
pub mod router;
pub mod signals;

pub use config::{IndicatorConfig, RegimeConfig, RegimeSizing, SignalConfig, StrategyParams};
pub use indicators::IndicatorStore;
pub use regime::{raw_regime, RegimeClassifier};
pub use router::SignalRouter;
pub use signals::{entry_allowed, SignalContext, SignalGenerator};
