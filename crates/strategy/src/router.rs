use tracing::info;

use common::{Decision, RegimeState};

use crate::config::StrategyParams;
use crate::signals::{
    RangingSignal, SignalContext, SignalGenerator, TransitionSignal, TrendingSignal,
    VolatileSignal,
};

/// Holds one generator per regime and dispatches each context to the one
/// matching its classified regime.
pub struct SignalRouter {
    generators: Vec<Box<dyn SignalGenerator>>,
}

impl SignalRouter {
    pub fn from_params(params: &StrategyParams) -> Self {
        let signals = &params.signals;
        let generators: Vec<Box<dyn SignalGenerator>> = vec![
            Box::new(TrendingSignal::new(signals, params.regime.trend_threshold)),
            Box::new(RangingSignal::new(signals)),
            Box::new(VolatileSignal::new(signals)),
            Box::new(TransitionSignal::new(signals)),
        ];
        for g in &generators {
            info!(regime = %g.regime(), "Registered signal generator");
        }
        Self { generators }
    }

    /// Replace the generator for `generator.regime()`.
    pub fn with_generator(mut self, generator: Box<dyn SignalGenerator>) -> Self {
        let regime = generator.regime();
        self.generators.retain(|g| g.regime() != regime);
        self.generators.push(generator);
        self
    }

    pub fn generate(&self, ctx: &SignalContext<'_>) -> Decision {
        match self.generators.iter().find(|g| g.regime() == ctx.regime) {
            Some(generator) => generator.evaluate(ctx),
            None => ctx.hold(format!("no generator for {} regime", ctx.regime)),
        }
    }

    pub fn regimes(&self) -> impl Iterator<Item = RegimeState> + '_ {
        self.generators.iter().map(|g| g.regime())
    }
}
