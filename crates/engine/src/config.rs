use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use common::{Error, Result};
use risk::RiskConfig;
use strategy::StrategyParams;

/// Top-level session file (TOML), one table per traded instrument.
///
/// Example `config/session.toml`:
/// ```toml
/// [[instrument]]
/// name = "IF main"
/// instrument = "IF2406"
///
/// [instrument.strategy.indicators]
/// fast_window = 5
/// slow_window = 20
///
/// [instrument.risk]
/// base_volume = 1.0
/// min_signal_interval_secs = 60
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionFileConfig {
    #[serde(rename = "instrument")]
    pub instruments: Vec<InstrumentConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentConfig {
    /// Human-readable name shown in logs and the status API.
    pub name: String,
    /// Instrument code as known to market data and execution.
    pub instrument: String,
    #[serde(default)]
    pub strategy: StrategyParams,
    #[serde(default)]
    pub risk: RiskConfig,
}

impl SessionFileConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path).unwrap_or_else(|e| {
            panic!("Failed to read session config at '{path}': {e}")
        });
        Self::parse(&content).unwrap_or_else(|e| {
            panic!("Invalid session config at '{path}': {e}")
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            return Err(Error::Config("at least one [[instrument]] is required".into()));
        }
        let mut seen = HashSet::new();
        for cfg in &self.instruments {
            if cfg.instrument.trim().is_empty() {
                return Err(Error::Config(format!("instrument code missing for '{}'", cfg.name)));
            }
            if !seen.insert(cfg.instrument.as_str()) {
                return Err(Error::Config(format!(
                    "instrument '{}' configured more than once",
                    cfg.instrument
                )));
            }
            cfg.strategy
                .validate()
                .and_then(|_| cfg.risk.validate())
                .map_err(|e| match e {
                    Error::Config(msg) => Error::Config(format!("{}: {msg}", cfg.instrument)),
                    other => other,
                })?;
        }
        Ok(())
    }

    pub fn instrument_codes(&self) -> Vec<String> {
        self.instruments.iter().map(|c| c.instrument.clone()).collect()
    }
}
