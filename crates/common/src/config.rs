/// Process-level configuration loaded from environment variables at startup.
/// Invalid values cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Session file with per-instrument strategy and risk settings
    pub session_config_path: String,

    // Market data
    pub bar_source_dir: String,
    pub bar_poll_interval_ms: u64,

    // Position cache background refresh
    pub position_refresh_interval_ms: u64,

    // Dashboard status surface
    pub dashboard_port: u16,

    // Paper execution
    pub paper_slippage_bps: f64,
    pub paper_async_fills: bool,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any unparsable value.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            session_config_path: optional_env("SESSION_CONFIG_PATH")
                .unwrap_or_else(|| "config/session.toml".to_string()),
            bar_source_dir: optional_env("BAR_SOURCE_DIR").unwrap_or_else(|| "data".to_string()),
            bar_poll_interval_ms: parsed_env("BAR_POLL_INTERVAL_MS", 1_000),
            position_refresh_interval_ms: parsed_env("POSITION_REFRESH_INTERVAL_MS", 5_000),
            dashboard_port: parsed_env("DASHBOARD_PORT", 8080),
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", 10.0),
            paper_async_fills: parsed_env("PAPER_ASYNC_FILLS", false),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            panic!("Environment variable '{key}' has invalid value '{raw}': {e}")
        }),
        None => default,
    }
}
