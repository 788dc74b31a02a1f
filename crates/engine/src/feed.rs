use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{Bar, MarketDataSource};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Polls a market-data source for one instrument and forwards each new bar
/// to the instrument's trader.
///
/// Repeated reads of the same bar (same timestamp) are dropped here.
/// Out-of-order bars are forwarded so the indicator store can flag them.
/// The feed ends when the source reports no further bars.
#[derive(Clone)]
pub struct BarFeed {
    instrument: String,
    source: Arc<dyn MarketDataSource>,
    poll_interval: Duration,
    bar_tx: mpsc::Sender<Bar>,
}

impl BarFeed {
    pub fn new(
        instrument: impl Into<String>,
        source: Arc<dyn MarketDataSource>,
        poll_interval: Duration,
        bar_tx: mpsc::Sender<Bar>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            source,
            poll_interval,
            bar_tx,
        }
    }

    /// Poll until the source is exhausted or the trader goes away.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        info!(instrument = %self.instrument, interval = ?self.poll_interval, "Bar feed started");

        let mut last_forwarded: Option<DateTime<Utc>> = None;
        let mut backoff = self.poll_interval;

        loop {
            match self.source.latest_bar(&self.instrument).await {
                Ok(Some(bar)) => {
                    backoff = self.poll_interval;
                    if last_forwarded == Some(bar.timestamp) {
                        debug!(instrument = %self.instrument, "No new bar");
                    } else {
                        last_forwarded = Some(bar.timestamp);
                        if self.bar_tx.send(bar).await.is_err() {
                            warn!(instrument = %self.instrument, "Trader gone — bar feed exiting");
                            return;
                        }
                        // Drain whatever is already queued before sleeping
                        continue;
                    }
                }
                Ok(None) => {
                    info!(instrument = %self.instrument, "Market data exhausted — bar feed exiting");
                    return;
                }
                Err(e) => {
                    warn!(instrument = %self.instrument, error = %e, backoff = ?backoff, "Market data error, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
