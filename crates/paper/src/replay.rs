use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use common::{Bar, Error, MarketDataSource, Result};

/// One CSV row: `timestamp,open,high,low,close,volume` with an RFC 3339
/// timestamp.
#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Market data replayed from recorded bars, one bar per poll.
#[derive(Default)]
pub struct ReplaySource {
    bars: Mutex<HashMap<String, VecDeque<Bar>>>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `<dir>/<instrument>.csv` for each instrument.
    pub fn from_dir(dir: impl AsRef<Path>, instruments: &[String]) -> Result<Self> {
        let mut bars = HashMap::new();
        for instrument in instruments {
            let path = dir.as_ref().join(format!("{instrument}.csv"));
            let file = std::fs::File::open(&path).map_err(|e| {
                Error::MarketData(format!("cannot open {}: {e}", path.display()))
            })?;
            let loaded = parse_csv(instrument, file)?;
            info!(instrument = %instrument, bars = loaded.len(), path = %path.display(), "Loaded replay bars");
            bars.insert(instrument.clone(), loaded);
        }
        Ok(Self {
            bars: Mutex::new(bars),
        })
    }

    /// Queue bars parsed from CSV for one instrument.
    pub async fn load_csv(&self, instrument: &str, reader: impl Read) -> Result<usize> {
        let parsed = parse_csv(instrument, reader)?;
        let count = parsed.len();
        self.bars
            .lock()
            .await
            .entry(instrument.to_string())
            .or_default()
            .extend(parsed);
        Ok(count)
    }

    pub async fn push(&self, bar: Bar) {
        self.bars
            .lock()
            .await
            .entry(bar.instrument.clone())
            .or_default()
            .push_back(bar);
    }

    pub async fn remaining(&self, instrument: &str) -> usize {
        self.bars.lock().await.get(instrument).map_or(0, |q| q.len())
    }
}

fn parse_csv(instrument: &str, reader: impl Read) -> Result<VecDeque<Bar>> {
    csv::Reader::from_reader(reader)
        .deserialize::<CsvBar>()
        .enumerate()
        .map(|(row, record)| -> Result<Bar> {
            let r = record.map_err(|e| {
                Error::MarketData(format!("{instrument} row {}: {e}", row + 1))
            })?;
            Ok(Bar {
                instrument: instrument.to_string(),
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
                timestamp: r.timestamp,
            })
        })
        .collect()
}

#[async_trait]
impl MarketDataSource for ReplaySource {
    async fn latest_bar(&self, instrument: &str) -> Result<Option<Bar>> {
        Ok(self
            .bars
            .lock()
            .await
            .get_mut(instrument)
            .and_then(|q| q.pop_front()))
    }
}
