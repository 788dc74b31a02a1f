use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{Error, ExecutionClient, Fill, Position, Result};

#[derive(Debug, Default)]
struct CachedPosition {
    position: Position,
    fetched_at: Option<Instant>,
    /// Bumped on every locally applied fill. A query started under an older
    /// generation must not overwrite the fill.
    generation: u64,
    last_error: Option<String>,
}

/// Read-through cache of the externally owned position for one instrument.
///
/// Cloning is cheap and every clone shares the same cached value, so the
/// periodic refresher and the trader see one consistent snapshot. Readers
/// always get a whole `Position`; a refresh replaces it in a single write.
#[derive(Clone)]
pub struct PositionCache {
    instrument: String,
    client: Arc<dyn ExecutionClient>,
    inner: Arc<RwLock<CachedPosition>>,
    ttl: Duration,
    timeout: Duration,
    max_age: Duration,
}

impl PositionCache {
    pub fn new(
        instrument: impl Into<String>,
        client: Arc<dyn ExecutionClient>,
        ttl: Duration,
        timeout: Duration,
        max_age: Duration,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            client,
            inner: Arc::new(RwLock::new(CachedPosition::default())),
            ttl,
            timeout,
            max_age,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub async fn snapshot(&self) -> Position {
        self.inner.read().await.position.clone()
    }

    /// Time since the last successful query, `None` if never loaded.
    pub async fn age(&self) -> Option<Duration> {
        self.inner.read().await.fetched_at.map(|t| t.elapsed())
    }

    /// Older than the TTL (or never loaded): due for a routine refresh.
    pub async fn is_expired(&self) -> bool {
        self.age().await.map_or(true, |age| age > self.ttl)
    }

    /// Older than the hard ceiling (or never loaded): unusable for opening
    /// new exposure.
    pub async fn is_stale(&self) -> bool {
        self.age().await.map_or(true, |age| age > self.max_age)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }

    /// Query the execution collaborator and replace the cached value.
    ///
    /// On failure or timeout the previous value is left untouched and the
    /// error is returned. A result that raced with a local fill is dropped
    /// and the current (fill-updated) value returned instead.
    pub async fn refresh(&self) -> Result<Position> {
        let generation = self.inner.read().await.generation;

        let queried = match tokio::time::timeout(
            self.timeout,
            self.client.query_position(&self.instrument),
        )
        .await
        {
            Ok(Ok(position)) => position,
            Ok(Err(e)) => {
                let err = match e {
                    Error::PositionQuery(_) => e,
                    other => Error::PositionQuery(other.to_string()),
                };
                self.inner.write().await.last_error = Some(err.to_string());
                return Err(err);
            }
            Err(_) => {
                let err = Error::PositionQueryTimeout(self.timeout);
                self.inner.write().await.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        let mut cached = self.inner.write().await;
        if cached.generation != generation {
            debug!(
                instrument = %self.instrument,
                "Discarding position query that raced with a local fill"
            );
            return Ok(cached.position.clone());
        }
        cached.position = Position {
            last_refresh: Some(Utc::now()),
            ..queried
        };
        cached.fetched_at = Some(Instant::now());
        cached.last_error = None;
        Ok(cached.position.clone())
    }

    /// Refresh only when the TTL has run out; otherwise return the cache.
    pub async fn refresh_if_expired(&self) -> Result<Position> {
        if self.is_expired().await {
            self.refresh().await
        } else {
            Ok(self.snapshot().await)
        }
    }

    /// Fold a fill into the cached value without waiting for the next query.
    pub async fn apply_fill(&self, fill: &Fill) -> Position {
        let mut cached = self.inner.write().await;
        cached.position.apply_fill(fill);
        cached.generation += 1;
        cached.position.clone()
    }

    /// Background refresh loop. Runs until the task is aborted.
    pub async fn run_periodic(self, period: Duration) {
        info!(instrument = %self.instrument, period_ms = period.as_millis() as u64, "Position refresher running");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh().await {
                warn!(instrument = %self.instrument, error = %e, "Periodic position refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;
    use common::{Offset, OrderSide};

    fn cache(client: Arc<ScriptedClient>) -> PositionCache {
        PositionCache::new(
            "IF",
            client,
            Duration::from_secs(30),
            Duration::from_secs(2),
            Duration::from_secs(120),
        )
    }

    fn fill(volume: f64) -> Fill {
        Fill {
            order_id: "o1".into(),
            instrument: "IF".into(),
            side: OrderSide::Buy,
            offset: Offset::Open,
            price: 100.0,
            volume,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_loaded_cache_is_stale_and_expired() {
        let cache = cache(ScriptedClient::new(1.0));
        assert!(cache.is_stale().await);
        assert!(cache.is_expired().await);
        assert_eq!(cache.snapshot().await, Position::default());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loads_and_stamps_position() {
        let cache = cache(ScriptedClient::new(1.0));
        let pos = cache.refresh().await.unwrap();
        assert_eq!(pos.long_volume, 1.0);
        assert!(pos.last_refresh.is_some());
        assert!(!cache.is_stale().await);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_and_max_age_follow_the_clock() {
        let cache = cache(ScriptedClient::new(1.0));
        cache.refresh().await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.is_expired().await);
        assert!(!cache.is_stale().await);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(cache.is_stale().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_last_known_value() {
        let client = ScriptedClient::new(1.0);
        let cache = cache(client.clone());
        cache.refresh().await.unwrap();

        client.fail();
        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, Error::PositionQuery(_)));
        assert_eq!(cache.snapshot().await.long_volume, 1.0);
        assert!(cache.last_error().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_query_times_out() {
        let client = ScriptedClient::new(1.0);
        client.set_delay(Duration::from_secs(5));
        let cache = cache(client);
        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, Error::PositionQueryTimeout(_)));
        assert!(cache.is_stale().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_racing_a_local_fill_is_discarded() {
        let client = ScriptedClient::new(0.0);
        client.set_delay(Duration::from_millis(500));
        let cache = cache(client);

        let refresher = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh().await })
        };
        // Let the query start, then land a fill while it is outstanding
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.apply_fill(&fill(1.0)).await;

        let pos = refresher.await.unwrap().unwrap();
        assert_eq!(pos.long_volume, 1.0);
        assert_eq!(cache.snapshot().await.long_volume, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_refresh_leaves_cached_value_intact() {
        let client = ScriptedClient::new(1.0);
        let cache = cache(client.clone());
        cache.refresh().await.unwrap();
        let loaded = cache.snapshot().await;
        let age_before = cache.age().await.unwrap();
        let start = Instant::now();

        client.set_position(Position::default());
        client.set_delay(Duration::from_secs(1));
        let refresher = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        refresher.abort();
        assert!(refresher.await.unwrap_err().is_cancelled());

        // Nothing lands later either
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.snapshot().await, loaded);
        assert_eq!(cache.age().await, Some(age_before + start.elapsed()));
        assert!(cache.last_error().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_if_expired_skips_fresh_cache() {
        let client = ScriptedClient::new(1.0);
        let cache = cache(client.clone());
        cache.refresh().await.unwrap();

        client.fail();
        assert!(cache.refresh_if_expired().await.is_ok());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.refresh_if_expired().await.is_err());
    }
}
