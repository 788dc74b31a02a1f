use chrono::{DateTime, Utc};

use common::RejectionReason;

/// Minimum gap between accepted decisions on one instrument.
///
/// Remembers which intent last moved the timestamp and what it replaced, so
/// an intent the execution path rejects can give its slot back.
#[derive(Debug, Clone)]
pub struct SignalThrottle {
    min_interval_ms: i64,
    last: Option<DateTime<Utc>>,
    replaced: Option<DateTime<Utc>>,
    holder: Option<String>,
}

impl SignalThrottle {
    pub fn new(min_interval_secs: u64) -> Self {
        Self {
            min_interval_ms: min_interval_secs as i64 * 1_000,
            last: None,
            replaced: None,
            holder: None,
        }
    }

    /// Rejects when `now - last <= min_interval` (inclusive).
    pub fn permits(&self, now: DateTime<Utc>) -> Result<(), RejectionReason> {
        match self.last {
            Some(last) if (now - last).num_milliseconds() <= self.min_interval_ms => {
                Err(RejectionReason::Throttled {
                    elapsed_secs: (now - last).num_seconds(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn mark(&mut self, now: DateTime<Utc>, intent_id: &str) {
        self.replaced = self.last;
        self.last = Some(now);
        self.holder = Some(intent_id.to_string());
    }

    /// Restore the previous timestamp if `intent_id` was the last to set it.
    /// Returns whether anything changed.
    pub fn unlock(&mut self, intent_id: &str) -> bool {
        if self.holder.as_deref() != Some(intent_id) {
            return false;
        }
        self.last = self.replaced.take();
        self.holder = None;
        true
    }

    pub fn last_signal_at(&self) -> Option<DateTime<Utc>> {
        self.last
    }
}
