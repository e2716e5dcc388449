//! Wall clock for expectation windows and cache expiry.
//!
//! The clock is anchored to UTC once and then advanced with
//! `tokio::time::Instant`, so tests running on a paused runtime see a
//! consistent wall clock as time is advanced.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// A clock that reads `start` right now.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            anchor_utc: start,
            anchor: Instant::now(),
        }
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.anchor.elapsed()).unwrap_or(TimeDelta::MAX);
        self.anchor_utc
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Current unix time in whole seconds, rounded to nearest.
    pub fn now_secs(&self) -> i64 {
        let millis = self.now_utc().timestamp_millis();
        (millis + 500).div_euclid(1000)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
