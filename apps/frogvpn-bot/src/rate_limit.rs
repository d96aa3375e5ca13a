use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Admits one operation per `period`. Each job owns its own limiter.
pub struct RateLimiter {
    ticker: Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        // Zero periods would make `interval_at` panic.
        let period = period.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { ticker }
    }

    /// Waits for the next free slot. The first call returns immediately.
    pub async fn admit(&mut self) {
        self.ticker.tick().await;
    }
}
