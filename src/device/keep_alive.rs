//! Keep-alive scheduling
//!
//! AirWater devices only push status while they are asked to, so the session
//! re-sends GET_STATUS every [`KEEP_ALIVE_INTERVAL`] and once right after every
//! (re)connect.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Why a keep-alive is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveTrigger {
    Connected,
    Periodic,
    /// Explicit refresh, e.g. after a local settings change
    Requested,
}

pub struct KeepAliveScheduler {
    period: Duration,
    interval: Interval,
}

impl KeepAliveScheduler {
    /// First periodic tick is one `period` from now.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: Self::build_interval(period),
        }
    }

    fn build_interval(period: Duration) -> Interval {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn tick(&mut self) -> KeepAliveTrigger {
        self.interval.tick().await;
        KeepAliveTrigger::Periodic
    }

    /// Restarts the period after an out-of-band keep-alive (on connect).
    pub fn reset(&mut self) {
        self.interval.reset();
    }
}

impl Default for KeepAliveScheduler {
    fn default() -> Self {
        Self::new(KEEP_ALIVE_INTERVAL)
    }
}
