use std::time::Duration;

use chrono::{DateTime, Utc};
use exam_core::Clock;
use exam_core::time::{offset, remaining_ms};
use tokio::time::Instant;

/// Outcome of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub remaining_ms: u64,
    /// True only on the tick that first observes zero.
    pub expired: bool,
}

/// Countdown towards an absolute deadline.
///
/// Remaining time is recomputed from the deadline on every tick, so missed
/// ticks (a suspended host, a slow event loop) correct themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    deadline: DateTime<Utc>,
    expired: bool,
}

impl Countdown {
    #[must_use]
    pub fn start(deadline: DateTime<Utc>) -> Self {
        Self {
            deadline,
            expired: false,
        }
    }

    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    #[must_use]
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        remaining_ms(self.deadline, now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> Tick {
        let remaining_ms = self.remaining_ms(now);
        let expired = remaining_ms == 0 && !self.expired;
        if expired {
            self.expired = true;
        }
        Tick {
            remaining_ms,
            expired,
        }
    }
}

/// Wall-clock time derived from a monotonic instant.
///
/// The wall clock is sampled once when the session starts; afterwards time
/// only moves forward with tokio's monotonic clock, which also makes paused
/// test runtimes drive the countdown deterministically.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
}

impl SessionClock {
    #[must_use]
    pub fn start(clock: Clock) -> Self {
        Self {
            origin_wall: clock.now(),
            origin: Instant::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        offset(self.origin_wall, self.origin.elapsed())
    }

    /// The tokio instant corresponding to a wall-clock time.
    #[must_use]
    pub fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        let since_origin = at
            .signed_duration_since(self.origin_wall)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.origin
            .checked_add(since_origin)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(365 * 24 * 60 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Delta;
    use exam_core::time::{fixed_clock, fixed_now};

    #[test]
    fn remaining_derives_from_deadline() {
        let now = fixed_now();
        let mut countdown = Countdown::start(now + Delta::seconds(2));

        let tick = countdown.tick(now);
        assert_eq!(tick.remaining_ms, 2_000);
        assert!(!tick.expired);

        // A skipped tick lands directly on the right value.
        let tick = countdown.tick(now + Delta::milliseconds(1_750));
        assert_eq!(tick.remaining_ms, 250);
    }

    #[test]
    fn expiry_fires_exactly_once() {
        let now = fixed_now();
        let mut countdown = Countdown::start(now + Delta::seconds(1));

        assert!(countdown.tick(now + Delta::seconds(1)).expired);
        let again = countdown.tick(now + Delta::seconds(5));
        assert_eq!(again.remaining_ms, 0);
        assert!(!again.expired);
        assert!(countdown.is_expired());
    }

    #[test]
    fn deadline_in_the_past_expires_on_first_tick() {
        let now = fixed_now();
        let mut countdown = Countdown::start(now - Delta::minutes(1));
        let tick = countdown.tick(now);
        assert_eq!(tick.remaining_ms, 0);
        assert!(tick.expired);
    }

    #[tokio::test(start_paused = true)]
    async fn session_clock_follows_virtual_time() {
        let clock = SessionClock::start(fixed_clock());
        assert_eq!(clock.now(), fixed_now());

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(clock.now(), fixed_now() + Delta::milliseconds(1_500));

        let target = fixed_now() + Delta::seconds(3);
        assert_eq!(
            clock.instant_at(target) - Instant::now(),
            Duration::from_millis(1_500)
        );
    }
}
