use chrono::{DateTime, Duration, Utc};

/// Wall-clock source for session timestamps.
///
/// `Fixed` keeps services and tests deterministic; the exam engine layers a
/// monotonic offset on top of whatever this returns at session start.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// If this is a fixed clock, advance it by the given duration.
    ///
    /// Has no effect on `Clock::Default`.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }

    #[must_use]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Clock::Fixed(_))
    }
}

/// Milliseconds left until `deadline`, floored at zero.
#[must_use]
pub fn remaining_ms(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let left = deadline.signed_duration_since(now).num_milliseconds();
    u64::try_from(left).unwrap_or(0)
}

/// Converts a std duration into a chrono one, saturating on overflow.
#[must_use]
pub fn to_delta(value: std::time::Duration) -> Duration {
    Duration::from_std(value).unwrap_or(Duration::MAX)
}

/// `at + by`, clamped to the latest representable instant.
#[must_use]
pub fn offset(at: DateTime<Utc>, by: std::time::Duration) -> DateTime<Utc> {
    at.checked_add_signed(to_delta(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Deterministic timestamp for tests and examples (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}
