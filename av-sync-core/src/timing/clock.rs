use std::fmt;
use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A point on the shared monotonic timeline, in nanoseconds since the clock origin.
///
/// Both capture paths stamp units with the same `Clock`, so audio and video
/// instants are directly comparable.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MonotonicInstant(u64);

impl MonotonicInstant {
    pub const ZERO: Self = Self(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn from_duration(since_origin: Duration) -> Self {
        Self(u64::try_from(since_origin.as_nanos()).unwrap_or(u64::MAX))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }

    /// Signed distance `self - earlier` in nanoseconds.
    pub fn offset_from(self, earlier: MonotonicInstant) -> i64 {
        let diff = i128::from(self.0) - i128::from(earlier.0);
        diff.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    pub fn saturating_duration_since(self, earlier: MonotonicInstant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Shift by a signed number of nanoseconds, clamping at the origin.
    pub fn shifted(self, nanos: i64) -> Self {
        if nanos >= 0 {
            Self(self.0.saturating_add(nanos.unsigned_abs()))
        } else {
            Self(self.0.saturating_sub(nanos.unsigned_abs()))
        }
    }
}

impl Add<Duration> for MonotonicInstant {
    type Output = MonotonicInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX)))
    }
}

impl AddAssign<Duration> for MonotonicInstant {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl fmt::Display for MonotonicInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.0 as f64 / 1_000_000.0)
    }
}

/// Converts a signed nanosecond offset to milliseconds for logs and metrics.
pub fn nanos_to_millis(nanos: i64) -> f64 {
    nanos as f64 / 1_000_000.0
}

/// Monotonic timestamp source shared by every capture path.
///
/// Must never fail, never go backwards, and be independent of wall-clock changes.
pub trait Clock: Send + Sync {
    fn now(&self) -> MonotonicInstant;
}

pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by `std::time::Instant`, with its origin at construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> MonotonicInstant {
        MonotonicInstant::from_duration(self.origin.elapsed())
    }
}

/// Manually driven clock for deterministic tests and simulation.
///
/// `set` never moves the clock backwards.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start: MonotonicInstant) -> Self {
        Self {
            nanos: AtomicU64::new(start.as_nanos()),
        }
    }

    pub fn advance(&self, by: Duration) -> MonotonicInstant {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let previous = self.nanos.fetch_add(by, Ordering::AcqRel);
        MonotonicInstant::from_nanos(previous.saturating_add(by))
    }

    pub fn set(&self, to: MonotonicInstant) {
        self.nanos.fetch_max(to.as_nanos(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> MonotonicInstant {
        MonotonicInstant::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_non_decreasing() {
        let clock = SystemClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn manual_clock_never_goes_backwards() {
        let clock = ManualClock::new(MonotonicInstant::from_millis(10));
        clock.set(MonotonicInstant::from_millis(5));
        assert_eq!(clock.now(), MonotonicInstant::from_millis(10));

        clock.advance(Duration::from_millis(3));
        assert_eq!(clock.now(), MonotonicInstant::from_millis(13));

        clock.set(MonotonicInstant::from_millis(20));
        assert_eq!(clock.now(), MonotonicInstant::from_millis(20));
    }

    #[test]
    fn signed_offsets() {
        let a = MonotonicInstant::from_millis(100);
        let b = MonotonicInstant::from_millis(70);
        assert_eq!(a.offset_from(b), 30_000_000);
        assert_eq!(b.offset_from(a), -30_000_000);
        assert_eq!(b.saturating_duration_since(a), Duration::ZERO);
    }

    #[test]
    fn shifted_clamps_at_origin() {
        let t = MonotonicInstant::from_millis(1);
        assert_eq!(t.shifted(-5_000_000), MonotonicInstant::ZERO);
        assert_eq!(t.shifted(2_000_000), MonotonicInstant::from_millis(3));
    }

    #[test]
    fn add_duration() {
        let mut t = MonotonicInstant::from_millis(1);
        t += Duration::from_micros(500);
        assert_eq!(t.as_nanos(), 1_500_000);
    }
}
