//! Simulated-time APIs: points in time and durations with microsecond resolution.
//!
//! All simulation progress is expressed in integer microseconds. Scenario inputs given in
//! seconds or milliseconds are converted once at build time; no floating-point timestamps
//! exist anywhere in the core.

use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// A duration with microsecond resolution.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Duration(u64);

impl Duration {
    /// The inter-frame spacing between consecutive LL packets on the same channel.
    pub const T_IFS: Self = Duration(150);

    /// A zero-length duration.
    pub const ZERO: Self = Duration(0);

    /// Creates a `Duration` from a number of microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Duration(micros)
    }

    /// Creates a `Duration` representing the given number of milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Duration(millis * 1_000)
    }

    /// Creates a `Duration` representing a number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs * 1_000_000)
    }

    /// Returns the number of whole seconds that fit in `self`.
    pub fn whole_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Returns the number of whole milliseconds that fit in `self`.
    pub fn whole_millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Returns the number of microseconds represented by `self`.
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Returns the fractional part of microseconds in `self`.
    pub fn subsec_micros(&self) -> u64 {
        self.0 % 1_000_000
    }

    /// Duration-by-integer multiplication.
    pub const fn times(&self, n: u64) -> Self {
        Duration(self.0 * n)
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Duration(self.0.checked_add(rhs.0).expect("duration overflow"))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Duration(self.0.checked_sub(rhs.0).expect("duration underflow"))
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_micros(self.0, f)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// A point in simulated time, relative to the scenario start.
///
/// Unlike a hardware timer this cannot wrap: 64 bits of microseconds outlast any scenario.
/// `Instant`s are totally ordered and only ever produced by the scheduler, so monotonicity
/// of observed timestamps follows from scheduler monotonicity.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Instant(u64);

impl Instant {
    /// The scenario start.
    pub const ZERO: Self = Instant(0);

    /// Creates an `Instant` from raw microseconds since scenario start.
    pub const fn from_micros(micros: u64) -> Self {
        Instant(micros)
    }

    /// Returns the raw microsecond value of this `Instant`.
    pub const fn micros(&self) -> u64 {
        self.0
    }

    /// Calculates the time that has passed between `earlier` and `self`.
    ///
    /// Panics if `earlier` is later than `self`; simulated time never moves backwards, so
    /// a panic here is a scheduling bug.
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration(
            self.0
                .checked_sub(earlier.0)
                .expect("`duration_since` with later instant"),
        )
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.duration_since(rhs)
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, d: Duration) -> Self {
        Instant(self.0.checked_add(d.as_micros()).expect("instant overflow"))
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, d: Duration) {
        *self = *self + d;
    }
}

impl Sub<Duration> for Instant {
    type Output = Self;

    fn sub(self, d: Duration) -> Self {
        Instant(
            self.0
                .checked_sub(d.as_micros())
                .expect("instant underflow"),
        )
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_micros(self.0, f)
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

fn fmt_micros(us: u64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if us >= 1_000_000 {
        let (secs, subsec_micros) = (us / 1_000_000, us % 1_000_000);
        if subsec_micros == 0 {
            write!(f, "{}s", secs)
        } else {
            write!(f, "{}.{:06}s", secs, subsec_micros)
        }
    } else if us >= 1000 {
        let (millis, submilli_micros) = (us / 1000, us % 1000);
        if submilli_micros == 0 {
            write!(f, "{}ms", millis)
        } else {
            write!(f, "{}.{:03}ms", millis, submilli_micros)
        }
    } else {
        write!(f, "{}µs", us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let t = Instant::from_micros(1_000);
        let t2 = t + Duration::from_millis(9);
        assert_eq!(t2.micros(), 10_000);
        assert_eq!(t2 - t, Duration::from_micros(9_000));
        assert_eq!(Duration::from_secs(2).whole_millis(), 2_000);
        assert_eq!(Duration::from_millis(10).times(3), Duration::from_micros(30_000));
    }

    #[test]
    fn display() {
        assert_eq!(Duration::from_micros(150).to_string(), "150µs");
        assert_eq!(Duration::from_micros(2_500).to_string(), "2.500ms");
        assert_eq!(Duration::from_secs(3).to_string(), "3s");
        assert_eq!(Instant::from_micros(1_250_000).to_string(), "1.250000s");
    }

    #[test]
    #[should_panic(expected = "later instant")]
    fn negative_duration_panics() {
        let _ = Instant::from_micros(5).duration_since(Instant::from_micros(6));
    }
}
