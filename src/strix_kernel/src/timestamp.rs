//! An opaque time value used for timeout bookkeeping.
//!
//! [`Timestamp`] represents a duration or an instant as a single scaled
//! integer (nanoseconds in a 64-bit value). The representation is private;
//! everything the rest of the kernel needs is expressed through the
//! operations below, all of which are exact for the supported range and
//! O(1). A two-field seconds/fraction pair would satisfy the same contract -
//! the single-integer form makes comparison and accumulation branch-free,
//! which matters because these run on every dispatch.
use core::fmt;

use crate::utils::Init;

const NANOSECONDS_PER_SECOND: i64 = 1_000_000_000;

/// A point in time or a span of time, with nanosecond resolution.
///
/// Values constructed through the public constructors are *valid*
/// (non-negative). Subtraction requires `start <= end`; the difference of
/// two valid values is valid.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The zero value.
    pub const ZERO: Self = Self(0);

    /// Construct a `Timestamp` from whole seconds and a nanosecond
    /// remainder.
    pub const fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self(seconds * NANOSECONDS_PER_SECOND + nanoseconds as i64)
    }

    /// Return `true` iff `self` represents a valid (non-negative) time
    /// value.
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// The whole-seconds portion.
    pub const fn seconds(self) -> i64 {
        self.0 / NANOSECONDS_PER_SECOND
    }

    /// The sub-second portion, in nanoseconds.
    pub const fn nanoseconds(self) -> u32 {
        (self.0 % NANOSECONDS_PER_SECOND) as u32
    }

    /// Add `add` to `self` in place, returning the number of whole-second
    /// boundaries the accumulated value crossed. The return value is what
    /// periodic-tick bookkeeping uses to maintain a seconds counter without
    /// a second division.
    pub fn add_to(&mut self, add: Self) -> u32 {
        let seconds_before = self.seconds();
        self.0 += add.0;
        (self.seconds() - seconds_before) as u32
    }

    /// The span from `start` to `self`.
    ///
    /// `start` must not be later than `self`; the result is never negative
    /// for valid inputs.
    pub fn duration_since(self, start: Self) -> Self {
        debug_assert!(start.0 <= self.0, "duration would be negative");
        Self(self.0 - start.0)
    }

    /// Divide the span by an iteration count. Used for averaging a measured
    /// duration over a number of iterations.
    pub const fn divide_by_integer(self, iterations: u32) -> Self {
        Self(self.0 / iterations as i64)
    }

    /// Express `self` as a percentage of `rhs`, as an integer part and a
    /// fractional part scaled to three decimal digits.
    ///
    /// `divide(Timestamp::new(1, 0), Timestamp::new(3, 0))` is
    /// `(33, 333)`, i.e. 33.333%. Returns `(0, 0)` when `rhs` is zero.
    pub const fn divide(self, rhs: Self) -> (u32, u32) {
        if rhs.0 == 0 {
            return (0, 0);
        }

        // Scale by 100 for the percentage and by 1000 more for the three
        // fractional digits. The intermediate product needs more than 64
        // bits for large spans.
        let answer = (self.0 as i128 * 100_000 / rhs.0 as i128) as u64;
        ((answer / 1000) as u32, (answer % 1000) as u32)
    }

    /// Construct a `Timestamp` from a tick count.
    pub const fn from_ticks(ticks: u64, nanoseconds_per_tick: u32) -> Self {
        Self(ticks as i64 * nanoseconds_per_tick as i64)
    }

    /// The number of whole ticks `self` spans. Truncates a partial trailing
    /// tick; exact for values produced by [`Self::from_ticks`] with the same
    /// tick period.
    pub const fn to_ticks(self, nanoseconds_per_tick: u32) -> u64 {
        (self.0 / nanoseconds_per_tick as i64) as u64
    }
}

impl Init for Timestamp {
    const INIT: Self = Self::ZERO;
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}s", self.seconds(), self.nanoseconds())
    }
}
