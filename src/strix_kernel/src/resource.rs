//! The resource-set bit algebra.
//!
//! A [`ResourceSet`] is a fixed-width bit-set representing available units of
//! a countable or flagged resource. Each resource kind assigns its own
//! meaning to the bits: event flags map one condition per bit, counting
//! semaphores and message queues encode unit availability. The algebra is
//! the same for all of them: producers *post* (union) values into a task's
//! pending set, and the wake-up engine *seizes* (intersects) the pending set
//! against the task's wait condition and *clears* (subtracts) the consumed
//! bits.
//!
//! All operations are pure, total, and O(1); there is no failing case.
use core::fmt;

use crate::utils::Init;

/// A fixed-width bit-set of resource units.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSet(u32);

impl ResourceSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Union: the set with every unit of `value` added to `self`.
    #[must_use]
    pub const fn post(self, value: Self) -> Self {
        Self(self.0 | value.0)
    }

    /// Intersection: the units of `condition` that are present in `self`.
    #[must_use]
    pub const fn seize(self, condition: Self) -> Self {
        Self(self.0 & condition.0)
    }

    /// Difference: the set with every unit of `consumed` removed from `self`.
    #[must_use]
    pub const fn clear(self, consumed: Self) -> Self {
        Self(self.0 & !consumed.0)
    }

    /// Return `true` iff no units are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Init for ResourceSet {
    const INIT: Self = Self::EMPTY;
}

impl fmt::Debug for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ResourceSet({:#010x})", self.0)
    }
}
