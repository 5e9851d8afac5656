//! Logical time primitives
//!
//! A [`Tag`] is a superdense timestamp: a logical instant in nanoseconds
//! plus a microstep that orders events sharing the same instant.

use std::cmp::Ordering;
use std::fmt;

/// Logical or physical instant in nanoseconds
pub type Instant = i64;

/// Signed distance between two instants in nanoseconds
pub type Interval = i64;

/// Zero-delay sub-step within one instant
pub type Microstep = u32;

/// Earliest representable instant
pub const NEVER: Instant = i64::MIN;

/// Latest representable instant
pub const FOREVER: Instant = i64::MAX;

pub const NSEC: Interval = 1;
pub const USEC: Interval = 1_000;
pub const MSEC: Interval = 1_000_000;
pub const SEC: Interval = 1_000_000_000;
pub const MINUTE: Interval = 60 * SEC;
pub const HOUR: Interval = 60 * MINUTE;
pub const DAY: Interval = 24 * HOUR;
pub const WEEK: Interval = 7 * DAY;

/// Superdense logical timestamp
///
/// Ordering is lexicographic: time first, then microstep.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tag {
    pub time: Instant,
    pub microstep: Microstep,
}

impl Tag {
    /// Lower bound of all tags
    pub const NEVER: Tag = Tag {
        time: NEVER,
        microstep: 0,
    };

    /// Upper bound of all tags, used as "nothing pending" and "unbounded stop"
    pub const FOREVER: Tag = Tag {
        time: FOREVER,
        microstep: u32::MAX,
    };

    pub const ZERO: Tag = Tag {
        time: 0,
        microstep: 0,
    };

    #[inline]
    pub const fn new(time: Instant, microstep: Microstep) -> Self {
        Tag { time, microstep }
    }

    /// Tag at the start of an instant
    #[inline]
    pub const fn at(time: Instant) -> Self {
        Tag { time, microstep: 0 }
    }

    #[inline]
    pub fn is_never(self) -> bool {
        self.time == NEVER
    }

    #[inline]
    pub fn is_forever(self) -> bool {
        self.time == FOREVER
    }

    /// Same instant, one microstep later (saturating at FOREVER)
    #[inline]
    pub fn next_microstep(self) -> Tag {
        if self.is_forever() {
            return Tag::FOREVER;
        }
        match self.microstep.checked_add(1) {
            Some(microstep) => Tag::new(self.time, microstep),
            None => Tag::at(self.time.saturating_add(1)),
        }
    }

    /// Compare two tags
    #[inline]
    pub fn compare(a: Tag, b: Tag) -> Ordering {
        a.cmp(&b)
    }

    /// Delay this tag by an interval.
    ///
    /// A zero interval advances one microstep; a positive interval moves
    /// time forward and resets the microstep. NEVER and negative intervals
    /// leave the tag as is. Overflow saturates to FOREVER.
    pub fn delay(self, interval: Interval) -> Tag {
        if self.is_never() || interval < 0 {
            return self;
        }
        if self.is_forever() {
            return Tag::FOREVER;
        }
        if interval == 0 {
            return match self.microstep.checked_add(1) {
                Some(microstep) => Tag::new(self.time, microstep),
                None => Tag::FOREVER,
            };
        }
        match self.time.checked_add(interval) {
            Some(time) if time != FOREVER => Tag::at(time),
            _ => Tag::FOREVER,
        }
    }

    /// Like [`Tag::delay`], but a nonzero interval lands on the last
    /// microstep of the instant one nanosecond earlier.
    ///
    /// This is the latest tag strictly before `delay(interval)` whenever
    /// the interval is positive, which is what a port-absent promise needs.
    pub fn delay_strict(self, interval: Interval) -> Tag {
        let delayed = self.delay(interval);
        if interval != 0 && !delayed.is_never() && !delayed.is_forever() && delayed != self {
            return Tag::new(delayed.time - 1, u32::MAX);
        }
        delayed
    }

    /// Add two tags component-wise; NEVER and FOREVER are absorbing.
    pub fn add(self, other: Tag) -> Tag {
        if self.is_never() || other.is_never() {
            return Tag::NEVER;
        }
        if self.is_forever() || other.is_forever() {
            return Tag::FOREVER;
        }
        let time = match self.time.checked_add(other.time) {
            Some(time) if time != FOREVER => time,
            _ => return Tag::FOREVER,
        };
        match self.microstep.checked_add(other.microstep) {
            Some(microstep) => Tag::new(time, microstep),
            None => Tag::FOREVER,
        }
    }

    /// Time elapsed since `start`, saturating at the bounds
    #[inline]
    pub fn elapsed_since(self, start: Instant) -> Interval {
        self.time.saturating_sub(start)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_never(), self.is_forever()) {
            (true, _) => write!(f, "Tag(NEVER)"),
            (_, true) => write!(f, "Tag(FOREVER)"),
            _ => write!(f, "Tag({}, {})", self.time, self.microstep),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_never(), self.is_forever()) {
            (true, _) => write!(f, "(NEVER)"),
            (_, true) => write!(f, "(FOREVER)"),
            _ => write!(f, "({}, {})", self.time, self.microstep),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ordering_time_then_microstep() {
        assert!(Tag::new(1, 5) < Tag::new(2, 0));
        assert!(Tag::new(2, 0) < Tag::new(2, 1));
        assert!(Tag::NEVER < Tag::ZERO);
        assert!(Tag::new(FOREVER - 1, u32::MAX) < Tag::FOREVER);
        assert_eq!(Tag::compare(Tag::at(3), Tag::at(3)), Ordering::Equal);
    }

    #[test]
    fn test_delay_zero_increments_microstep() {
        assert_eq!(Tag::new(10, 2).delay(0), Tag::new(10, 3));
    }

    #[test]
    fn test_delay_positive_resets_microstep() {
        assert_eq!(Tag::new(10, 2).delay(5), Tag::new(15, 0));
    }

    #[test]
    fn test_delay_ignores_never_and_negative() {
        assert_eq!(Tag::NEVER.delay(100), Tag::NEVER);
        assert_eq!(Tag::new(10, 1).delay(-1), Tag::new(10, 1));
    }

    #[test]
    fn test_delay_saturates() {
        assert_eq!(Tag::new(FOREVER - 1, 0).delay(10), Tag::FOREVER);
        assert_eq!(Tag::new(3, u32::MAX).delay(0), Tag::FOREVER);
        assert_eq!(Tag::FOREVER.delay(0), Tag::FOREVER);
    }

    #[test]
    fn test_delay_strict() {
        assert_eq!(Tag::new(10, 0).delay_strict(5), Tag::new(14, u32::MAX));
        assert_eq!(Tag::new(10, 3).delay_strict(0), Tag::new(10, 4));
        assert_eq!(Tag::NEVER.delay_strict(5), Tag::NEVER);
    }

    #[test]
    fn test_add() {
        assert_eq!(Tag::new(1, 2).add(Tag::new(3, 4)), Tag::new(4, 6));
        assert_eq!(Tag::NEVER.add(Tag::FOREVER), Tag::NEVER);
        assert_eq!(Tag::at(1).add(Tag::FOREVER), Tag::FOREVER);
        assert_eq!(Tag::at(FOREVER - 1).add(Tag::at(5)), Tag::FOREVER);
    }

    #[test]
    fn test_units() {
        assert_eq!(SEC, 1000 * MSEC);
        assert_eq!(WEEK, 7 * 24 * 60 * 60 * SEC);
    }

    proptest! {
        #[test]
        fn delay_never_goes_backwards(time in -1_000_000i64..1_000_000, micro in 0u32..1000, d in 0i64..1_000_000) {
            let tag = Tag::new(time, micro);
            prop_assert!(tag.delay(d) > tag);
        }

        #[test]
        fn strict_delay_precedes_delay(time in -1_000_000i64..1_000_000, micro in 0u32..1000, d in 1i64..1_000_000) {
            let tag = Tag::new(time, micro);
            prop_assert!(tag.delay_strict(d) < tag.delay(d));
            prop_assert!(tag.delay_strict(d) >= tag);
        }

        #[test]
        fn ordering_matches_tuple(a in any::<(i64, u32)>(), b in any::<(i64, u32)>()) {
            let ta = Tag::new(a.0, a.1);
            let tb = Tag::new(b.0, b.1);
            prop_assert_eq!(ta.cmp(&tb), a.cmp(&b));
        }
    }
}
