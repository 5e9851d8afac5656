//! Interruptible sleep on a condition variable
//!
//! Every blocking wait in the runtime is a timed wait on a condition
//! variable guarded by the environment mutex, so a new event, a barrier
//! change or a stop request can cut it short.

use std::time::Duration;

use parking_lot::{Condvar, MutexGuard};
use tempo_core::{Instant, Interval, FOREVER, USEC};

use crate::PhysicalClock;

/// Shortest wait worth handing to the OS
pub const MIN_SLEEP_DURATION: Interval = 10 * USEC;

/// How a sleep ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The deadline passed
    TimedOut,
    /// Notified before the deadline
    Interrupted,
}

/// Block on `cond` until physical time reaches `deadline` or someone
/// notifies the condition variable.
///
/// The guard is released while waiting and reacquired before returning.
/// A deadline of FOREVER waits for a notification only.
pub fn sleep_with_interrupt<T>(
    clock: &PhysicalClock,
    cond: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    deadline: Instant,
) -> SleepOutcome {
    if deadline == FOREVER {
        cond.wait(guard);
        return SleepOutcome::Interrupted;
    }
    let now = clock.now();
    if deadline <= now {
        return SleepOutcome::TimedOut;
    }
    let timeout = Duration::from_nanos((deadline - now) as u64);
    if cond.wait_for(guard, timeout).timed_out() {
        SleepOutcome::TimedOut
    } else {
        SleepOutcome::Interrupted
    }
}
