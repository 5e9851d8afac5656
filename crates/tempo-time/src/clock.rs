//! Physical clock for the reactor runtime
//!
//! The underlying time source need not be monotonic, and the clock-sync
//! offset may be adjusted at any moment. [`PhysicalClock`] hides both: every
//! reading is strictly greater than the previous one.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tempo_core::{Instant, Interval, TempoError, TempoResult, NEVER};

/// Raw platform clock
pub trait TimeSource: Send + Sync {
    /// Current reading in nanoseconds; need not be monotonic
    fn now(&self) -> TempoResult<Instant>;
}

/// Wall clock in nanoseconds since the Unix epoch
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> TempoResult<Instant> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TempoError::ClockFailure(e.to_string()))?;
        i64::try_from(elapsed.as_nanos()).map_err(|e| TempoError::ClockFailure(e.to_string()))
    }
}

/// Hand-driven source for tests and simulation
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    value: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start: Instant) -> Self {
        ManualTimeSource {
            value: AtomicI64::new(start),
        }
    }

    pub fn set(&self, value: Instant) {
        self.value.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Interval) {
        self.value.fetch_add(by, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> TempoResult<Instant> {
        Ok(self.value.load(Ordering::SeqCst))
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn now(&self) -> TempoResult<Instant> {
        (**self).now()
    }
}

/// Monotonic physical clock with a clock-synchronization offset
/// INVARIANT: successive readings are strictly increasing
pub struct PhysicalClock {
    source: Box<dyn TimeSource>,
    /// Offset added to every raw reading (clock synchronization)
    offset: AtomicI64,
    /// Last value handed out
    last: AtomicI64,
}

impl PhysicalClock {
    /// Clock backed by the system wall clock
    pub fn new() -> Self {
        Self::with_source(SystemTimeSource)
    }

    pub fn with_source(source: impl TimeSource + 'static) -> Self {
        PhysicalClock {
            source: Box::new(source),
            offset: AtomicI64::new(0),
            last: AtomicI64::new(NEVER),
        }
    }

    /// Read the clock, surfacing a failing time source as an error
    pub fn try_now(&self) -> TempoResult<Instant> {
        let raw = self
            .source
            .now()?
            .saturating_add(self.offset.load(Ordering::Acquire));
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = if raw > last { raw } else { last.saturating_add(1) };
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Read the clock.
    ///
    /// Without a working clock no logical time can be established, so a
    /// failing source aborts the process.
    pub fn now(&self) -> Instant {
        match self.try_now() {
            Ok(now) => now,
            Err(e) => {
                tracing::error!("Failed to read the physical clock: {}", e);
                std::process::abort();
            }
        }
    }

    /// Current clock-synchronization offset
    pub fn offset(&self) -> Interval {
        self.offset.load(Ordering::Acquire)
    }

    /// Replace the clock-synchronization offset
    pub fn set_offset(&self, offset: Interval) {
        self.offset.store(offset, Ordering::Release);
    }

    /// Shift the clock-synchronization offset
    pub fn adjust_offset(&self, delta: Interval) {
        self.offset.fetch_add(delta, Ordering::AcqRel);
    }
}

impl Default for PhysicalClock {
    fn default() -> Self {
        Self::new()
    }
}
