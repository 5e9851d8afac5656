//! Earliest-deadline-first priority boosting
//!
//! Workers running a reaction with a deadline hold a priority from the
//! configured range. Holders are kept sorted by absolute deadline; the
//! earliest deadline gets the highest value and the rest are spread
//! evenly below it, re-spaced whenever a holder joins or leaves.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use tempo_core::{Instant, TempoError, TempoResult};

use crate::PriorityRange;

/// Platform hook that applies a priority to a worker thread
pub trait ThreadPriority: Send + Sync {
    fn apply(&self, worker: usize, priority: i32) -> TempoResult<()>;
}

/// Priorities are computed but never applied
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPriority;

impl ThreadPriority for NoopPriority {
    fn apply(&self, _worker: usize, _priority: i32) -> TempoResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Holder {
    deadline: Instant,
    worker: usize,
    priority: i32,
}

pub struct EdfPriorities {
    range: PriorityRange,
    holders: Mutex<Vec<Holder>>,
    platform: Arc<dyn ThreadPriority>,
}

impl EdfPriorities {
    pub fn new(range: PriorityRange, platform: Arc<dyn ThreadPriority>) -> Self {
        EdfPriorities {
            range,
            holders: Mutex::new(Vec::new()),
            platform,
        }
    }

    /// `worker` starts a reaction due at `deadline`; returns its priority
    pub fn begin(&self, worker: usize, deadline: Instant) -> TempoResult<i32> {
        let mut holders = self.holders.lock();
        let values = self.range.values();
        if holders.len() >= values {
            return Err(TempoError::PriorityExhausted {
                holders: holders.len() + 1,
                values,
            });
        }
        let position = holders.partition_point(|h| (h.deadline, h.worker) < (deadline, worker));
        holders.insert(
            position,
            Holder {
                deadline,
                worker,
                priority: self.range.min,
            },
        );
        self.respace(&mut holders)?;
        Ok(holders[position].priority)
    }

    /// `worker` finished its deadline reaction and drops to the base priority
    pub fn end(&self, worker: usize) -> TempoResult<()> {
        let mut holders = self.holders.lock();
        if let Some(position) = holders.iter().position(|h| h.worker == worker) {
            holders.remove(position);
            self.platform.apply(worker, self.range.min)?;
            self.respace(&mut holders)?;
        }
        Ok(())
    }

    fn respace(&self, holders: &mut [Holder]) -> TempoResult<()> {
        if holders.is_empty() {
            return Ok(());
        }
        let step = (self.range.values() / holders.len()).max(1) as i32;
        for (rank, holder) in holders.iter_mut().enumerate() {
            let priority = self.range.max - rank as i32 * step;
            if holder.priority != priority {
                trace!("Worker {} priority {} -> {}", holder.worker, holder.priority, priority);
                self.platform.apply(holder.worker, priority)?;
                holder.priority = priority;
            }
        }
        Ok(())
    }

    /// Current priority per holder, earliest deadline first
    pub fn snapshot(&self) -> Vec<(usize, i32)> {
        self.holders.lock().iter().map(|h| (h.worker, h.priority)).collect()
    }
}
