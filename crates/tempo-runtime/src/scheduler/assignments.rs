//! Per-level reaction queues
//!
//! Each level has one queue per worker that may run it. Reactions are
//! assigned to a queue by hashing their id over the number of workers
//! currently used at that level; idle workers steal from the others.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use tempo_core::ReactionId;

struct LevelQueues {
    queues: Vec<Mutex<Vec<ReactionId>>>,
    num_workers: AtomicUsize,
    pending: AtomicUsize,
}

/// Reaction queues for every level
pub struct Assignments {
    levels: Vec<LevelQueues>,
}

impl Assignments {
    /// Queues sized by the number of reactions at each level, capped at
    /// `max_workers`
    pub fn new(reactions_per_level: &[usize], max_workers: usize) -> Self {
        let levels = reactions_per_level
            .iter()
            .map(|&count| {
                let max = count.min(max_workers).max(1);
                LevelQueues {
                    queues: (0..max).map(|_| Mutex::new(Vec::new())).collect(),
                    num_workers: AtomicUsize::new(max),
                    pending: AtomicUsize::new(0),
                }
            })
            .collect::<Vec<_>>();
        Assignments { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Most workers that can be busy at `level`
    pub fn max_workers(&self, level: usize) -> usize {
        self.levels[level].queues.len()
    }

    /// Workers currently assigned to `level`
    pub fn num_workers(&self, level: usize) -> usize {
        self.levels[level].num_workers.load(Ordering::Acquire)
    }

    pub fn set_num_workers(&self, level: usize, workers: usize) {
        let clamped = workers.clamp(1, self.max_workers(level));
        self.levels[level].num_workers.store(clamped, Ordering::Release);
    }

    /// Reactions queued at `level`
    pub fn pending(&self, level: usize) -> usize {
        self.levels[level].pending.load(Ordering::Acquire)
    }

    pub fn put(&self, reaction: ReactionId, level: usize) {
        let lq = &self.levels[level];
        let workers = lq.num_workers.load(Ordering::Acquire).max(1);
        lq.queues[reaction.index() % workers].lock().push(reaction);
        lq.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Take a reaction at `level`, own queue first, then stealing.
    pub fn get(&self, worker: usize, level: usize) -> Option<ReactionId> {
        let lq = &self.levels[level];
        let n = lq.queues.len();
        let own = worker % n;
        for offset in 0..n {
            if let Some(reaction) = lq.queues[(own + offset) % n].lock().pop() {
                lq.pending.fetch_sub(1, Ordering::AcqRel);
                return Some(reaction);
            }
        }
        None
    }
}
