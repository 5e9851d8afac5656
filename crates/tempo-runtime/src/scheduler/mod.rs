//! Adaptive level scheduler
//!
//! Reactions run level by level. Within a level they are independent and
//! spread over the workers that level is currently assigned; when the last
//! busy worker runs dry it advances the level, and after the final level it
//! asks the environment to advance logical time. Worker counts per level
//! are tuned from measurements (see [`data_collection`]).
//!
//! Lock order: worker states, then the environment mutex. Nothing that
//! holds the environment mutex may take the worker-state lock.

pub mod assignments;
pub mod data_collection;
pub mod edf;
pub mod states;

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use tempo_core::ReactionId;
use tempo_time::PhysicalClock;

pub use assignments::Assignments;
pub use data_collection::DataCollector;
pub use edf::{EdfPriorities, NoopPriority, ThreadPriority};
pub use states::{cond_of, StateInner, WorkerStates};

use crate::{AdaptiveConfig, Program};

/// Execution status of a reaction within the current tag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReactionStatus {
    Inactive = 0,
    Queued = 1,
    Running = 2,
}

impl ReactionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ReactionStatus::Queued,
            2 => ReactionStatus::Running,
            _ => ReactionStatus::Inactive,
        }
    }
}

/// Callbacks from the scheduler into the tag-advancement logic
pub trait LevelDriver {
    /// Every level of the current tag is done. Advances logical time and
    /// returns true when execution must stop.
    fn advance_tag(&self) -> bool;

    /// Block until reactions at `level` may run. Returns false to abort.
    fn stall_level(&self, level: usize) -> bool;

    /// Non-blocking form of [`LevelDriver::stall_level`]
    fn level_allowed(&self, level: usize) -> bool;

    /// All reactions at `level` for the current tag have completed
    fn level_completed(&self, level: usize);
}

pub struct Scheduler {
    levels: Vec<usize>,
    statuses: Vec<AtomicU8>,
    assignments: Assignments,
    states: WorkerStates,
    current_level: AtomicUsize,
    collector: Mutex<DataCollector>,
    clock: Arc<PhysicalClock>,
}

impl Scheduler {
    pub fn new(program: &Program, workers: usize, adaptive: &AdaptiveConfig, clock: Arc<PhysicalClock>) -> Self {
        let workers = workers.max(1);
        let assignments = Assignments::new(&program.reactions_per_level(), workers);
        let collector = DataCollector::new(adaptive, &assignments, workers);
        Scheduler {
            levels: program.reactions.iter().map(|r| r.level).collect(),
            statuses: program
                .reactions
                .iter()
                .map(|_| AtomicU8::new(ReactionStatus::Inactive as u8))
                .collect(),
            assignments,
            states: WorkerStates::new(workers),
            current_level: AtomicUsize::new(0),
            collector: Mutex::new(collector),
            clock,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.states.num_workers()
    }

    pub fn current_level(&self) -> usize {
        self.current_level.load(Ordering::Acquire)
    }

    pub fn status(&self, reaction: ReactionId) -> ReactionStatus {
        ReactionStatus::from_u8(self.statuses[reaction.index()].load(Ordering::Acquire))
    }

    fn transition(&self, reaction: ReactionId, from: ReactionStatus, to: ReactionStatus) -> bool {
        self.statuses[reaction.index()]
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Queue a reaction for the current tag. A reaction already queued or
    /// running is not queued twice; returns whether it was queued.
    pub fn trigger(&self, reaction: ReactionId) -> bool {
        if !self.transition(reaction, ReactionStatus::Inactive, ReactionStatus::Queued) {
            return false;
        }
        let level = self.levels[reaction.index()];
        trace!("Queueing {} at level {}", reaction, level);
        self.assignments.put(reaction, level);
        true
    }

    /// Take an inactive reaction for immediate inline execution
    pub fn try_claim(&self, reaction: ReactionId) -> bool {
        self.transition(reaction, ReactionStatus::Inactive, ReactionStatus::Running)
    }

    /// Mark a reaction finished
    pub fn done(&self, reaction: ReactionId) {
        let previous = self.statuses[reaction.index()].swap(ReactionStatus::Inactive as u8, Ordering::AcqRel);
        debug_assert_ne!(previous, ReactionStatus::Inactive as u8, "{} finished twice", reaction);
    }

    /// Claim `reaction` for inline execution by the worker that just enabled
    /// it. Only allowed when that worker is the last busy one of the current
    /// level, nothing is queued below the reaction's level, and the driver
    /// admits that level.
    pub fn try_inline(&self, reaction: ReactionId, driver: &dyn LevelDriver) -> bool {
        let level = self.levels[reaction.index()];
        let st = self.states.lock();
        if st.should_stop || st.num_loose != 1 {
            return false;
        }
        let current = self.current_level();
        if level <= current || (current..level).any(|l| self.assignments.pending(l) > 0) {
            return false;
        }
        driver.level_allowed(level) && self.try_claim(reaction)
    }

    fn try_get(&self, worker: usize) -> Option<ReactionId> {
        let reaction = self.assignments.get(worker, self.current_level())?;
        self.statuses[reaction.index()].store(ReactionStatus::Running as u8, Ordering::Release);
        Some(reaction)
    }

    /// Next reaction for `worker`, or `None` once execution stops.
    ///
    /// Blocks while other workers finish the current level. The worker that
    /// empties the level advances it, possibly advancing logical time.
    pub fn get_ready_reaction(&self, worker: usize, driver: &dyn LevelDriver) -> Option<ReactionId> {
        loop {
            if let Some(reaction) = self.try_get(worker) {
                return Some(reaction);
            }
            let mut st = self.states.lock();
            if st.should_stop {
                return None;
            }
            st.num_loose = st.num_loose.saturating_sub(1);
            if st.num_loose == 0 {
                self.advance_level_locked(&mut st, driver);
                if st.should_stop {
                    return None;
                }
                if worker < st.num_awakened {
                    continue;
                }
            }
            self.states.wait_locked(worker, &mut st);
            if st.should_stop {
                return None;
            }
        }
    }

    fn advance_level_locked(&self, st: &mut StateInner, driver: &dyn LevelDriver) {
        loop {
            let level = self.current_level();
            self.collector.lock().end_level(level, self.clock.now());
            driver.level_completed(level);

            let next = if level + 1 >= self.assignments.num_levels() {
                self.collector.lock().end_tag(&self.assignments);
                self.current_level.store(0, Ordering::Release);
                if driver.advance_tag() {
                    self.states.stop_locked(st);
                    return;
                }
                0
            } else {
                level + 1
            };
            if !driver.stall_level(next) {
                self.states.stop_locked(st);
                return;
            }
            self.current_level.store(next, Ordering::Release);

            let pending = self.assignments.pending(next);
            if pending > 0 {
                let workers = pending.min(self.assignments.num_workers(next));
                self.collector.lock().start_level(next, self.clock.now());
                trace!("Level {}: {} reactions on {} workers", next, pending, workers);
                self.states.awaken_locked(st, workers);
                return;
            }
        }
    }

    /// Make every worker return from [`Scheduler::get_ready_reaction`]
    pub fn stop(&self) {
        let mut st = self.states.lock();
        self.states.stop_locked(&mut st);
    }

    pub fn is_stopped(&self) -> bool {
        self.states.lock().should_stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProgramBuilder;
    use std::sync::atomic::AtomicU32;
    use tempo_time::ManualTimeSource;

    fn program(per_level: &[usize]) -> Program {
        let mut b = ProgramBuilder::new("levels");
        for (level, &count) in per_level.iter().enumerate() {
            for i in 0..count {
                b.reaction(&format!("r{}_{}", level, i), level, |_| {}).add();
            }
        }
        b.build().unwrap()
    }

    struct Driver<'a> {
        scheduler: &'a Scheduler,
        tags_left: AtomicU32,
        reactions: Vec<ReactionId>,
        stalls: Mutex<Vec<usize>>,
        allowed_below: usize,
    }

    impl LevelDriver for Driver<'_> {
        fn advance_tag(&self) -> bool {
            if self.tags_left.fetch_sub(1, Ordering::AcqRel) <= 1 {
                return true;
            }
            for &r in &self.reactions {
                self.scheduler.trigger(r);
            }
            false
        }

        fn stall_level(&self, level: usize) -> bool {
            self.stalls.lock().push(level);
            true
        }

        fn level_allowed(&self, level: usize) -> bool {
            level < self.allowed_below
        }

        fn level_completed(&self, _level: usize) {}
    }

    fn scheduler(program: &Program, workers: usize) -> Scheduler {
        let clock = Arc::new(PhysicalClock::with_source(ManualTimeSource::new(0)));
        let config = AdaptiveConfig {
            seed: Some(1),
            ..Default::default()
        };
        Scheduler::new(program, workers, &config, clock)
    }

    #[test]
    fn test_single_worker_runs_levels_in_order() {
        let program = program(&[2, 1, 2]);
        let scheduler = scheduler(&program, 1);
        let all: Vec<ReactionId> = (0..5).map(ReactionId::new).collect();
        let driver = Driver {
            scheduler: &scheduler,
            tags_left: AtomicU32::new(2),
            reactions: all.clone(),
            stalls: Mutex::new(Vec::new()),
            allowed_below: usize::MAX,
        };
        for &r in &all {
            assert!(scheduler.trigger(r));
        }
        assert!(!scheduler.trigger(all[0]));

        let mut levels = Vec::new();
        while let Some(r) = scheduler.get_ready_reaction(0, &driver) {
            assert_eq!(scheduler.status(r), ReactionStatus::Running);
            levels.push(program.reaction(r).level);
            scheduler.done(r);
        }
        assert_eq!(levels, vec![0, 0, 1, 2, 2, 0, 0, 1, 2, 2]);
        assert!(scheduler.is_stopped());
        assert_eq!(*driver.stalls.lock(), vec![1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_workers_respect_level_order() {
        let program = program(&[8, 8, 8]);
        let scheduler = scheduler(&program, 4);
        let all: Vec<ReactionId> = (0..24).map(ReactionId::new).collect();
        let driver = Driver {
            scheduler: &scheduler,
            tags_left: AtomicU32::new(20),
            reactions: all.clone(),
            stalls: Mutex::new(Vec::new()),
            allowed_below: usize::MAX,
        };
        for &r in &all {
            scheduler.trigger(r);
        }
        let log = Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for worker in 0..4 {
                let (scheduler, driver, log, program) = (&scheduler, &driver, &log, &program);
                s.spawn(move || {
                    while let Some(r) = scheduler.get_ready_reaction(worker, driver) {
                        log.lock().push((scheduler.current_level(), program.reaction(r).level));
                        scheduler.done(r);
                    }
                });
            }
        });
        let log = log.into_inner();
        assert_eq!(log.len(), 24 * 20);
        for (current, level) in &log {
            assert_eq!(current, level);
        }
        for chunk in log.chunks(24) {
            let levels: Vec<usize> = chunk.iter().map(|(_, l)| *l).collect();
            let mut sorted = levels.clone();
            sorted.sort_unstable();
            assert_eq!(levels, sorted);
        }
    }

    #[test]
    fn test_claim_blocks_double_queueing() {
        let program = program(&[1, 1]);
        let scheduler = scheduler(&program, 1);
        let r = ReactionId::new(1);
        assert!(scheduler.try_claim(r));
        assert!(!scheduler.trigger(r));
        scheduler.done(r);
        assert!(scheduler.trigger(r));
        assert_eq!(scheduler.status(r), ReactionStatus::Queued);
    }

    fn idle_driver(scheduler: &Scheduler, allowed_below: usize) -> Driver<'_> {
        Driver {
            scheduler,
            tags_left: AtomicU32::new(1),
            reactions: Vec::new(),
            stalls: Mutex::new(Vec::new()),
            allowed_below,
        }
    }

    #[test]
    fn test_inline_waits_for_queued_lower_levels() {
        let program = program(&[1, 1, 1]);
        let scheduler = scheduler(&program, 1);
        let driver = idle_driver(&scheduler, usize::MAX);
        let (r0, r1, r2) = (ReactionId::new(0), ReactionId::new(1), ReactionId::new(2));
        scheduler.trigger(r0);
        scheduler.trigger(r1);
        assert_eq!(scheduler.get_ready_reaction(0, &driver), Some(r0));
        // r1 is still queued at level 1, so r2 must wait its turn.
        assert!(!scheduler.try_inline(r2, &driver));
        assert_eq!(scheduler.status(r2), ReactionStatus::Inactive);
        assert!(!scheduler.try_inline(r0, &driver));
    }

    #[test]
    fn test_inline_respects_the_allowed_level() {
        let program = program(&[1, 1, 1]);
        let scheduler = scheduler(&program, 1);
        let (r0, r2) = (ReactionId::new(0), ReactionId::new(2));
        scheduler.trigger(r0);
        assert_eq!(scheduler.get_ready_reaction(0, &idle_driver(&scheduler, usize::MAX)), Some(r0));
        assert!(!scheduler.try_inline(r2, &idle_driver(&scheduler, 2)));
        assert!(scheduler.try_inline(r2, &idle_driver(&scheduler, 3)));
        assert_eq!(scheduler.status(r2), ReactionStatus::Running);
    }

    #[test]
    fn test_inline_refused_while_other_workers_are_busy() {
        let program = program(&[2, 1]);
        let scheduler = scheduler(&program, 2);
        let driver = idle_driver(&scheduler, usize::MAX);
        scheduler.trigger(ReactionId::new(0));
        scheduler.trigger(ReactionId::new(1));
        assert!(scheduler.get_ready_reaction(0, &driver).is_some());
        assert!(scheduler.get_ready_reaction(1, &driver).is_some());
        assert!(!scheduler.try_inline(ReactionId::new(2), &driver));
    }

    #[test]
    fn test_stop_releases_waiters() {
        let program = program(&[1]);
        let scheduler = scheduler(&program, 2);
        scheduler.stop();
        struct Never;
        impl LevelDriver for Never {
            fn advance_tag(&self) -> bool {
                unreachable!()
            }
            fn stall_level(&self, _level: usize) -> bool {
                true
            }
            fn level_allowed(&self, _level: usize) -> bool {
                true
            }
            fn level_completed(&self, _level: usize) {}
        }
        assert_eq!(scheduler.get_ready_reaction(1, &Never), None);
    }
}
