//! Environment: logical time, the event queue and the tag-advancement loop
//!
//! One mutex guards the environment's logical state ([`EnvState`]). Four
//! condition variables hang off it:
//! - `event_q_changed`: the queue or the stop tag changed
//! - `barrier_cleared`: the tag barrier was lowered to zero
//! - `port_status_changed`: a network input port's status changed
//! - `tag_advanced`: logical time moved
//!
//! Every blocking wait is a wait on one of them, so failure and stop
//! requests can always interrupt it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use tempo_core::{
    EnvironmentId, Handle, Instant, Interval, ReactionId, Tag, TempoError, TempoResult, TriggerId,
    FOREVER,
};
use tempo_time::{sleep_with_interrupt, PhysicalClock, SleepOutcome, MIN_SLEEP_DURATION};

use crate::scheduler::{EdfPriorities, LevelDriver, Scheduler, ThreadPriority};
use crate::{
    Coordination, CoordinationMode, EventQueue, Global, Program, RuntimeConfig, ScheduleWindow,
    TagBarrier, TriggerKind,
};

/// Lifecycle of an environment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Running,
    /// The stop tag has been reached; shutdown reactions are running
    Stopping,
    Stopped,
}

/// Presence and value of a trigger at the current tag
#[derive(Clone, Debug, Default)]
pub struct TriggerSlot {
    pub present: bool,
    pub value: Option<Bytes>,
    pub intended_tag: Tag,
}

/// Logical state guarded by the environment mutex
pub struct EnvState {
    pub current_tag: Tag,
    pub stop_tag: Tag,
    pub start_time: Instant,
    pub queue: EventQueue,
    pub barrier: TagBarrier,
    pub execution_started: bool,
    pub phase: Phase,
    pub failure: Option<TempoError>,
    active_workers: usize,
}

impl EnvState {
    pub fn window(&self) -> ScheduleWindow {
        ScheduleWindow {
            current: self.current_tag,
            stop: self.stop_tag,
            started: self.execution_started,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct Environment {
    id: EnvironmentId,
    program: Arc<Program>,
    config: Arc<RuntimeConfig>,
    clock: Arc<PhysicalClock>,
    state: Mutex<EnvState>,
    event_q_changed: Condvar,
    barrier_cleared: Condvar,
    port_status_changed: Condvar,
    tag_advanced: Condvar,
    /// Copy of the current tag readable without the environment mutex
    published_tag: RwLock<Tag>,
    failed: AtomicBool,
    scheduler: Scheduler,
    slots: Vec<Mutex<TriggerSlot>>,
    stp_violated: Vec<AtomicBool>,
    reactor_locks: Vec<Mutex<()>>,
    coordination: Arc<dyn Coordination>,
    global: Arc<Global>,
    edf: Option<EdfPriorities>,
}

impl Environment {
    pub fn new(
        id: EnvironmentId,
        program: Arc<Program>,
        config: Arc<RuntimeConfig>,
        clock: Arc<PhysicalClock>,
        coordination: Arc<dyn Coordination>,
        global: Arc<Global>,
        priorities: Arc<dyn ThreadPriority>,
    ) -> TempoResult<Arc<Self>> {
        config.validate()?;
        let scheduler = Scheduler::new(&program, config.workers(), &config.adaptive, Arc::clone(&clock));
        let state = EnvState {
            current_tag: Tag::NEVER,
            stop_tag: Tag::FOREVER,
            start_time: 0,
            queue: EventQueue::new(&program),
            barrier: TagBarrier::new(),
            execution_started: false,
            phase: Phase::Initializing,
            failure: None,
            active_workers: 0,
        };
        let env = Arc::new(Environment {
            id,
            slots: program.triggers.iter().map(|_| Mutex::new(TriggerSlot::default())).collect(),
            stp_violated: program.reactions.iter().map(|_| AtomicBool::new(false)).collect(),
            reactor_locks: (0..program.num_reactors).map(|_| Mutex::new(())).collect(),
            edf: config.realtime.map(|range| EdfPriorities::new(range, priorities)),
            program,
            config,
            clock,
            state: Mutex::new(state),
            event_q_changed: Condvar::new(),
            barrier_cleared: Condvar::new(),
            port_status_changed: Condvar::new(),
            tag_advanced: Condvar::new(),
            published_tag: RwLock::new(Tag::NEVER),
            failed: AtomicBool::new(false),
            scheduler,
            coordination,
            global: Arc::clone(&global),
        });
        global.register(&env);
        Ok(env)
    }

    pub fn id(&self) -> EnvironmentId {
        self.id
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn clock(&self) -> &PhysicalClock {
        &self.clock
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn coordination(&self) -> &Arc<dyn Coordination> {
        &self.coordination
    }

    pub fn global(&self) -> &Arc<Global> {
        &self.global
    }

    pub(crate) fn edf(&self) -> Option<&EdfPriorities> {
        self.edf.as_ref()
    }

    pub(crate) fn reactor_lock(&self, reactor: usize) -> &Mutex<()> {
        &self.reactor_locks[reactor]
    }

    pub fn mode(&self) -> CoordinationMode {
        self.coordination.mode()
    }

    pub fn lock(&self) -> MutexGuard<'_, EnvState> {
        self.state.lock()
    }

    /// Current tag without taking the environment mutex
    pub fn current_tag(&self) -> Tag {
        *self.published_tag.read()
    }

    pub fn start_time(&self) -> Instant {
        self.lock().start_time
    }

    pub fn stop_tag(&self) -> Tag {
        self.lock().stop_tag
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn failure(&self) -> Option<TempoError> {
        self.lock().failure.clone()
    }

    fn publish(&self, tag: Tag) {
        *self.published_tag.write() = tag;
    }

    // Notifications and waits

    pub fn notify_event_queue(&self) {
        self.event_q_changed.notify_all();
    }

    pub fn notify_port_status(&self) {
        self.port_status_changed.notify_all();
    }

    /// Wait for a queue change or until physical time reaches `deadline`
    pub fn wait_event_queue(&self, state: &mut MutexGuard<'_, EnvState>, deadline: Instant) -> SleepOutcome {
        sleep_with_interrupt(&self.clock, &self.event_q_changed, state, deadline)
    }

    /// Wait for a port status change or until physical time reaches `deadline`
    pub fn wait_port_status(&self, state: &mut MutexGuard<'_, EnvState>, deadline: Instant) -> SleepOutcome {
        sleep_with_interrupt(&self.clock, &self.port_status_changed, state, deadline)
    }

    /// Wait until logical time moves or the environment fails
    pub fn wait_tag_advanced(&self, state: &mut MutexGuard<'_, EnvState>) {
        self.tag_advanced.wait(state);
    }

    fn notify_all(&self) {
        self.event_q_changed.notify_all();
        self.barrier_cleared.notify_all();
        self.port_status_changed.notify_all();
        self.tag_advanced.notify_all();
    }

    // Scheduling

    /// Schedule an action relative to the current tag
    pub fn schedule(&self, trigger: TriggerId, extra_delay: Interval, payload: Option<Bytes>) -> TempoResult<Handle> {
        let mut state = self.lock();
        self.schedule_locked(&mut state, trigger, extra_delay, payload, Tag::NEVER)
    }

    /// Schedule a physical action from outside the runtime
    pub fn schedule_physical(
        &self,
        trigger: TriggerId,
        extra_delay: Interval,
        payload: Option<Bytes>,
    ) -> TempoResult<Handle> {
        if !self.program.trigger(trigger).is_physical() {
            warn!("{} is not a physical action; scheduling it from outside is racy", trigger);
        }
        self.schedule(trigger, extra_delay, payload)
    }

    pub fn schedule_locked(
        &self,
        state: &mut EnvState,
        trigger: TriggerId,
        extra_delay: Interval,
        payload: Option<Bytes>,
        intended_tag: Tag,
    ) -> TempoResult<Handle> {
        let physical_now = self
            .program
            .triggers
            .get(trigger.index())
            .filter(|t| t.is_physical())
            .map(|_| self.clock.now());
        let window = state.window();
        let handle = state
            .queue
            .schedule(&window, trigger, extra_delay, payload, physical_now, intended_tag)?;
        self.notify_event_queue();
        Ok(handle)
    }

    pub fn schedule_at_tag_locked(
        &self,
        state: &mut EnvState,
        trigger: TriggerId,
        tag: Tag,
        payload: Option<Bytes>,
        intended_tag: Tag,
    ) -> TempoResult<Handle> {
        let window = state.window();
        let handle = state
            .queue
            .schedule_at_tag(&window, trigger, tag, payload, intended_tag)?;
        self.notify_event_queue();
        Ok(handle)
    }

    /// Make the loop visit `tag` even if no event is queued there
    pub fn insert_placeholder_locked(&self, state: &mut EnvState, tag: Tag) {
        let window = state.window();
        state.queue.insert_placeholder(&window, tag);
        self.notify_event_queue();
    }

    // Barrier

    pub fn raise_barrier_locked(&self, state: &mut EnvState, future_tag: Tag) -> Tag {
        let horizon = state.barrier.raise(future_tag, state.current_tag, state.stop_tag);
        debug!(env = %self.id, "Barrier raised, horizon {}", horizon);
        horizon
    }

    pub fn lower_barrier_locked(&self, state: &mut EnvState) -> TempoResult<()> {
        if state.barrier.lower()? {
            debug!(env = %self.id, "Barrier cleared");
            self.barrier_cleared.notify_all();
            self.event_q_changed.notify_all();
        }
        Ok(())
    }

    /// Block while the barrier holds logical time below `proposed`.
    /// Returns whether any waiting happened.
    fn wait_on_barrier(&self, state: &mut MutexGuard<'_, EnvState>, proposed: Tag) -> bool {
        if !state.barrier.is_raised() {
            return false;
        }
        let proposed = proposed.min(state.stop_tag);
        if proposed.is_forever() {
            return false;
        }
        let mut waited = false;
        while state.barrier.blocks(proposed) && state.failure.is_none() {
            debug!(env = %self.id, "Advance to {} held by barrier at {}", proposed, state.barrier.horizon());
            waited = true;
            self.barrier_cleared.wait(state);
        }
        waited
    }

    // Stop and failure

    /// Lower the stop tag; a later tag than the current stop is ignored
    pub fn set_stop_tag_locked(&self, state: &mut EnvState, tag: Tag) {
        if tag < state.stop_tag {
            debug!(env = %self.id, "Stop tag set to {}", tag);
            state.stop_tag = tag;
            self.notify_event_queue();
        }
    }

    /// Stop the environment abnormally
    pub fn fail(&self, err: TempoError) {
        let mut state = self.lock();
        self.fail_locked(&mut state, err);
    }

    pub fn fail_locked(&self, state: &mut EnvState, err: TempoError) {
        if state.failure.is_none() {
            error!(env = %self.id, tag = %state.current_tag, "Fatal error: {}", err);
            state.failure = Some(err);
        }
        self.failed.store(true, Ordering::Release);
        self.notify_all();
    }

    // Trigger slots

    pub fn is_present(&self, trigger: TriggerId) -> bool {
        self.slots
            .get(trigger.index())
            .map(|slot| slot.lock().present)
            .unwrap_or(false)
    }

    pub fn value(&self, trigger: TriggerId) -> Option<Bytes> {
        let slot = self.slots.get(trigger.index())?.lock();
        if slot.present {
            slot.value.clone()
        } else {
            None
        }
    }

    pub fn intended_tag(&self, trigger: TriggerId) -> Tag {
        self.slots
            .get(trigger.index())
            .map(|slot| slot.lock().intended_tag)
            .unwrap_or(Tag::NEVER)
    }

    pub(crate) fn set_slot(&self, trigger: TriggerId, value: Option<Bytes>, intended_tag: Tag) {
        if let Some(slot) = self.slots.get(trigger.index()) {
            let mut slot = slot.lock();
            slot.present = true;
            slot.value = value;
            slot.intended_tag = intended_tag;
        }
    }

    pub(crate) fn is_stp_violated(&self, reaction: ReactionId) -> bool {
        self.stp_violated[reaction.index()].load(Ordering::Acquire)
    }

    pub(crate) fn set_stp_violated(&self, reaction: ReactionId, violated: bool) {
        self.stp_violated[reaction.index()].store(violated, Ordering::Release);
    }

    // Tag advancement

    /// Establish the start tag and pop the start tag's events.
    ///
    /// Startup reactions and timers are armed, then the call waits for
    /// physical time to reach the start time, letting other threads raise
    /// the barrier while it waits.
    pub fn initialize_start_tag(self: &Arc<Self>, start_time: Instant) -> TempoResult<()> {
        let mut state = self.lock();
        state.start_time = start_time;
        state.current_tag = Tag::at(start_time);
        self.publish(state.current_tag);
        if let Some(timeout) = self.config.timeout {
            let stop = Tag::at(start_time.saturating_add(timeout));
            self.set_stop_tag_locked(&mut state, stop);
        }
        info!(env = %self.id, "Start time {}, stop tag {}", start_time, state.stop_tag);

        for &reaction in &self.program.startup {
            self.scheduler.trigger(reaction);
        }
        let window = state.window();
        for (timer, spec) in self.program.timers() {
            if let TriggerKind::Timer { offset, .. } = spec.kind {
                state.queue.schedule(&window, timer, offset, None, None, Tag::NEVER)?;
            }
        }

        let sta = self.coordination.sta_offset();
        state.current_tag = Tag::at(start_time.saturating_sub(sta));
        while !self.wait_until(&mut state, start_time) {
            if let Some(err) = state.failure.clone() {
                return Err(err);
            }
        }
        state.current_tag = Tag::at(start_time);

        self.coordination.on_execution_start(self, &mut state)?;
        let start_tag = state.current_tag;
        self.wait_on_barrier(&mut state, start_tag);
        if let Some(err) = state.failure.clone() {
            return Err(err);
        }

        self.start_time_step(&mut state);
        if state.current_tag >= state.stop_tag {
            self.trigger_shutdown(&mut state);
        }
        self.pop_events(&mut state)?;
        state.execution_started = true;
        if state.phase == Phase::Initializing {
            state.phase = Phase::Running;
        }
        state.active_workers = self.scheduler.num_workers();
        self.tag_advanced.notify_all();
        Ok(())
    }

    /// Wait until physical time reaches `logical_time` (plus the STA offset).
    ///
    /// Returns false if the wait was interrupted by a queue change or a
    /// failure. In fast mode it returns true immediately, except that
    /// FOREVER still waits for a notification.
    pub fn wait_until(&self, state: &mut MutexGuard<'_, EnvState>, logical_time: Instant) -> bool {
        if state.failure.is_some() {
            return false;
        }
        if self.config.fast && logical_time != FOREVER {
            return true;
        }
        let deadline = if logical_time == FOREVER {
            FOREVER
        } else {
            logical_time.saturating_add(self.coordination.sta_offset())
        };
        if deadline != FOREVER && deadline.saturating_sub(self.clock.now()) < MIN_SLEEP_DURATION {
            return true;
        }
        match self.wait_event_queue(state, deadline) {
            SleepOutcome::TimedOut => true,
            SleepOutcome::Interrupted => false,
        }
    }

    fn peek(&self, state: &EnvState) -> TempoResult<Tag> {
        state.queue.peek_tag(&state.window())
    }

    /// Tag the loop would advance to next, capped at the stop tag
    pub fn peek_locked(&self, state: &EnvState) -> TempoResult<Tag> {
        self.peek(state)
    }

    /// Make `trigger` present at the current tag and queue its reactions.
    ///
    /// Used for network input that arrives while its port is still
    /// unresolved at the current tag. A value meant for an earlier tag is
    /// flagged as a safe-to-process violation on the reactions it enables.
    pub fn trigger_now_locked(&self, state: &mut EnvState, trigger: TriggerId, payload: Option<Bytes>, intended_tag: Tag) {
        let current = state.current_tag;
        self.set_slot(trigger, payload, intended_tag);
        let late = intended_tag < current && state.execution_started;
        if late {
            warn!(
                env = %self.id,
                "{}",
                TempoError::StpViolation {
                    intended: intended_tag,
                    current
                }
            );
        }
        for &reaction in &self.program.trigger(trigger).reactions {
            if late {
                self.set_stp_violated(reaction, true);
            }
            self.scheduler.trigger(reaction);
        }
    }

    /// Advance logical time to the next tag and pop its events.
    ///
    /// Returns early without advancing when the environment fails or the
    /// stop tag has been processed.
    pub(crate) fn next_locked(&self, state: &mut MutexGuard<'_, EnvState>) -> TempoResult<()> {
        if state.queue.is_empty() && !self.config.keepalive && self.coordination.may_starve() {
            let stop = state.current_tag.next_microstep();
            self.set_stop_tag_locked(state, stop);
        }
        let mut next_tag = self.peek(state)?;
        match self.mode() {
            CoordinationMode::Centralized => loop {
                let grant = self.coordination.next_event_tag(self, state, next_tag);
                if state.failure.is_some() {
                    return Ok(());
                }
                let peeked = self.peek(state)?;
                if grant >= peeked {
                    next_tag = peeked;
                    break;
                }
                debug!(env = %self.id, "Grant {} below next event {}, retrying", grant, peeked);
                next_tag = peeked;
            },
            CoordinationMode::None | CoordinationMode::Decentralized => {}
        }

        while !self.wait_until(state, next_tag.time) {
            if state.failure.is_some() {
                return Ok(());
            }
            next_tag = self.peek(state)?;
        }
        next_tag = self.peek(state)?;
        if self.wait_on_barrier(state, next_tag) {
            next_tag = self.peek(state)?;
        }
        if state.failure.is_some() {
            return Ok(());
        }
        if next_tag >= state.stop_tag && state.current_tag >= state.stop_tag {
            return Ok(());
        }

        self.advance_logical_time(state, next_tag)?;
        self.start_time_step(state);
        if state.current_tag >= state.stop_tag {
            self.trigger_shutdown(state);
        }
        self.pop_events(state)
    }

    fn advance_logical_time(&self, state: &mut EnvState, next_tag: Tag) -> TempoResult<()> {
        if next_tag <= state.current_tag {
            return Err(TempoError::TagRegression {
                current: state.current_tag,
                attempted: next_tag,
            });
        }
        state.current_tag = next_tag;
        self.publish(next_tag);
        debug!(env = %self.id, "Advanced to {}", next_tag);
        self.tag_advanced.notify_all();
        Ok(())
    }

    fn start_time_step(&self, state: &mut EnvState) {
        for slot in &self.slots {
            let mut slot = slot.lock();
            slot.present = false;
            slot.value = None;
        }
        self.coordination.on_tag_started(self, state);
    }

    fn trigger_shutdown(&self, state: &mut EnvState) {
        if state.phase != Phase::Stopping {
            info!(env = %self.id, "Stop tag {} reached", state.current_tag);
            state.phase = Phase::Stopping;
            for &reaction in &self.program.shutdown {
                self.scheduler.trigger(reaction);
            }
        }
    }

    fn pop_events(&self, state: &mut EnvState) -> TempoResult<()> {
        let current = state.current_tag;
        let events = state.queue.pop_same_tag(current)?;
        let decentralized = self.mode() == CoordinationMode::Decentralized;
        for event in events {
            let trigger = self.program.trigger(event.trigger);
            let late = decentralized && !event.intended_tag.is_never() && event.intended_tag < current;
            if late {
                warn!(
                    env = %self.id,
                    "{}",
                    TempoError::StpViolation {
                        intended: event.intended_tag,
                        current
                    }
                );
            }
            let intended = if event.intended_tag.is_never() {
                current
            } else {
                event.intended_tag
            };
            self.set_slot(event.trigger, event.payload, intended);
            for &reaction in &trigger.reactions {
                if late {
                    self.set_stp_violated(reaction, true);
                }
                self.scheduler.trigger(reaction);
            }
            if let TriggerKind::Timer { period, .. } = trigger.kind {
                if period > 0 {
                    let window = state.window();
                    state
                        .queue
                        .schedule(&window, event.trigger, period, None, None, Tag::NEVER)?;
                }
            }
        }
        Ok(())
    }

    /// Called by each worker on exit; the last one reports to coordination
    pub(crate) fn worker_exited(&self, worker: usize) {
        let last = {
            let mut state = self.lock();
            state.active_workers = state.active_workers.saturating_sub(1);
            debug!(env = %self.id, "Worker {} exited", worker);
            if state.active_workers == 0 {
                state.phase = Phase::Stopped;
                self.tag_advanced.notify_all();
                true
            } else {
                false
            }
        };
        if last {
            self.coordination.workers_exited(self);
        }
    }
}

impl LevelDriver for Environment {
    fn advance_tag(&self) -> bool {
        self.coordination.tag_completed(self, self.current_tag());
        let mut state = self.lock();
        if state.failure.is_some() {
            return true;
        }
        if state.current_tag >= state.stop_tag {
            return true;
        }
        if let Err(err) = self.next_locked(&mut state) {
            self.fail_locked(&mut state, err);
            return true;
        }
        state.failure.is_some()
    }

    fn stall_level(&self, level: usize) -> bool {
        !self.is_failed() && self.coordination.stall_level(self, level) && !self.is_failed()
    }

    fn level_allowed(&self, level: usize) -> bool {
        !self.is_failed() && self.coordination.level_allowed(self, level)
    }

    fn level_completed(&self, level: usize) {
        self.coordination.level_completed(self, level);
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("program", &self.program.name)
            .field("tag", &self.current_tag())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::NoopPriority;
    use crate::{ProgramBuilder, Unfederated};
    use tempo_core::MSEC;
    use tempo_time::ManualTimeSource;

    fn environment(program: Program, config: RuntimeConfig) -> Arc<Environment> {
        let clock = Arc::new(PhysicalClock::with_source(ManualTimeSource::new(1_000)));
        let coordination: Arc<dyn Coordination> = Arc::new(Unfederated);
        let global = Global::new(Arc::clone(&coordination));
        Environment::new(
            EnvironmentId(0),
            Arc::new(program),
            Arc::new(config),
            clock,
            coordination,
            global,
            Arc::new(NoopPriority),
        )
        .unwrap()
    }

    fn timer_program() -> (Program, TriggerId) {
        let mut b = ProgramBuilder::new("timer");
        let t = b.timer("t", 0, 10 * MSEC);
        b.reaction("tick", 0, |_| {}).triggered_by(t).add();
        (b.build().unwrap(), t)
    }

    #[test]
    fn test_start_tag_pops_zero_offset_timer() {
        let (program, t) = timer_program();
        let env = environment(program, RuntimeConfig::fast_simulation().with_timeout(30 * MSEC));
        env.initialize_start_tag(1_000).unwrap();
        let state = env.lock();
        assert_eq!(state.current_tag, Tag::new(1_000, 0));
        assert_eq!(state.stop_tag, Tag::new(1_000 + 30 * MSEC, 0));
        assert!(state.execution_started);
        assert!(env.is_present(t));
        assert_eq!(
            state.queue.peek_tag(&state.window()).unwrap(),
            Tag::new(1_000 + 10 * MSEC, 0)
        );
    }

    #[test]
    fn test_next_advances_through_timer_ticks() {
        let (program, _) = timer_program();
        let env = environment(program, RuntimeConfig::fast_simulation().with_timeout(30 * MSEC));
        env.initialize_start_tag(0).unwrap();
        let mut visited = vec![env.current_tag()];
        for _ in 0..3 {
            let mut state = env.lock();
            env.next_locked(&mut state).unwrap();
            visited.push(state.current_tag);
        }
        assert_eq!(
            visited,
            vec![Tag::at(0), Tag::at(10 * MSEC), Tag::at(20 * MSEC), Tag::at(30 * MSEC)]
        );
        assert_eq!(env.lock().phase, Phase::Stopping);
    }

    #[test]
    fn test_empty_queue_stops_at_next_microstep() {
        let program = ProgramBuilder::new("empty").build().unwrap();
        let env = environment(program, RuntimeConfig::fast_simulation());
        env.initialize_start_tag(0).unwrap();
        let mut state = env.lock();
        env.next_locked(&mut state).unwrap();
        assert_eq!(state.current_tag, Tag::new(0, 1));
        assert_eq!(state.stop_tag, Tag::new(0, 1));
    }

    #[test]
    fn test_barrier_holds_advance_until_lowered() {
        let (program, _) = timer_program();
        let env = environment(program, RuntimeConfig::fast_simulation());
        env.initialize_start_tag(0).unwrap();
        {
            let mut state = env.lock();
            env.raise_barrier_locked(&mut state, Tag::at(5 * MSEC));
        }
        let advancer = {
            let env = Arc::clone(&env);
            std::thread::spawn(move || {
                let mut state = env.lock();
                env.next_locked(&mut state).unwrap();
                state.current_tag
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert_eq!(env.current_tag(), Tag::at(0));
        {
            let mut state = env.lock();
            env.lower_barrier_locked(&mut state).unwrap();
            assert!(env.lower_barrier_locked(&mut state).is_err());
        }
        assert_eq!(advancer.join().unwrap(), Tag::at(10 * MSEC));
    }

    #[test]
    fn test_failure_interrupts_keepalive_wait() {
        let program = ProgramBuilder::new("idle").build().unwrap();
        let config = RuntimeConfig {
            keepalive: true,
            ..RuntimeConfig::default()
        };
        let env = environment(program, config);
        env.initialize_start_tag(1_000).unwrap();
        let advancer = {
            let env = Arc::clone(&env);
            std::thread::spawn(move || env.advance_tag())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        env.fail(TempoError::CoordinatorFailed);
        assert!(advancer.join().unwrap());
        assert_eq!(env.failure(), Some(TempoError::CoordinatorFailed));
    }

    #[test]
    fn test_schedule_physical_wakes_keepalive_wait() {
        let mut b = ProgramBuilder::new("physical");
        let p = b.physical_action("p", 0);
        b.reaction("on_p", 0, |_| {}).triggered_by(p).add();
        let config = RuntimeConfig {
            keepalive: true,
            fast: true,
            ..RuntimeConfig::default()
        };
        let env = environment(b.build().unwrap(), config);
        env.initialize_start_tag(0).unwrap();
        let advancer = {
            let env = Arc::clone(&env);
            std::thread::spawn(move || {
                let mut state = env.lock();
                env.next_locked(&mut state).unwrap();
                state.current_tag
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        env.schedule_physical(p, 0, Some(Bytes::from_static(b"x"))).unwrap();
        let reached = advancer.join().unwrap();
        assert!(reached > Tag::at(0));
        assert_eq!(env.value(p), Some(Bytes::from_static(b"x")));
    }
}
