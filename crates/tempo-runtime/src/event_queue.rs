//! Event queue
//!
//! Events are ordered by time in a binary heap. Events for one trigger at
//! one time form a chain: the head pops at the first microstep of that
//! time, each link one microstep later. A chain may contain dummy links
//! that only hold a microstep open, and trigger-less dummy chains serve as
//! placeholders that force the tag-advancement loop to visit a tag.
//!
//! Chain links still queued are moved to a side buffer when their
//! predecessor pops and merged back into the heap at the end of the pop.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use bytes::Bytes;
use tracing::{debug, warn};

use tempo_core::{Handle, Instant, Interval, Microstep, Tag, TempoError, TempoResult, TriggerId};

use crate::{Program, SchedulePolicy};

/// Logical-time context of a schedule call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub current: Tag,
    pub stop: Tag,
    /// Execution has started; the current tag can no longer receive events
    pub started: bool,
}

impl ScheduleWindow {
    /// Microstep at which the head of a chain at `time` will pop
    fn base_microstep(&self, time: Instant) -> Microstep {
        if time == self.current.time {
            if self.started {
                self.current.microstep.saturating_add(1)
            } else {
                self.current.microstep
            }
        } else {
            0
        }
    }
}

/// An event handed to the environment at its tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoppedEvent {
    pub trigger: TriggerId,
    pub payload: Option<Bytes>,
    /// Tag the sender meant the event for (decentralized coordination)
    pub intended_tag: Tag,
}

#[derive(Clone, Debug)]
struct TriggerState {
    is_timer: bool,
    physical: bool,
    min_delay: Interval,
    min_spacing: Interval,
    policy: SchedulePolicy,
    last_tag: Tag,
}

#[derive(Clone, Debug)]
struct Event {
    time: Instant,
    trigger: Option<TriggerId>,
    payload: Option<Bytes>,
    intended_tag: Tag,
    next: Option<usize>,
    is_dummy: bool,
}

/// Priority queue of future events
pub struct EventQueue {
    events: Vec<Event>,
    free: Vec<usize>,
    heap: BinaryHeap<Reverse<(Instant, u64, usize)>>,
    heads: HashMap<(TriggerId, Instant), usize>,
    next_q: Vec<usize>,
    triggers: Vec<TriggerState>,
    seq: u64,
    last_handle: u64,
    last_popped: Tag,
}

impl EventQueue {
    pub fn new(program: &Program) -> Self {
        let triggers = program
            .triggers
            .iter()
            .map(|t| TriggerState {
                is_timer: t.is_timer(),
                physical: t.is_physical(),
                min_delay: t.min_delay,
                min_spacing: t.min_spacing,
                policy: t.policy,
                last_tag: Tag::NEVER,
            })
            .collect();
        EventQueue {
            events: Vec::new(),
            free: Vec::new(),
            heap: BinaryHeap::new(),
            heads: HashMap::new(),
            next_q: Vec::new(),
            triggers,
            seq: 0,
            last_handle: 0,
            last_popped: Tag::NEVER,
        }
    }

    /// Number of chain heads queued
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Tag of the last event scheduled through [`EventQueue::schedule`]
    pub fn last_tag(&self, trigger: TriggerId) -> Tag {
        self.triggers
            .get(trigger.index())
            .map(|t| t.last_tag)
            .unwrap_or(Tag::NEVER)
    }

    fn next_handle(&mut self) -> Handle {
        self.last_handle = if self.last_handle == u64::MAX {
            1
        } else {
            self.last_handle + 1
        };
        Handle(self.last_handle)
    }

    fn alloc(&mut self, event: Event) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.events[index] = event;
                index
            }
            None => {
                self.events.push(event);
                self.events.len() - 1
            }
        }
    }

    fn real(time: Instant, trigger: TriggerId, payload: Option<Bytes>, intended_tag: Tag) -> Event {
        Event {
            time,
            trigger: Some(trigger),
            payload,
            intended_tag,
            next: None,
            is_dummy: false,
        }
    }

    fn dummy(time: Instant, trigger: Option<TriggerId>) -> Event {
        Event {
            time,
            trigger,
            payload: None,
            intended_tag: Tag::NEVER,
            next: None,
            is_dummy: true,
        }
    }

    fn push_head(&mut self, index: usize) {
        self.seq += 1;
        let event = &self.events[index];
        self.heap.push(Reverse((event.time, self.seq, index)));
        if let Some(trigger) = event.trigger {
            self.heads.entry((trigger, event.time)).or_insert(index);
        }
    }

    /// Append `count` dummies after `tail`, returning the new tail
    fn extend_with_dummies(&mut self, mut tail: usize, count: u32) -> usize {
        let (time, trigger) = (self.events[tail].time, self.events[tail].trigger);
        for _ in 0..count {
            let dummy = self.alloc(Self::dummy(time, trigger));
            self.events[tail].next = Some(dummy);
            tail = dummy;
        }
        tail
    }

    /// Walk to the last link of a chain, returning it and the number of hops
    fn chain_end(&self, head: usize) -> (usize, u32) {
        let mut index = head;
        let mut hops = 0u32;
        while let Some(next) = self.events[index].next {
            index = next;
            hops = hops.saturating_add(1);
        }
        (index, hops)
    }

    /// Fill an existing chain slot according to the trigger's policy
    fn apply_policy(
        &mut self,
        window: &ScheduleWindow,
        slot: usize,
        slot_tag: Tag,
        trigger: TriggerId,
        payload: Option<Bytes>,
        intended_tag: Tag,
    ) -> Handle {
        if self.events[slot].is_dummy {
            let event = &mut self.events[slot];
            event.is_dummy = false;
            event.payload = payload;
            event.intended_tag = intended_tag;
            return self.next_handle();
        }
        match self.triggers[trigger.index()].policy {
            SchedulePolicy::Drop => {
                debug!("Dropping event for {} at {}: slot taken", trigger, slot_tag);
                Handle::NONE
            }
            SchedulePolicy::Replace => {
                let event = &mut self.events[slot];
                event.payload = payload;
                event.intended_tag = intended_tag;
                self.next_handle()
            }
            SchedulePolicy::Defer => {
                let (tail, hops) = self.chain_end(slot);
                let Some(microstep) = slot_tag.microstep.checked_add(hops + 1) else {
                    warn!("Microstep overflow scheduling {} at {}", trigger, slot_tag);
                    return Handle::NONE;
                };
                let tag = Tag::new(slot_tag.time, microstep);
                if tag > window.stop {
                    return discard_past_stop(trigger, tag, window.stop);
                }
                let event = self.alloc(Self::real(tag.time, trigger, payload, intended_tag));
                self.events[tail].next = Some(event);
                self.next_handle()
            }
        }
    }

    /// Schedule `trigger` at an absolute tag.
    ///
    /// Scheduling at or before the current tag once execution has started is
    /// an error. Tags after the stop tag are silently dropped and return
    /// [`Handle::NONE`], as do events refused by the trigger's policy.
    pub fn schedule_at_tag(
        &mut self,
        window: &ScheduleWindow,
        trigger: TriggerId,
        tag: Tag,
        payload: Option<Bytes>,
        intended_tag: Tag,
    ) -> TempoResult<Handle> {
        if trigger.index() >= self.triggers.len() {
            return Err(TempoError::InvalidProgram(format!("unknown trigger {}", trigger)));
        }
        let base = window.base_microstep(tag.time);
        if tag < window.current || (window.started && tag == window.current) || tag.microstep < base {
            return Err(TempoError::PastTagSchedule {
                trigger: Some(trigger),
                tag,
                current: window.current,
            });
        }
        if tag > window.stop {
            return Ok(discard_past_stop(trigger, tag, window.stop));
        }

        let steps = tag.microstep - base;
        let handle = match self.heads.get(&(trigger, tag.time)).copied() {
            Some(head) => {
                let mut slot = head;
                let mut position = 0;
                while position < steps {
                    match self.events[slot].next {
                        Some(next) => {
                            slot = next;
                            position += 1;
                        }
                        None => break,
                    }
                }
                if position == steps {
                    self.apply_policy(window, slot, tag, trigger, payload, intended_tag)
                } else {
                    let tail = self.extend_with_dummies(slot, steps - position - 1);
                    let event = self.alloc(Self::real(tag.time, trigger, payload, intended_tag));
                    self.events[tail].next = Some(event);
                    self.next_handle()
                }
            }
            None => {
                let event = self.alloc(Self::real(tag.time, trigger, payload, intended_tag));
                if steps == 0 {
                    self.push_head(event);
                } else {
                    let head = self.alloc(Self::dummy(tag.time, Some(trigger)));
                    let tail = self.extend_with_dummies(head, steps - 1);
                    self.events[tail].next = Some(event);
                    self.push_head(head);
                }
                self.next_handle()
            }
        };
        Ok(handle)
    }

    /// Schedule `trigger` relative to the current tag.
    ///
    /// The trigger's minimum delay is added for actions, physical actions are
    /// stamped from `physical_now`, and the minimum-spacing policy decides
    /// what happens to events that come too soon after the previous one.
    pub fn schedule(
        &mut self,
        window: &ScheduleWindow,
        trigger: TriggerId,
        extra_delay: Interval,
        payload: Option<Bytes>,
        physical_now: Option<Instant>,
        intended_tag: Tag,
    ) -> TempoResult<Handle> {
        let Some(state) = self.triggers.get(trigger.index()).cloned() else {
            return Err(TempoError::InvalidProgram(format!("unknown trigger {}", trigger)));
        };
        if window.current > window.stop {
            let err = TempoError::StopTagExceeded {
                tag: window.current,
                stop: window.stop,
            };
            warn!("Schedule of {} ignored: {}", trigger, err);
            return Ok(Handle::NONE);
        }
        let mut delay = extra_delay;
        if delay < 0 {
            warn!("Negative delay {} for {} replaced by 0", delay, trigger);
            delay = 0;
        }
        if !state.is_timer {
            delay = delay.saturating_add(state.min_delay);
        }
        let base_time = match (state.physical, physical_now) {
            (true, Some(now)) => now.max(window.current.time),
            _ => window.current.time,
        };
        let mut time = base_time.saturating_add(delay);

        if state.min_spacing <= 0 {
            if let Some(head) = self.heads.get(&(trigger, time)).copied() {
                let (tail, hops) = self.chain_end(head);
                let Some(microstep) = window.base_microstep(time).checked_add(hops + 1) else {
                    warn!("Microstep overflow scheduling {} at {}", trigger, time);
                    return Ok(Handle::NONE);
                };
                let tag = Tag::new(time, microstep);
                if tag > window.stop {
                    return Ok(discard_past_stop(trigger, tag, window.stop));
                }
                let event = self.alloc(Self::real(time, trigger, payload, intended_tag));
                self.events[tail].next = Some(event);
                self.triggers[trigger.index()].last_tag = tag;
                return Ok(self.next_handle());
            }
        } else if !state.is_timer && !state.last_tag.is_never() {
            let earliest = state.last_tag.time.saturating_add(state.min_spacing);
            if earliest > time {
                match state.policy {
                    SchedulePolicy::Drop => {
                        debug!("Dropping event for {}: within minimum spacing", trigger);
                        return Ok(Handle::NONE);
                    }
                    SchedulePolicy::Replace => {
                        if let Some(head) = self.heads.get(&(trigger, state.last_tag.time)).copied() {
                            let event = &mut self.events[head];
                            event.payload = payload;
                            event.intended_tag = intended_tag;
                            return Ok(self.next_handle());
                        }
                        time = earliest;
                    }
                    SchedulePolicy::Defer => time = earliest,
                }
            }
        }

        if time > window.stop.time {
            return Ok(discard_past_stop(trigger, Tag::at(time), window.stop));
        }
        let event = self.alloc(Self::real(time, trigger, payload, intended_tag));
        let tag = match self.heads.get(&(trigger, time)).copied() {
            Some(head) => {
                let (tail, hops) = self.chain_end(head);
                self.events[tail].next = Some(event);
                Tag::new(time, window.base_microstep(time).saturating_add(hops + 1))
            }
            None => {
                self.push_head(event);
                Tag::new(time, window.base_microstep(time))
            }
        };
        self.triggers[trigger.index()].last_tag = tag;
        Ok(self.next_handle())
    }

    /// Force the loop to visit `tag` by queueing trigger-less dummies.
    ///
    /// Tags already passed need no placeholder and are ignored.
    pub fn insert_placeholder(&mut self, window: &ScheduleWindow, tag: Tag) {
        if tag.is_forever() || tag < window.current {
            return;
        }
        let base = window.base_microstep(tag.time);
        if tag.microstep < base {
            return;
        }
        let head = self.alloc(Self::dummy(tag.time, None));
        self.extend_with_dummies(head, tag.microstep - base);
        self.push_head(head);
    }

    /// Tag of the earliest queued event, capped at the stop tag.
    ///
    /// An empty queue yields the stop tag. An event earlier than the
    /// current time means the queue was corrupted.
    pub fn peek_tag(&self, window: &ScheduleWindow) -> TempoResult<Tag> {
        let tag = match self.heap.peek() {
            None => return Ok(window.stop),
            Some(Reverse((time, _, _))) => {
                if *time < window.current.time {
                    return Err(TempoError::TagRegression {
                        current: window.current,
                        attempted: Tag::at(*time),
                    });
                }
                if *time == window.current.time {
                    window.current.next_microstep()
                } else {
                    Tag::at(*time)
                }
            }
        };
        Ok(tag.min(window.stop))
    }

    /// Pop every event whose time equals `current.time`.
    ///
    /// Dummy links are consumed silently. Successive calls must use strictly
    /// increasing tags.
    pub fn pop_same_tag(&mut self, current: Tag) -> TempoResult<Vec<PoppedEvent>> {
        if !self.last_popped.is_never() && current <= self.last_popped {
            return Err(TempoError::TagRegression {
                current: self.last_popped,
                attempted: current,
            });
        }
        self.last_popped = current;

        let mut popped = Vec::new();
        while let Some(Reverse((time, _, index))) = self.heap.peek().copied() {
            if time > current.time {
                break;
            }
            if time < current.time {
                return Err(TempoError::TagRegression {
                    current,
                    attempted: Tag::at(time),
                });
            }
            self.heap.pop();
            let event = self.events[index].clone();
            if let Some(trigger) = event.trigger {
                if self.heads.get(&(trigger, time)) == Some(&index) {
                    self.heads.remove(&(trigger, time));
                }
            }
            if let Some(next) = event.next {
                self.next_q.push(next);
            }
            if let (false, Some(trigger)) = (event.is_dummy, event.trigger) {
                popped.push(PoppedEvent {
                    trigger,
                    payload: event.payload,
                    intended_tag: event.intended_tag,
                });
            }
            self.events[index].payload = None;
            self.events[index].next = None;
            self.free.push(index);
        }
        for next in std::mem::take(&mut self.next_q) {
            self.push_head(next);
        }
        Ok(popped)
    }
}

/// Events past the stop tag are discarded quietly
fn discard_past_stop(trigger: TriggerId, tag: Tag, stop: Tag) -> Handle {
    debug!("Dropping event for {}: {}", trigger, TempoError::StopTagExceeded { tag, stop });
    Handle::NONE
}
