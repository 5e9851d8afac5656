//! Worker threads
//!
//! Each worker pulls ready reactions from the scheduler and runs them.
//! After a reaction, a single downstream reaction that only that reaction
//! could have enabled may run inline on the same worker instead of being
//! queued, when no other work precedes it.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, trace, warn};

use tempo_core::{ReactionId, TempoError, TriggerId};

use crate::scheduler::{LevelDriver, ReactionStatus};
use crate::{CoordinationMode, Environment, ReactionContext};

/// Body of a worker thread; returns once execution stops
pub fn run_worker(env: &Environment, worker: usize) {
    debug!(env = %env.id(), "Worker {} started", worker);
    // Level 0 of the start tag may itself be held back by coordination.
    if !env.stall_level(0) {
        debug!(env = %env.id(), "Worker {} aborted before the start tag", worker);
        env.scheduler().stop();
        env.worker_exited(worker);
        return;
    }
    while let Some(reaction) = env.scheduler().get_ready_reaction(worker, env) {
        let outcome = catch_unwind(AssertUnwindSafe(|| execute(env, worker, reaction)));
        if outcome.is_err() {
            let name = env.program().reaction(reaction).name.clone();
            error!(env = %env.id(), "Reaction {} panicked", name);
            if env.scheduler().status(reaction) != ReactionStatus::Inactive {
                env.scheduler().done(reaction);
            }
            env.fail(TempoError::ReactionPanicked(name));
        }
    }
    env.worker_exited(worker);
}

/// Run `reaction` and any chain of reactions it hands off inline
fn execute(env: &Environment, worker: usize, reaction: ReactionId) {
    let mut next = Some(reaction);
    while let Some(current) = next {
        next = run_reaction(env, worker, current);
        env.scheduler().done(current);
    }
}

fn run_reaction(env: &Environment, worker: usize, reaction: ReactionId) -> Option<ReactionId> {
    let spec = env.program().reaction(reaction);
    let _reactor = spec.reactor.map(|r| env.reactor_lock(r).lock());
    let tag = env.current_tag();
    let mut ctx = ReactionContext::new(env, reaction, tag, worker);
    trace!(env = %env.id(), "Worker {} running {} at {}", worker, spec.name, tag);

    let mut handled = false;
    if let Some(deadline) = spec.deadline {
        let now = env.clock().now();
        if deadline == 0 || now > tag.time.saturating_add(deadline) {
            match &spec.deadline_handler {
                Some(handler) => {
                    debug!(env = %env.id(), "Deadline handler of {} at {}", spec.name, tag);
                    handler(&mut ctx);
                    handled = true;
                }
                None => warn!(
                    env = %env.id(),
                    "{}",
                    TempoError::DeadlineMiss {
                        reaction: spec.name.clone(),
                        tag
                    }
                ),
            }
        }
    }

    if !handled && !spec.is_input_reaction && env.is_stp_violated(reaction) {
        match &spec.stp_handler {
            Some(handler) => {
                debug!(env = %env.id(), "STP handler of {} at {}", spec.name, tag);
                handler(&mut ctx);
                env.set_stp_violated(reaction, false);
                handled = true;
            }
            None => error!(
                env = %env.id(),
                "Reaction {} has inputs that arrived late at {} and no handler",
                spec.name,
                tag
            ),
        }
    }

    if !handled {
        let boosted = match (env.edf(), spec.deadline) {
            (Some(edf), Some(deadline)) => match edf.begin(worker, tag.time.saturating_add(deadline)) {
                Ok(_) => true,
                Err(err) => {
                    if err.is_fatal() {
                        env.fail(err);
                        return None;
                    }
                    false
                }
            },
            _ => false,
        };
        (spec.body)(&mut ctx);
        if boosted {
            if let Some(edf) = env.edf() {
                if let Err(err) = edf.end(worker) {
                    env.fail(err);
                }
            }
        }
    }

    let outputs = ctx.take_outputs();
    let next = schedule_output_reactions(env, reaction, &outputs);
    env.set_stp_violated(reaction, false);
    next
}

/// Queue reactions enabled by the ports `reaction` wrote. When exactly one
/// reaction is enabled and `reaction` is its last enabler, it is returned
/// for inline execution instead, provided the scheduler admits it.
fn schedule_output_reactions(
    env: &Environment,
    reaction: ReactionId,
    outputs: &[TriggerId],
) -> Option<ReactionId> {
    let program = env.program();
    let scheduler = env.scheduler();
    let propagate_stp = env.mode() == CoordinationMode::Decentralized && env.is_stp_violated(reaction);
    let enabled: Vec<ReactionId> = outputs
        .iter()
        .flat_map(|&output| program.trigger(output).reactions.iter().copied())
        .collect();
    if propagate_stp {
        for &downstream in &enabled {
            env.set_stp_violated(downstream, true);
        }
    }
    if let [only] = enabled[..] {
        if program.reaction(only).last_enabling == Some(reaction) && scheduler.try_inline(only, env) {
            return Some(only);
        }
    }
    for downstream in enabled {
        scheduler.trigger(downstream);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;
    use tempo_core::{EnvironmentId, MSEC};
    use tempo_time::{ManualTimeSource, PhysicalClock};

    use crate::scheduler::NoopPriority;
    use crate::{Coordination, Global, Program, ProgramBuilder, RuntimeConfig, Unfederated};

    fn environment(program: Program, config: RuntimeConfig, clock: Arc<PhysicalClock>) -> Arc<Environment> {
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

    #[test]
    fn test_port_chain_runs_inline() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut b = ProgramBuilder::new("chain");
        let port = b.port("p");
        let log = Arc::clone(&seen);
        b.reaction("source", 0, move |ctx| {
            log.lock().push(("source", ctx.worker()));
            ctx.set(port, Bytes::from_static(b"42"));
        })
        .on_startup()
        .writes(port)
        .add();
        let log = Arc::clone(&seen);
        b.reaction("sink", 1, move |ctx| {
            assert_eq!(ctx.get(port), Some(Bytes::from_static(b"42")));
            log.lock().push(("sink", ctx.worker()));
        })
        .triggered_by(port)
        .add();
        let program = b.build().unwrap();
        assert_eq!(program.reaction(ReactionId::new(1)).last_enabling, Some(ReactionId::new(0)));

        let clock = Arc::new(PhysicalClock::new());
        let env = environment(program, RuntimeConfig::fast_simulation().with_workers(1), clock);
        env.initialize_start_tag(0).unwrap();
        run_worker(&env, 0);
        assert_eq!(*seen.lock(), vec![("source", 0), ("sink", 0)]);
        assert!(env.failure().is_none());
    }

    #[test]
    fn test_downstream_waits_for_lower_level_sibling() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut b = ProgramBuilder::new("siblings");
        let port = b.port("p");
        let reactor = b.reactor();
        let log = Arc::clone(&order);
        b.reaction("writer", 0, move |ctx| {
            log.lock().push("writer");
            ctx.set(port, Bytes::from_static(b"x"));
        })
        .on_startup()
        .writes(port)
        .add();
        let log = Arc::clone(&order);
        b.reaction("early", 1, move |_| log.lock().push("early"))
            .on_startup()
            .in_reactor(reactor)
            .add();
        let log = Arc::clone(&order);
        b.reaction("late", 2, move |_| log.lock().push("late"))
            .triggered_by(port)
            .in_reactor(reactor)
            .add();

        let clock = Arc::new(PhysicalClock::new());
        let env = environment(b.build().unwrap(), RuntimeConfig::fast_simulation().with_workers(1), clock);
        env.initialize_start_tag(0).unwrap();
        run_worker(&env, 0);
        assert_eq!(*order.lock(), vec!["writer", "early", "late"]);
    }

    #[test]
    fn test_queued_lower_level_blocks_inline_chain() {
        // No shared reactor: the chain itself must notice the queued level.
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut b = ProgramBuilder::new("levels");
        let port = b.port("p");
        let log = Arc::clone(&order);
        b.reaction("writer", 0, move |ctx| {
            log.lock().push("writer");
            ctx.set(port, Bytes::from_static(b"x"));
        })
        .on_startup()
        .writes(port)
        .add();
        let log = Arc::clone(&order);
        b.reaction("middle", 1, move |_| log.lock().push("middle"))
            .on_startup()
            .add();
        let log = Arc::clone(&order);
        b.reaction("last", 2, move |_| log.lock().push("last"))
            .triggered_by(port)
            .add();
        let program = b.build().unwrap();
        assert_eq!(program.reaction(ReactionId::new(2)).last_enabling, Some(ReactionId::new(0)));

        let clock = Arc::new(PhysicalClock::new());
        let env = environment(program, RuntimeConfig::fast_simulation().with_workers(1), clock);
        env.initialize_start_tag(0).unwrap();
        run_worker(&env, 0);
        assert_eq!(*order.lock(), vec!["writer", "middle", "last"]);
    }

    #[test]
    fn test_deadline_handler_replaces_body() {
        let body = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(ManualTimeSource::new(0));
        let clock = Arc::new(PhysicalClock::with_source(Arc::clone(&source)));
        let mut b = ProgramBuilder::new("deadline");
        let (body_count, handler_count) = (Arc::clone(&body), Arc::clone(&handler));
        b.reaction("late", 0, move |_| {
            body_count.fetch_add(1, Ordering::SeqCst);
        })
        .on_startup()
        .deadline(MSEC)
        .on_deadline_miss(move |_| {
            handler_count.fetch_add(1, Ordering::SeqCst);
        })
        .add();
        let env = environment(b.build().unwrap(), RuntimeConfig::fast_simulation().with_workers(1), clock);
        env.initialize_start_tag(0).unwrap();
        source.advance(5 * MSEC);
        run_worker(&env, 0);
        assert_eq!(body.load(Ordering::SeqCst), 0);
        assert_eq!(handler.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_environment_runs_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut b = ProgramBuilder::new("failed");
        let count = Arc::clone(&runs);
        b.reaction("start", 0, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .on_startup()
        .add();
        let clock = Arc::new(PhysicalClock::new());
        let env = environment(b.build().unwrap(), RuntimeConfig::fast_simulation().with_workers(2), clock);
        env.initialize_start_tag(0).unwrap();
        env.fail(TempoError::CoordinatorFailed);
        std::thread::scope(|s| {
            for worker in 0..2 {
                let env = &env;
                s.spawn(move || run_worker(env, worker));
            }
        });
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(env.scheduler().is_stopped());
    }

    #[test]
    fn test_panicking_reaction_fails_environment() {
        let mut b = ProgramBuilder::new("panics");
        b.reaction("boom", 0, |_| panic!("boom")).on_startup().add();
        let clock = Arc::new(PhysicalClock::new());
        let env = environment(b.build().unwrap(), RuntimeConfig::fast_simulation().with_workers(1), clock);
        env.initialize_start_tag(0).unwrap();
        run_worker(&env, 0);
        assert_eq!(env.failure(), Some(TempoError::ReactionPanicked("boom".into())));
    }

    #[test]
    fn test_shared_reactor_serializes_reactions() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let mut b = ProgramBuilder::new("mutex");
        let reactor = b.reactor();
        let t = b.timer("t", 0, MSEC);
        for i in 0..4 {
            let (active, overlaps) = (Arc::clone(&active), Arc::clone(&overlaps));
            b.reaction(&format!("r{}", i), 0, move |_| {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::yield_now();
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .triggered_by(t)
            .in_reactor(reactor)
            .add();
        }
        let clock = Arc::new(PhysicalClock::new());
        let config = RuntimeConfig::fast_simulation().with_workers(4).with_timeout(20 * MSEC);
        let env = environment(b.build().unwrap(), config, clock);
        env.initialize_start_tag(0).unwrap();
        std::thread::scope(|s| {
            for worker in 0..4 {
                let env = &env;
                s.spawn(move || run_worker(env, worker));
            }
        });
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(env.current_tag(), tempo_core::Tag::at(20 * MSEC));
    }
}
