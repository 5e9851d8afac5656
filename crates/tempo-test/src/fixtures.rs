//! Program and runtime builders shared by scenario tests, benches and the demo

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use tempo_core::{FederateId, Instant, Interval, PortId, Tag, TempoResult};
use tempo_federated::{Federate, FederateConfig};
use tempo_runtime::{Coordination, Program, ProgramBuilder, Runtime, RuntimeConfig};
use tempo_time::PhysicalClock;

use crate::FederateEnd;

/// Tags recorded by reactions, relative to the start time
#[derive(Clone, Default)]
pub struct TagLog(Arc<Mutex<Vec<Tag>>>);

impl TagLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, tag: Tag) {
        self.0.lock().push(tag);
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Elapsed tag of a reaction: the start time is subtracted
fn elapsed(tag: Tag, start: Instant) -> Tag {
    Tag::new(tag.time - start, tag.microstep)
}

/// One timer and a shutdown reaction, each logging its elapsed tag
pub fn periodic_timer(offset: Interval, period: Interval) -> TempoResult<(Program, TagLog, TagLog)> {
    let ticks = TagLog::new();
    let shutdowns = TagLog::new();
    let mut b = ProgramBuilder::new("periodic");
    let t = b.timer("t", offset, period);
    let log = ticks.clone();
    b.reaction("tick", 0, move |ctx| log.push(elapsed(ctx.tag(), ctx.start_time())))
        .triggered_by(t)
        .add();
    let log = shutdowns.clone();
    b.reaction("shutdown", 1, move |ctx| log.push(elapsed(ctx.tag(), ctx.start_time())))
        .on_shutdown()
        .add();
    Ok((b.build()?, ticks, shutdowns))
}

/// Federate program with one network input feeding a level-1 reaction and
/// one timer-driven output toward `destination`
pub fn relay_program(timer_offset: Interval, destination: FederateId, staa: Interval) -> TempoResult<(Program, TagLog)> {
    let received = TagLog::new();
    let mut b = ProgramBuilder::new("relay");
    let t = b.timer("t", timer_offset, 0);
    let out = b.port("out");
    let input = b.network_input("in", PortId::new(0), None, staa);
    b.reaction("emit", 0, move |ctx| ctx.set(out, &b"tick"[..]))
        .triggered_by(t)
        .writes(out)
        .add();
    let log = received.clone();
    b.reaction("receive", 1, move |ctx| log.push(elapsed(ctx.tag(), ctx.start_time())))
        .triggered_by(input)
        .input_reaction()
        .add();
    b.network_output(out, PortId::new(0), destination, None, 0);
    Ok((b.build()?, received))
}

/// Program run by the demo binary: a counter that reports every tick
pub fn demo_program(period: Interval) -> TempoResult<Program> {
    let ticks = Arc::new(Mutex::new(0u64));
    let mut b = ProgramBuilder::new("demo");
    let t = b.timer("clock", 0, period);
    let count = Arc::clone(&ticks);
    b.reaction("count", 0, move |ctx| {
        let mut n = count.lock();
        *n += 1;
        info!(tick = *n, elapsed = ctx.elapsed(), "Tick at {}", ctx.tag());
    })
    .triggered_by(t)
    .add();
    b.reaction("report", 1, move |ctx| {
        info!("Stopped at {} after {} ticks", ctx.tag(), *ticks.lock());
    })
    .on_shutdown()
    .add();
    b.build()
}

/// Runtime whose environment 0 is coordinated by a federate on `end`
pub fn federated_runtime(
    federate: FederateConfig,
    mut config: RuntimeConfig,
    program: Program,
    end: FederateEnd,
) -> TempoResult<(Arc<Federate>, Runtime)> {
    config.federate = Some(federate.federate);
    config.coordination = federate.mode;
    let fed = Federate::new(federate, &program, Arc::new(end.link), end.events)?;
    let coordination: Arc<dyn Coordination> = Arc::clone(&fed) as Arc<dyn Coordination>;
    let runtime = Runtime::federated(config, program, coordination, Arc::new(PhysicalClock::new()))?;
    if let Some(env) = runtime.environment(0) {
        fed.attach(env);
    }
    Ok((fed, runtime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_periodic_timer_declares_shutdown() {
        let (program, ticks, shutdowns) = periodic_timer(0, 100).unwrap();
        assert_eq!(program.shutdown.len(), 1);
        assert!(ticks.is_empty());
        assert!(shutdowns.is_empty());
    }

    #[test]
    fn test_relay_program_ports() {
        let (program, _) = relay_program(250, FederateId::new(2), 0).unwrap();
        assert_eq!(program.network_inputs.len(), 1);
        assert_eq!(program.network_outputs.len(), 1);
        assert_eq!(program.network_outputs[0].destination, FederateId::new(2));
    }
}
