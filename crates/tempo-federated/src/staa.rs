//! Safe-to-assume-absent thread (decentralized coordination)
//!
//! Without a coordinator nothing tells a federate that no message will
//! arrive on an input for the current tag. For each group of inputs
//! sharing an STAA, this thread waits until physical time passes
//! `current + STA + STAA`, then assumes every still-unresolved input in
//! the group absent so reactions held back by MLAA can run. It starts over
//! whenever the tag advances.

use std::sync::Arc;
use std::thread;

use parking_lot::MutexGuard;
use tracing::debug;

use tempo_core::{Interval, Tag, TempoError, TempoResult};
use tempo_runtime::{EnvState, Environment, Phase};

use crate::{Federate, PortStatus};

pub(crate) fn spawn_staa_thread(federate: Arc<Federate>, env: Arc<Environment>) -> TempoResult<()> {
    let name = format!("tempo-fed{}-staa", federate.id());
    thread::Builder::new()
        .name(name)
        .spawn(move || run_staa(&federate, &env))
        .map(|_| ())
        .map_err(|e| TempoError::InvalidConfig(format!("cannot spawn STAA thread: {}", e)))
}

fn finished(state: &EnvState) -> bool {
    state.failure.is_some() || state.phase == Phase::Stopped
}

fn run_staa(federate: &Federate, env: &Environment) {
    let groups = federate.protocol_state().staa_groups();
    if groups.is_empty() {
        debug!(federate = %federate.id(), "No network inputs; STAA thread not needed");
        return;
    }
    let sta = federate.config().sta_offset;
    let mut state = env.lock();
    while !finished(&state) {
        let tag = state.current_tag;
        for (staa, members) in &groups {
            resolve_group(federate, env, &mut state, tag, sta.saturating_add(*staa), members);
            if state.current_tag != tag || finished(&state) {
                break;
            }
        }
        while state.current_tag == tag && !finished(&state) {
            env.wait_tag_advanced(&mut state);
        }
    }
    debug!(federate = %federate.id(), "STAA thread exited");
}

/// Wait out the group's STAA at `tag`, then assume its unresolved inputs absent
fn resolve_group(
    federate: &Federate,
    env: &Environment,
    state: &mut MutexGuard<'_, EnvState>,
    tag: Tag,
    wait: Interval,
    members: &[usize],
) {
    let deadline = tag.time.saturating_add(wait);
    loop {
        if state.current_tag != tag || finished(state) {
            return;
        }
        let pending = {
            let fed = federate.protocol_state();
            members.iter().any(|&index| fed.is_unresolved(index, tag))
        };
        if !pending {
            return;
        }
        if env.config().fast || env.clock().now() >= deadline {
            break;
        }
        env.wait_port_status(state, deadline);
    }

    let mut fed = federate.protocol_state();
    for &index in members {
        if fed.is_unresolved(index, tag) {
            debug!(
                federate = %federate.id(),
                "Port {} assumed absent at {}", fed.inputs[index].port, tag
            );
            fed.set_status(index, PortStatus::Absent);
            fed.update_last_known_status(index, tag);
        }
    }
    fed.update_max_level(state.current_tag, state.start_time);
    drop(fed);
    env.notify_port_status();
}
