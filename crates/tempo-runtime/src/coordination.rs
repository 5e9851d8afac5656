//! Coordination hooks
//!
//! The environment consults a [`Coordination`] at every point where a
//! federate must talk to the coordinator or its peers. A standalone program
//! uses [`Unfederated`], whose hooks do nothing.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::MutexGuard;

use tempo_core::{Instant, Interval, Tag, TempoError, TempoResult};

use crate::{CoordinationMode, EnvState, Environment, NetworkOutputSpec};

pub trait Coordination: Send + Sync {
    fn mode(&self) -> CoordinationMode {
        CoordinationMode::None
    }

    /// Agree on the start time. Called before any environment lock is held.
    fn synchronize_start(&self, _env: &Arc<Environment>, local_start: Instant) -> TempoResult<Instant> {
        Ok(local_start)
    }

    /// Extra wait applied to physical time before a tag may be processed
    fn sta_offset(&self) -> Interval {
        0
    }

    /// The start tag has been reached; no events have popped yet
    fn on_execution_start(
        &self,
        _env: &Arc<Environment>,
        _state: &mut MutexGuard<'_, EnvState>,
    ) -> TempoResult<()> {
        Ok(())
    }

    /// Centralized coordination: block until advancing to `tag` is granted
    /// or the event queue changes, returning the tag that may be reached.
    fn next_event_tag(&self, _env: &Environment, _state: &mut MutexGuard<'_, EnvState>, tag: Tag) -> Tag {
        tag
    }

    /// A new tag is about to be processed
    fn on_tag_started(&self, _env: &Environment, _state: &mut EnvState) {}

    /// Block until reactions at `level` may run; false aborts execution
    fn stall_level(&self, _env: &Environment, _level: usize) -> bool {
        true
    }

    /// Whether an empty event queue may end execution: nothing outside
    /// this environment can send it events
    fn may_starve(&self) -> bool {
        self.mode() == CoordinationMode::None
    }

    /// Whether reactions at `level` may run right now, without blocking
    fn level_allowed(&self, _env: &Environment, _level: usize) -> bool {
        true
    }

    /// Every reaction at `level` for the current tag has completed
    fn level_completed(&self, _env: &Environment, _level: usize) {}

    /// All reactions of `tag` have completed
    fn tag_completed(&self, _env: &Environment, _tag: Tag) {}

    /// Ask the federation to stop at `tag`. Returns true when the decision
    /// is pending a grant from the coordinator.
    fn request_stop(&self, _tag: Tag) -> TempoResult<bool> {
        Ok(false)
    }

    /// Forward the value of a network output port
    fn send_tagged(&self, _env: &Environment, _output: &NetworkOutputSpec, _tag: Tag, _body: Bytes) -> TempoResult<()> {
        Ok(())
    }

    /// The last worker of the environment has exited
    fn workers_exited(&self, _env: &Environment) {}

    /// Execution is over; `failure` is set on abnormal termination
    fn finish(&self, _failure: Option<&TempoError>) {}
}

/// Coordination of a standalone program
#[derive(Clone, Copy, Debug, Default)]
pub struct Unfederated;

impl Coordination for Unfederated {}
