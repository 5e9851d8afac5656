//! What a reaction body sees while it runs

use bytes::Bytes;
use tracing::warn;

use tempo_core::{Handle, Instant, Interval, ReactionId, Tag, TempoResult, TriggerId};

use crate::Environment;

pub struct ReactionContext<'a> {
    env: &'a Environment,
    reaction: ReactionId,
    tag: Tag,
    worker: usize,
    outputs: Vec<TriggerId>,
}

impl<'a> ReactionContext<'a> {
    pub(crate) fn new(env: &'a Environment, reaction: ReactionId, tag: Tag, worker: usize) -> Self {
        ReactionContext {
            env,
            reaction,
            tag,
            worker,
            outputs: Vec::new(),
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn logical_time(&self) -> Instant {
        self.tag.time
    }

    /// Logical time elapsed since the start time
    pub fn elapsed(&self) -> Interval {
        self.tag.elapsed_since(self.env.start_time())
    }

    pub fn physical_time(&self) -> Instant {
        self.env.clock().now()
    }

    pub fn start_time(&self) -> Instant {
        self.env.start_time()
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn reaction(&self) -> ReactionId {
        self.reaction
    }

    pub fn environment(&self) -> &Environment {
        self.env
    }

    pub fn is_present(&self, trigger: TriggerId) -> bool {
        self.env.is_present(trigger)
    }

    /// Value of a trigger at the current tag, if present and carrying one
    pub fn get(&self, trigger: TriggerId) -> Option<Bytes> {
        self.env.value(trigger)
    }

    /// Tag at which the sender meant the value of `trigger` to arrive
    pub fn intended_tag(&self, trigger: TriggerId) -> Tag {
        self.env.intended_tag(trigger)
    }

    /// Write a port. Reactions enabled by the port run later in this tag,
    /// and network outputs fed by it are forwarded to their destination.
    pub fn set(&mut self, port: TriggerId, value: impl Into<Bytes>) {
        let value = value.into();
        self.env.set_slot(port, Some(value.clone()), self.tag);
        self.outputs.push(port);
        self.forward(port, value);
    }

    /// Mark a port present without a value
    pub fn set_present(&mut self, port: TriggerId) {
        self.env.set_slot(port, None, self.tag);
        self.outputs.push(port);
        self.forward(port, Bytes::new());
    }

    fn forward(&self, port: TriggerId, body: Bytes) {
        for output in self.env.program().network_output_for(port) {
            if let Err(err) = self.env.coordination().send_tagged(self.env, output, self.tag, body.clone()) {
                if err.is_fatal() {
                    self.env.fail(err);
                } else {
                    warn!(tag = %self.tag, "Failed to forward {} to {}: {}", port, output.destination, err);
                }
            }
        }
    }

    /// Schedule an action `delay` after the current tag (plus its minimum delay)
    pub fn schedule(&self, action: TriggerId, delay: Interval, payload: Option<Bytes>) -> TempoResult<Handle> {
        self.env.schedule(action, delay, payload)
    }

    /// Ask every environment (and the federation) to stop at the next microstep
    pub fn request_stop(&self) {
        self.env.global().request_stop();
    }

    /// Whether an input of this reaction arrived later than its intended tag
    pub fn is_stp_violated(&self) -> bool {
        self.env.is_stp_violated(self.reaction)
    }

    pub(crate) fn take_outputs(&mut self) -> Vec<TriggerId> {
        std::mem::take(&mut self.outputs)
    }
}
