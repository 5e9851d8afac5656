//! Tag barrier
//!
//! Any thread may raise the barrier to stop logical time from reaching a
//! future tag while it performs an operation that must land before that
//! tag, such as inserting a network message or negotiating a stop. The
//! barrier keeps the smallest requested horizon; advancement to a tag at or
//! beyond the horizon waits until every raise has been matched by a lower.
//!
//! The barrier itself is plain state guarded by the environment mutex. The
//! waiting and wakeups live in [`crate::Environment`].

use tracing::warn;

use tempo_core::{Tag, TempoError, TempoResult};

/// Counting barrier on logical time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagBarrier {
    requestors: u32,
    horizon: Tag,
}

impl Default for TagBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl TagBarrier {
    pub fn new() -> Self {
        TagBarrier {
            requestors: 0,
            horizon: Tag::FOREVER,
        }
    }

    /// Hold logical time below `future_tag`.
    ///
    /// A tag past the stop tag is clamped to the stop tag; a tag that is not
    /// in the future holds time at the next microstep. Returns the horizon
    /// in effect.
    pub fn raise(&mut self, future_tag: Tag, current: Tag, stop: Tag) -> Tag {
        let mut tag = future_tag;
        if tag > stop {
            warn!("Barrier requested at {} beyond stop tag {}", tag, stop);
            tag = stop;
        }
        let horizon = if tag > current {
            tag
        } else {
            current.next_microstep()
        };
        self.horizon = self.horizon.min(horizon);
        self.requestors += 1;
        self.horizon
    }

    /// Undo one [`TagBarrier::raise`]; returns true when the barrier cleared.
    ///
    /// Lowering a barrier nobody raised is misuse.
    pub fn lower(&mut self) -> TempoResult<bool> {
        if self.requestors == 0 {
            return Err(TempoError::BarrierMisuse(
                "lower called more times than raise".into(),
            ));
        }
        self.requestors -= 1;
        if self.requestors == 0 {
            self.horizon = Tag::FOREVER;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn is_raised(&self) -> bool {
        self.requestors > 0
    }

    pub fn requestors(&self) -> u32 {
        self.requestors
    }

    pub fn horizon(&self) -> Tag {
        self.horizon
    }

    /// Whether advancing to `proposed` must wait
    pub fn blocks(&self, proposed: Tag) -> bool {
        self.requestors > 0 && proposed >= self.horizon
    }
}
