//! Error types for the reactor runtime

use thiserror::Error;

use crate::{FederateId, Tag, TriggerId};

/// How far an error is allowed to propagate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Logged; execution continues
    Recoverable,
    /// Confined to the affected connection or thread
    Soft,
    /// Stops the environment with abnormal termination
    Fatal,
}

/// Runtime errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TempoError {
    // Scheduling errors
    #[error("Cannot schedule {trigger:?} at {tag}: current tag is {current}")]
    PastTagSchedule {
        trigger: Option<TriggerId>,
        tag: Tag,
        current: Tag,
    },

    #[error("Event at {tag} is past the stop tag {stop}")]
    StopTagExceeded { tag: Tag, stop: Tag },

    // Tag-advancement errors
    #[error("Mismatched use of the tag barrier: {0}")]
    BarrierMisuse(String),

    #[error("Tag regression: {attempted} is earlier than {current}")]
    TagRegression { current: Tag, attempted: Tag },

    // Reaction-level violations
    #[error("Safe-to-process violation: intended {intended}, processed at {current}")]
    StpViolation { intended: Tag, current: Tag },

    #[error("Deadline missed by reaction {reaction} at {tag}")]
    DeadlineMiss { reaction: String, tag: Tag },

    #[error("Reaction {0} panicked")]
    ReactionPanicked(String),

    #[error("More deadline holders ({holders}) than priority values ({values})")]
    PriorityExhausted { holders: usize, values: usize },

    // Federation errors
    #[error("Connection to the coordinator lost: {0}")]
    CoordinatorLost(String),

    #[error("Coordinator reported a failure")]
    CoordinatorFailed,

    #[error("Protocol desynchronized: {0}")]
    ProtocolDesync(String),

    #[error("Handshake rejected by coordinator (cause {cause}) for federate {federate}")]
    HandshakeRejected { federate: FederateId, cause: u8 },

    // Wire errors
    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    // Environment errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Physical clock read failed: {0}")]
    ClockFailure(String),

    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TempoError {
    /// Classify the error per the runtime's propagation policy
    pub fn severity(&self) -> Severity {
        match self {
            TempoError::PastTagSchedule { .. }
            | TempoError::StopTagExceeded { .. }
            | TempoError::StpViolation { .. }
            | TempoError::DeadlineMiss { .. } => Severity::Recoverable,
            TempoError::CoordinatorLost(_) | TempoError::TransportError(_) => Severity::Soft,
            TempoError::BarrierMisuse(_)
            | TempoError::TagRegression { .. }
            | TempoError::PriorityExhausted { .. }
            | TempoError::ReactionPanicked(_)
            | TempoError::CoordinatorFailed
            | TempoError::ProtocolDesync(_)
            | TempoError::HandshakeRejected { .. }
            | TempoError::BufferTooShort { .. }
            | TempoError::UnknownMessageType(_)
            | TempoError::InvalidWireFormat(_)
            | TempoError::ClockFailure(_)
            | TempoError::InvalidProgram(_)
            | TempoError::InvalidConfig(_) => Severity::Fatal,
        }
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Result type for runtime operations
pub type TempoResult<T> = Result<T, TempoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_taxonomy() {
        let past = TempoError::PastTagSchedule {
            trigger: None,
            tag: Tag::ZERO,
            current: Tag::at(5),
        };
        assert_eq!(past.severity(), Severity::Recoverable);
        assert_eq!(
            TempoError::CoordinatorLost("eof".into()).severity(),
            Severity::Soft
        );
        let late = TempoError::StopTagExceeded {
            tag: Tag::new(20, 1),
            stop: Tag::at(20),
        };
        assert_eq!(late.severity(), Severity::Recoverable);
        assert_eq!(late.to_string(), "Event at (20, 1) is past the stop tag (20, 0)");
        assert!(TempoError::BarrierMisuse("lower".into()).is_fatal());
        assert!(TempoError::ProtocolDesync("partial read".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = TempoError::TagRegression {
            current: Tag::new(10, 0),
            attempted: Tag::new(5, 0),
        };
        assert_eq!(err.to_string(), "Tag regression: (5, 0) is earlier than (10, 0)");
    }
}
