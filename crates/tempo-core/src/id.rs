//! Identity types for the reactor runtime
//!
//! Program entities are addressed by dense indices assigned when the
//! program description is built, so they double as vector offsets.

use std::fmt;

/// Index of a reaction in its program
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ReactionId(pub u32);

impl ReactionId {
    #[inline]
    pub fn new(id: u32) -> Self {
        ReactionId(id)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ReactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reaction({})", self.0)
    }
}

impl fmt::Display for ReactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Index of a trigger (timer, action or port) in its program
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TriggerId(pub u32);

impl TriggerId {
    #[inline]
    pub fn new(id: u32) -> Self {
        TriggerId(id)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Trigger({})", self.0)
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Network port identifier as carried on the wire
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PortId(pub u16);

impl PortId {
    #[inline]
    pub fn new(id: u16) -> Self {
        PortId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        PortId(u16::from_le_bytes(bytes))
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// Federate identifier as carried on the wire
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FederateId(pub u16);

impl FederateId {
    #[inline]
    pub fn new(id: u16) -> Self {
        FederateId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        FederateId(u16::from_le_bytes(bytes))
    }
}

impl fmt::Debug for FederateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Federate({})", self.0)
    }
}

impl fmt::Display for FederateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling domain (enclave) identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct EnvironmentId(pub u32);

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env{}", self.0)
    }
}

/// Handle returned by a successful schedule call
///
/// [`Handle::NONE`] means the call was accepted but nothing new was queued
/// (dropped, merged into an existing event, or past the stop tag).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Handle(pub u64);

impl Handle {
    pub const NONE: Handle = Handle(0);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_ids_roundtrip_le() {
        let port = PortId::new(0x1234);
        assert_eq!(port.to_bytes(), [0x34, 0x12]);
        assert_eq!(PortId::from_bytes(port.to_bytes()), port);
        let fed = FederateId::new(7);
        assert_eq!(FederateId::from_bytes(fed.to_bytes()), fed);
    }

    #[test]
    fn test_handle_none() {
        assert!(Handle::NONE.is_none());
        assert!(!Handle(3).is_none());
    }
}
