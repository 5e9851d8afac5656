//! Tempo Time - Physical clock collaborator for the reactor runtime
//!
//! Provides the two platform capabilities the runtime core relies on:
//! a monotonic physical clock with a clock-synchronization offset, and an
//! interruptible sleep built on condition variables.

pub mod clock;
pub mod sleep;

pub use clock::*;
pub use sleep::*;
