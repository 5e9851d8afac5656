//! Tempo Core - Fundamental types for the deterministic reactor runtime
//!
//! This crate defines the value types every other crate speaks in:
//! superdense tags, dense identifiers, and the error taxonomy with its
//! propagation policy.

pub mod error;
pub mod id;
pub mod tag;
pub mod units;

pub use error::*;
pub use id::*;
pub use tag::*;
pub use units::*;
