//! Tempo Transport - Connections to the coordinator and to peer federates
//!
//! Links carry [`tempo_wire::Message`]s. Outbound sends are synchronous so
//! the runtime's OS threads can call them while holding protocol state;
//! inbound traffic is decoded by a receive loop and handed over as
//! [`LinkEvent`]s.

pub mod address;
pub mod link;
pub mod tcp;

pub use address::*;
pub use link::*;
pub use tcp::*;
