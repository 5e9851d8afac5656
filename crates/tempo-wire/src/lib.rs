//! Tempo Wire - Coordinator wire protocol
//!
//! Bit-exact encoding of the messages exchanged between a federate, its
//! coordinator and its peers, plus stream framing for socket readers.

pub mod codec;
pub mod message;

pub use codec::*;
pub use message::*;
