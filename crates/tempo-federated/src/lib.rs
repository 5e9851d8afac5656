//! Tempo Federated - Federate side of the coordination protocol
//!
//! A [`Federate`] plugs into a runtime through the `Coordination` hooks and
//! keeps its environment in step with the rest of the federation:
//! - centralized: NET/LTC go to the coordinator, TAG/PTAG come back
//! - decentralized: tags advance on physical time plus an STA offset, and
//!   inputs still unresolved after their STAA are assumed absent
//!
//! [`FederateState`] holds the input port table and the MLAA ceiling.

pub mod config;
pub mod federate;
mod listener;
mod staa;
pub mod state;

pub use config::*;
pub use federate::*;
pub use state::*;
