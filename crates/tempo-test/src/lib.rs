//! Tempo Test Harness - Federation scenarios and shared fixtures
//!
//! This crate provides:
//! - A scripted in-memory coordinator ([`MockRti`])
//! - Program builders used by scenario tests, benches and the demo binary
//! - A runtime builder that wires a federate to a coordinator link

pub mod fixtures;
pub mod mock_rti;

pub use fixtures::*;
pub use mock_rti::*;
