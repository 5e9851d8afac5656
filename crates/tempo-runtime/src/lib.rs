//! Tempo Runtime - Execution core of the deterministic reactor runtime
//!
//! This crate turns a static [`Program`] into a running system:
//! - [`EventQueue`] orders future events by superdense tag
//! - [`TagBarrier`] holds logical time while outside information is pending
//! - [`scheduler::Scheduler`] runs ready reactions level by level on a worker pool
//! - [`Environment`] owns the tag-advancement loop
//! - [`Coordination`] is the seam through which a federate joins a federation
//!
//! [`Runtime`] assembles environments and runs them to completion.

pub mod barrier;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordination;
pub mod environment;
pub mod event_queue;
pub mod logging;
pub mod program;
pub mod runtime;
pub mod scheduler;
pub mod worker;

pub use barrier::*;
pub use cli::*;
pub use config::*;
pub use context::*;
pub use coordination::*;
pub use environment::*;
pub use event_queue::*;
pub use logging::*;
pub use program::*;
pub use runtime::*;
pub use scheduler::{EdfPriorities, NoopPriority, ReactionStatus, Scheduler, ThreadPriority};
pub use worker::*;
