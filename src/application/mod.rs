//! Orchestration services built on top of the engine gateway.

pub mod error;
pub mod preview;
pub mod queue;
