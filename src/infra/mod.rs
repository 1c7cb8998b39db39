//! Infrastructure adapters: the engine child process and runtime bootstrap.

pub mod engine_process;
pub mod error;
pub mod telemetry;
