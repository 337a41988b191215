//! Core module - Errors, memory windows and the trace log
//!
//! Everything the session needs regardless of which backend drives the target.

pub mod debugger;
pub mod memory;
pub mod trace;

pub use debugger::DebugError;
