//! Steptrace - single-step tracer
//!
//! Drives a target under gdb (machine interface) or raw ptrace. Each stop is
//! classified by an address policy: frames in library or loader ranges are
//! finished, everything else is single-stepped with a full state dump.

pub mod analysis;
pub mod app;
pub mod core;
pub mod debug;
