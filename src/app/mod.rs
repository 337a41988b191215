//! App module - configuration and the session driver
//!
//! Provides the trace configuration built from the command line and the
//! state machine that runs a session against a debugger backend.

mod config;
mod session;

pub use config::*;
pub use session::*;
