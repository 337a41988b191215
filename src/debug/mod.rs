//! Debug module - Debugger control backends.
//!
//! Provides one control surface over two mechanisms:
//! - an external gdb driven through its machine interface
//! - direct ptrace control of the target (Linux/x86 only)

pub mod gdb;
pub mod types;

#[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
pub mod linux;

use crate::core::debugger::DebugError;
use types::{BreakLocation, Instruction, RegisterFile, SessionSettings, StopReason};

/// Platform-agnostic debugger control
pub trait DebugControl {
    /// Apply session settings before the target is launched
    fn configure(&mut self, settings: &SessionSettings) -> Result<(), DebugError>;

    /// Set a breakpoint, returning its address when already known
    fn set_breakpoint(&mut self, location: &BreakLocation) -> Result<Option<u64>, DebugError>;

    /// Launch the target and run until it first stops
    fn run(&mut self) -> Result<StopReason, DebugError>;

    /// Continue until execution reaches `address`
    fn run_until(&mut self, address: u64) -> Result<StopReason, DebugError>;

    /// Execute exactly one instruction
    fn step_instruction(&mut self) -> Result<StopReason, DebugError>;

    /// Run until the current function returns
    fn finish(&mut self) -> Result<StopReason, DebugError>;

    /// Evaluate the program counter
    fn pc(&mut self) -> Result<u64, DebugError>;

    /// Read the full register set
    fn registers(&mut self) -> Result<RegisterFile, DebugError>;

    /// Read `len` bytes of target memory
    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>, DebugError>;

    /// Render the instruction at `address`
    fn instruction_at(&mut self, address: u64) -> Result<Instruction, DebugError>;

    /// Debugger console output produced by execution commands since the
    /// last call, if the backend has any
    fn drain_console(&mut self) -> Option<String> {
        None
    }
}

impl<D: DebugControl + ?Sized> DebugControl for Box<D> {
    fn configure(&mut self, settings: &SessionSettings) -> Result<(), DebugError> {
        (**self).configure(settings)
    }

    fn set_breakpoint(&mut self, location: &BreakLocation) -> Result<Option<u64>, DebugError> {
        (**self).set_breakpoint(location)
    }

    fn run(&mut self) -> Result<StopReason, DebugError> {
        (**self).run()
    }

    fn run_until(&mut self, address: u64) -> Result<StopReason, DebugError> {
        (**self).run_until(address)
    }

    fn step_instruction(&mut self) -> Result<StopReason, DebugError> {
        (**self).step_instruction()
    }

    fn finish(&mut self) -> Result<StopReason, DebugError> {
        (**self).finish()
    }

    fn pc(&mut self) -> Result<u64, DebugError> {
        (**self).pc()
    }

    fn registers(&mut self) -> Result<RegisterFile, DebugError> {
        (**self).registers()
    }

    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>, DebugError> {
        (**self).read_memory(address, len)
    }

    fn instruction_at(&mut self, address: u64) -> Result<Instruction, DebugError> {
        (**self).instruction_at(address)
    }

    fn drain_console(&mut self) -> Option<String> {
        (**self).drain_console()
    }
}
