//! Trace configuration
//!
//! Everything the original session hard-coded, gathered into one struct that
//! the command line fills in.

use std::path::PathBuf;
use std::str::FromStr;

use crate::analysis::policy::AddressPolicy;
use crate::app::session::LaunchPlan;
use crate::core::debugger::DebugError;
use crate::core::trace::LogDestination;
use crate::debug::gdb::GdbDebugger;
use crate::debug::DebugControl;

/// Which mechanism drives the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Gdb,
    Ptrace,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gdb" => Ok(BackendKind::Gdb),
            "ptrace" => Ok(BackendKind::Ptrace),
            other => Err(format!("unknown backend `{}` (expected gdb or ptrace)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub target: PathBuf,
    pub args: Vec<String>,
    pub log: LogDestination,
    pub backend: BackendKind,
    pub gdb: PathBuf,
    /// Terminal for the target under gdb; `None` picks the controlling tty
    pub tty: Option<PathBuf>,
    pub policy: AddressPolicy,
    pub plan: LaunchPlan,
}

impl TraceConfig {
    /// Instantiate the selected backend
    pub fn connect(&self) -> Result<Box<dyn DebugControl>, DebugError> {
        match self.backend {
            BackendKind::Gdb => {
                let mut gdb = GdbDebugger::spawn(&self.gdb, &self.target, &self.args)?;
                if let Some(tty) = &self.tty {
                    gdb.set_inferior_tty(tty);
                }
                Ok(Box::new(gdb))
            }
            BackendKind::Ptrace => self.connect_ptrace(),
        }
    }

    #[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
    fn connect_ptrace(&self) -> Result<Box<dyn DebugControl>, DebugError> {
        use crate::debug::linux::PtraceDebugger;
        Ok(Box::new(PtraceDebugger::new(&self.target, &self.args)))
    }

    #[cfg(not(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64"))))]
    fn connect_ptrace(&self) -> Result<Box<dyn DebugControl>, DebugError> {
        Err(DebugError::LaunchFailed {
            program: self.target.display().to_string(),
            reason: "the ptrace backend needs Linux on x86".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind() {
        assert_eq!("gdb".parse::<BackendKind>(), Ok(BackendKind::Gdb));
        assert_eq!("ptrace".parse::<BackendKind>(), Ok(BackendKind::Ptrace));
        assert!("lldb".parse::<BackendKind>().is_err());
    }
}
