//! Debugger errors
//!
//! Every backend reports failures through [`DebugError`]. The session only
//! needs to tell two situations apart: a memory region that cannot be read
//! and a target that is gone. Everything else ends the session the same way.

use thiserror::Error;

/// Debugger-specific errors
#[derive(Error, Debug)]
pub enum DebugError {
    #[error("Cannot access memory at {address:#x}")]
    RegionUnmapped { address: u64 },

    #[error("Debug session terminated: {reason}")]
    SessionTerminated { reason: String },

    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Failed to launch {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("Unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DebugError {
    pub fn terminated(reason: impl Into<String>) -> Self {
        DebugError::SessionTerminated {
            reason: reason.into(),
        }
    }

    /// True when the target can no longer be inspected at all.
    pub fn is_terminated(&self) -> bool {
        matches!(self, DebugError::SessionTerminated { .. })
    }

    pub fn is_unmapped(&self) -> bool {
        matches!(self, DebugError::RegionUnmapped { .. })
    }
}

#[cfg(target_os = "linux")]
impl From<nix::Error> for DebugError {
    fn from(err: nix::Error) -> Self {
        match err {
            nix::Error::ESRCH => DebugError::terminated("no such process"),
            other => DebugError::Io(std::io::Error::from(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(DebugError::terminated("exited").is_terminated());
        assert!(DebugError::RegionUnmapped { address: 0x10 }.is_unmapped());
        assert!(!DebugError::Protocol("bad".into()).is_terminated());
    }

    #[test]
    fn test_error_display() {
        let err = DebugError::RegionUnmapped { address: 0xbfff_f000 };
        assert_eq!(err.to_string(), "Cannot access memory at 0xbffff000");

        let err = DebugError::CommandFailed {
            command: "-exec-finish".into(),
            message: "not meaningful".into(),
        };
        assert_eq!(err.to_string(), "Command `-exec-finish` failed: not meaningful");
    }
}
