//! Common types for debugging functionality.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Why the target last stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A single instruction was executed
    Stepped,
    /// A breakpoint was hit
    BreakpointHit { address: u64 },
    /// An `until` location was reached
    LocationReached,
    /// The current frame returned
    FunctionFinished,
    /// The target received a signal and is still alive
    Signal { name: String },
    /// The target exited normally
    Exited { code: Option<i32> },
    /// The target was killed by a signal
    Signalled { name: String },
    /// Anything the backend could not classify
    Unknown(String),
}

impl StopReason {
    /// True when the target no longer exists after this stop.
    pub fn is_exit(&self) -> bool {
        matches!(self, StopReason::Exited { .. } | StopReason::Signalled { .. })
    }
}

/// Debug session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Configuring,
    Running,
    Stepping,
    Finished,
}

/// A single named register value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub name: String,
    pub value: u64,
}

/// Register set in the order reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
    registers: Vec<Register>,
}

const PC_ALIASES: &[&str] = &["eip", "rip", "pc"];
const SP_ALIASES: &[&str] = &["esp", "rsp", "sp"];
const FP_ALIASES: &[&str] = &["ebp", "rbp", "fp"];

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: u64) {
        self.registers.push(Register {
            name: name.into(),
            value,
        });
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.registers
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value)
    }

    fn first_of(&self, aliases: &[&str]) -> Option<u64> {
        aliases.iter().find_map(|name| self.get(name))
    }

    /// Program counter
    pub fn pc(&self) -> Option<u64> {
        self.first_of(PC_ALIASES)
    }

    /// Stack pointer
    pub fn sp(&self) -> Option<u64> {
        self.first_of(SP_ALIASES)
    }

    /// Frame pointer
    pub fn fp(&self) -> Option<u64> {
        self.first_of(FP_ALIASES)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl FromIterator<(String, u64)> for RegisterFile {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut regs = RegisterFile::new();
        for (name, value) in iter {
            regs.push(name, value);
        }
        regs
    }
}

/// A single instruction as rendered by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u64,
    /// `func+offset`, when the backend knows it
    pub symbol: Option<String>,
    pub text: String,
}

/// Fork-follow mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForkMode {
    Parent,
    #[default]
    Child,
}

impl ForkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForkMode::Parent => "parent",
            ForkMode::Child => "child",
        }
    }
}

impl FromStr for ForkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(ForkMode::Parent),
            "child" => Ok(ForkMode::Child),
            other => Err(format!("unknown fork mode `{}` (expected parent or child)", other)),
        }
    }
}

/// Disassembly syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flavor {
    #[default]
    Intel,
    Att,
}

impl Flavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Intel => "intel",
            Flavor::Att => "att",
        }
    }
}

impl FromStr for Flavor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intel" => Ok(Flavor::Intel),
            "att" => Ok(Flavor::Att),
            other => Err(format!("unknown flavor `{}` (expected intel or att)", other)),
        }
    }
}

/// Settings applied once while the session is configuring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub pagination: bool,
    pub follow_fork: ForkMode,
    pub flavor: Flavor,
    pub output_radix: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pagination: false,
            follow_fork: ForkMode::Child,
            flavor: Flavor::Intel,
            output_radix: 16,
        }
    }
}

/// Where to place the session breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakLocation {
    /// `symbol + offset`
    Symbol { name: String, offset: u64 },
    /// Absolute address
    Address(u64),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LocationError {
    #[error("Empty location")]
    Empty,
    #[error("Invalid address `{0}`")]
    InvalidAddress(String),
    #[error("Invalid offset `{0}`")]
    InvalidOffset(String),
}

impl FromStr for BreakLocation {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LocationError::Empty);
        }

        if let Some(addr) = s.strip_prefix('*') {
            return parse_address(addr)
                .map(BreakLocation::Address)
                .map_err(|_| LocationError::InvalidAddress(addr.trim().to_string()));
        }

        if s.starts_with(|c: char| c.is_ascii_digit()) {
            return parse_address(s)
                .map(BreakLocation::Address)
                .map_err(|_| LocationError::InvalidAddress(s.to_string()));
        }

        match s.split_once('+') {
            Some((name, offset)) => {
                let offset = parse_address(offset)
                    .map_err(|_| LocationError::InvalidOffset(offset.trim().to_string()))?;
                Ok(BreakLocation::Symbol {
                    name: name.trim().to_string(),
                    offset,
                })
            }
            None => Ok(BreakLocation::Symbol {
                name: s.to_string(),
                offset: 0,
            }),
        }
    }
}

impl fmt::Display for BreakLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakLocation::Symbol { name, offset: 0 } => write!(f, "{}", name),
            BreakLocation::Symbol { name, offset } => write!(f, "{}+{:#x}", name, offset),
            BreakLocation::Address(addr) => write!(f, "*{:#x}", addr),
        }
    }
}

/// Parse an address string (supports 0x prefix and decimal)
pub fn parse_address(s: &str) -> Result<u64, std::num::ParseIntError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}
