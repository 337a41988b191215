//! a.out header inspection
//!
//! The interpreters traced by this tool load legacy Linux a.out images. The
//! 32-byte header is eight little-endian words; `a_info` packs the magic
//! (low 16 bits), machine type (bits 16..24) and flags (bits 24..32).

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

pub const HEADER_SIZE: usize = 32;

/// Object file or impure executable
pub const OMAGIC: u32 = 0o407;
/// Pure executable
pub const NMAGIC: u32 = 0o410;
/// Demand-paged executable
pub const ZMAGIC: u32 = 0o413;
/// Demand-paged executable with the header in the text
pub const QMAGIC: u32 = 0o314;

pub const M_386: u32 = 100;

#[derive(Error, Debug)]
pub enum AoutError {
    #[error("File too small for an a.out header ({0} bytes)")]
    TooSmall(usize),
    #[error("Unsupported executable format: expected OMAGIC (0x107), NMAGIC (0x108), ZMAGIC (0x10b) or QMAGIC (0xcc), got {0:#x}")]
    UnsupportedMagic(u32),
    #[error("Unsupported architecture: expected M_386 (0x64), got {0:#x}")]
    UnsupportedMachine(u32),
    #[error("Unsupported flags: expected 0 (0x0), got {0:#x}")]
    UnsupportedFlags(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AoutHeader {
    pub info: u32,
    pub text: u32,
    pub data: u32,
    pub bss: u32,
    pub syms: u32,
    pub entry: u32,
    pub trsize: u32,
    pub drsize: u32,
}

impl AoutHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, AoutError> {
        if bytes.len() < HEADER_SIZE {
            return Err(AoutError::TooSmall(bytes.len()));
        }
        let word = |i: usize| {
            let o = i * 4;
            u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]])
        };
        Ok(Self {
            info: word(0),
            text: word(1),
            data: word(2),
            bss: word(3),
            syms: word(4),
            entry: word(5),
            trsize: word(6),
            drsize: word(7),
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AoutError> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        File::open(path)?
            .take(HEADER_SIZE as u64)
            .read_to_end(&mut buf)?;
        Self::parse(&buf)
    }

    pub fn magic(&self) -> u32 {
        self.info & 0xffff
    }

    pub fn machine(&self) -> u32 {
        (self.info >> 16) & 0xff
    }

    pub fn flags(&self) -> u32 {
        (self.info >> 24) & 0xff
    }

    /// Accept the formats an i386 a.out loader can map
    pub fn validate(&self) -> Result<(), AoutError> {
        if ![OMAGIC, NMAGIC, ZMAGIC, QMAGIC].contains(&self.magic()) {
            return Err(AoutError::UnsupportedMagic(self.magic()));
        }
        if self.machine() != M_386 {
            return Err(AoutError::UnsupportedMachine(self.machine()));
        }
        if self.flags() != 0 {
            return Err(AoutError::UnsupportedFlags(self.flags()));
        }
        Ok(())
    }

    pub fn magic_name(&self) -> &'static str {
        match self.magic() {
            OMAGIC => "OMAGIC",
            NMAGIC => "NMAGIC",
            ZMAGIC => "ZMAGIC",
            QMAGIC => "QMAGIC",
            _ => "unknown",
        }
    }
}

impl fmt::Display for AoutHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "header size : {}", HEADER_SIZE)?;
        writeln!(f, "magic       : {:#x} ({})", self.magic(), self.magic_name())?;
        writeln!(f, "machine     : {:#x}", self.machine())?;
        writeln!(f, "flags       : {:#x}", self.flags())?;
        writeln!(f, "sizeof(text): {:#x} ({})", self.text, self.text)?;
        writeln!(f, "sizeof(data): {:#x} ({})", self.data, self.data)?;
        writeln!(f, "sizeof(bss) : {:#x} ({})", self.bss, self.bss)?;
        writeln!(f, "sizeof(syms): {:#x} ({})", self.syms, self.syms)?;
        writeln!(f, "entry-point : {:#x} ({})", self.entry, self.entry)?;
        writeln!(f, "sizeof(trel): {:#x} ({})", self.trsize, self.trsize)?;
        write!(f, "sizeof(drel): {:#x} ({})", self.drsize, self.drsize)
    }
}
