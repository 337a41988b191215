//! Memory - Target memory windows and process memory access
//!
//! A [`MemoryWindow`] is the 16-word slice of stack the trace prints around
//! the stack and frame pointers. [`ProcMemory`] reads and writes a traced
//! process through `/proc/PID/mem` for the ptrace backend.

use crate::core::debugger::DebugError;
use crate::debug::DebugControl;

/// Words per window
pub const WINDOW_WORDS: usize = 16;

/// Bytes per window word (`x/16wx`)
pub const WORD_SIZE: usize = 4;

/// Windows start this many bytes below their anchor register
pub const WINDOW_BACKOFF: u64 = 32;

/// Stack memory around an anchor register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWindow {
    /// Anchor label, e.g. `$esp`
    pub label: String,
    /// Address of the first word
    pub base: u64,
    pub words: Vec<u32>,
}

impl MemoryWindow {
    /// Decode little-endian 32-bit words
    pub fn from_bytes(label: impl Into<String>, base: u64, bytes: &[u8]) -> Self {
        let words = bytes
            .chunks_exact(WORD_SIZE)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self {
            label: label.into(),
            base,
            words,
        }
    }

    /// Rows of four words, each prefixed by its address
    pub fn rows(&self) -> impl Iterator<Item = (u64, &[u32])> {
        self.words
            .chunks(4)
            .enumerate()
            .map(move |(i, row)| (self.base + (i * 4 * WORD_SIZE) as u64, row))
    }
}

/// Read the window that starts [`WINDOW_BACKOFF`] bytes below `anchor`.
pub fn read_window<D: DebugControl + ?Sized>(
    debugger: &mut D,
    label: &str,
    anchor: u64,
) -> Result<MemoryWindow, DebugError> {
    let base = anchor
        .checked_sub(WINDOW_BACKOFF)
        .ok_or(DebugError::RegionUnmapped { address: anchor })?;
    let bytes = debugger.read_memory(base, WINDOW_WORDS * WORD_SIZE)?;
    Ok(MemoryWindow::from_bytes(label, base, &bytes))
}

/// Memory of a live process through `/proc/PID/mem`
#[cfg(target_os = "linux")]
pub struct ProcMemory {
    target_pid: u32,
}

#[cfg(target_os = "linux")]
impl ProcMemory {
    pub fn new(pid: u32) -> Self {
        Self { target_pid: pid }
    }

    fn open(&self, write: bool) -> Result<std::fs::File, DebugError> {
        let mem_path = format!("/proc/{}/mem", self.target_pid);
        std::fs::OpenOptions::new()
            .read(true)
            .write(write)
            .open(&mem_path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    DebugError::terminated(format!("process {} is gone", self.target_pid))
                }
                _ => DebugError::Io(e),
            })
    }

    /// Read exactly `len` bytes; a short read means the range is not mapped
    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, DebugError> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = self.open(false)?;
        file.seek(SeekFrom::Start(address))?;

        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        if filled < len {
            return Err(DebugError::RegionUnmapped {
                address: address + filled as u64,
            });
        }
        Ok(buffer)
    }

    pub fn write(&self, address: u64, data: &[u8]) -> Result<(), DebugError> {
        use std::io::{Seek, SeekFrom, Write};

        let mut file = self.open(true)?;
        file.seek(SeekFrom::Start(address))?;
        file.write_all(data).map_err(|e| match e.raw_os_error() {
            Some(nix::libc::EIO) | Some(nix::libc::EFAULT) => {
                DebugError::RegionUnmapped { address }
            }
            _ => DebugError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_from_bytes() {
        let bytes: Vec<u8> = (0u8..64).collect();
        let window = MemoryWindow::from_bytes("$esp", 0x1000, &bytes);
        assert_eq!(window.words.len(), WINDOW_WORDS);
        assert_eq!(window.words[0], 0x0302_0100);

        let rows: Vec<_> = window.rows().collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].0, 0x1010);
        assert_eq!(rows[3].1.len(), 4);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_memory_reads_self() {
        let value: u64 = 0x1122_3344_5566_7788;
        let mem = ProcMemory::new(std::process::id());
        let bytes = mem.read(&value as *const u64 as u64, 8).unwrap();
        assert_eq!(bytes, value.to_le_bytes());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_memory_unmapped() {
        let mem = ProcMemory::new(std::process::id());
        let err = mem.read(0, 16).unwrap_err();
        assert!(err.is_unmapped());
    }
}
