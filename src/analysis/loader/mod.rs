//! Binary Loader Module
//!
//! Parses the target ELF with goblin and keeps what the ptrace backend needs:
//! - Function symbols, for breakpoint locations and instruction labels
//! - Whether the image is position independent
//! - The lowest loadable virtual address, to compute the load bias

use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

/// Information about a function found in the binary
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// Function name
    pub name: String,
    /// Link-time virtual address
    pub address: u64,
    /// Size in bytes (0 if unknown)
    pub size: u64,
}

/// Function symbols of an ELF image
#[derive(Debug, Default)]
pub struct SymbolTable {
    /// Sorted by address
    functions: Vec<FunctionInfo>,
    /// `ET_DYN` images are relocated at load time
    pub is_pie: bool,
    /// Lowest `PT_LOAD` virtual address
    pub min_vaddr: u64,
}

impl SymbolTable {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(&path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 || data[0..4] != [0x7F, b'E', b'L', b'F'] {
            return Err(anyhow!("Not an ELF image"));
        }
        let elf = goblin::elf::Elf::parse(data)?;

        let mut functions = Vec::new();
        for sym in &elf.syms {
            if sym.st_type() == goblin::elf::sym::STT_FUNC && sym.st_value != 0 {
                let name = elf.strtab.get_at(sym.st_name).unwrap_or("").to_string();
                if !name.is_empty() {
                    functions.push(FunctionInfo {
                        name,
                        address: sym.st_value,
                        size: sym.st_size,
                    });
                }
            }
        }

        // Dynamic symbols
        for sym in &elf.dynsyms {
            if sym.st_type() == goblin::elf::sym::STT_FUNC && sym.st_value != 0 {
                let name = elf.dynstrtab.get_at(sym.st_name).unwrap_or("").to_string();
                if !name.is_empty() && !functions.iter().any(|f| f.address == sym.st_value) {
                    functions.push(FunctionInfo {
                        name,
                        address: sym.st_value,
                        size: sym.st_size,
                    });
                }
            }
        }
        functions.sort_by_key(|f| f.address);

        let min_vaddr = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == goblin::elf::program_header::PT_LOAD)
            .map(|ph| ph.p_vaddr & !0xfff)
            .min()
            .unwrap_or(0);

        Ok(Self {
            functions,
            is_pie: elf.header.e_type == goblin::elf::header::ET_DYN,
            min_vaddr,
        })
    }

    /// Link-time address of a function
    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.functions
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.address)
    }

    /// `name+offset` for a link-time address inside a known function
    pub fn symbolize(&self, address: u64) -> Option<String> {
        let idx = self.functions.partition_point(|f| f.address <= address);
        let func = self.functions[..idx].last()?;
        let offset = address - func.address;
        if func.size != 0 && offset >= func.size {
            return None;
        }
        Some(if offset == 0 {
            func.name.clone()
        } else {
            format!("{}+{}", func.name, offset)
        })
    }

    pub fn functions(&self) -> &[FunctionInfo] {
        &self.functions
    }
}
