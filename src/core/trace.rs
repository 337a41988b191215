//! Trace log and state dumps
//!
//! The trace log is opened once when the session starts and receives every
//! dump. A dump is the stop line, the instruction at pc, the register file
//! and two stack windows.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::debugger::DebugError;
use crate::core::memory::{read_window, MemoryWindow};
use crate::debug::types::{Instruction, RegisterFile};
use crate::debug::DebugControl;

/// Where the trace goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    File(PathBuf),
}

impl FromStr for LogDestination {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s == "stdout" {
            LogDestination::Stdout
        } else {
            LogDestination::File(PathBuf::from(s))
        })
    }
}

/// Line-oriented trace writer
pub struct TraceLog<W: Write> {
    out: W,
}

impl TraceLog<Box<dyn Write>> {
    /// Open the destination; files are appended to, never truncated.
    pub fn open(destination: &LogDestination) -> io::Result<Self> {
        let out: Box<dyn Write> = match destination {
            LogDestination::Stdout => Box::new(io::stdout()),
            LogDestination::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Box::new(BufWriter::new(file))
            }
        };
        Ok(Self { out })
    }
}

impl<W: Write> TraceLog<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)
    }

    pub fn instruction(&mut self, insn: &Instruction) -> io::Result<()> {
        match &insn.symbol {
            Some(sym) => writeln!(self.out, "=> {:#010x} <{}>:\t{}", insn.address, sym, insn.text),
            None => writeln!(self.out, "=> {:#010x}:\t{}", insn.address, insn.text),
        }
    }

    pub fn registers(&mut self, regs: &RegisterFile) -> io::Result<()> {
        for reg in regs.iter() {
            writeln!(self.out, "{}: {:#010x}", reg.name, reg.value)?;
        }
        Ok(())
    }

    pub fn window(&mut self, window: &MemoryWindow) -> io::Result<()> {
        write!(self.out, "dump {}:", window.label)?;
        for (address, row) in window.rows() {
            write!(self.out, "\n{:#010x}:", address)?;
            for word in row {
                write!(self.out, "\t{:#010x}", word)?;
            }
        }
        writeln!(self.out)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// What a dump managed to write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub pc: u64,
    /// Labels of the windows that were written
    pub windows: Vec<String>,
}

/// Dump the current state. Window failures are swallowed; everything else
/// propagates.
pub fn dump_state<D, W>(
    debugger: &mut D,
    trace: &mut TraceLog<W>,
) -> Result<DumpSummary, DebugError>
where
    D: DebugControl + ?Sized,
    W: Write,
{
    let pc = debugger.pc()?;
    trace.line(&format!("Stopped at {:#010x}", pc))?;

    let insn = debugger.instruction_at(pc)?;
    trace.instruction(&insn)?;

    let regs = debugger.registers()?;
    trace.registers(&regs)?;

    let mut summary = DumpSummary {
        pc,
        windows: Vec::new(),
    };

    let anchors = [
        (stack_label(&regs), regs.sp()),
        (frame_label(&regs), regs.fp()),
    ];
    for (label, anchor) in anchors {
        let Some(anchor) = anchor else {
            log::debug!("no {} register, skipping window", label);
            continue;
        };
        match read_window(debugger, &label, anchor) {
            Ok(window) => {
                trace.window(&window)?;
                summary.windows.push(label);
            }
            Err(e) => log::debug!("skipping {} window: {}", label, e),
        }
    }

    Ok(summary)
}

fn stack_label(regs: &RegisterFile) -> String {
    alias_label(regs, &["esp", "rsp"], "$sp")
}

fn frame_label(regs: &RegisterFile) -> String {
    alias_label(regs, &["ebp", "rbp"], "$fp")
}

fn alias_label(regs: &RegisterFile, names: &[&str], fallback: &str) -> String {
    names
        .iter()
        .find(|n| regs.get(n).is_some())
        .map(|n| format!("${}", n))
        .unwrap_or_else(|| fallback.to_string())
}
