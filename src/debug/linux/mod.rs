//! Linux ptrace backend
//!
//! Drives the target directly: launched under `PTRACE_TRACEME`, breakpoints
//! planted as `int3` through `/proc/PID/mem`, registers from
//! `PTRACE_GETREGS`. There is no disassembler here, so instructions are
//! rendered as raw bytes.

mod regs;

use std::collections::HashMap;
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::sys::ptrace::{self, Event, Options};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::analysis::loader::SymbolTable;
use crate::core::debugger::DebugError;
use crate::core::memory::ProcMemory;
use crate::debug::types::{
    BreakLocation, ForkMode, Instruction, RegisterFile, SessionSettings, StopReason,
};
use crate::debug::DebugControl;

const INT3: u8 = 0xcc;

/// Longest x86 instruction
const MAX_INSN_LEN: usize = 15;

pub struct PtraceDebugger {
    target: PathBuf,
    args: Vec<String>,
    pid: Option<Pid>,
    symbols: Option<SymbolTable>,
    load_bias: u64,
    /// Breakpoints requested before launch
    pending: Vec<BreakLocation>,
    /// Planted breakpoints: address -> original byte
    breakpoints: HashMap<u64, u8>,
    follow: ForkMode,
    /// Signal to deliver on the next resume
    pending_signal: Option<Signal>,
}

impl PtraceDebugger {
    pub fn new(target: &Path, args: &[String]) -> Self {
        let symbols = match SymbolTable::from_file(target) {
            Ok(table) => Some(table),
            Err(e) => {
                log::warn!("No symbols for {}: {}", target.display(), e);
                None
            }
        };

        Self {
            target: target.to_path_buf(),
            args: args.to_vec(),
            pid: None,
            symbols,
            load_bias: 0,
            pending: Vec::new(),
            breakpoints: HashMap::new(),
            follow: ForkMode::Child,
            pending_signal: None,
        }
    }

    fn live_pid(&self) -> Result<Pid, DebugError> {
        self.pid
            .ok_or_else(|| DebugError::terminated("The program is not being run."))
    }

    fn memory(&self) -> Result<ProcMemory, DebugError> {
        Ok(ProcMemory::new(self.live_pid()?.as_raw() as u32))
    }

    fn resolve(&self, location: &BreakLocation) -> Result<u64, DebugError> {
        match location {
            BreakLocation::Address(addr) => Ok(*addr),
            BreakLocation::Symbol { name, offset } => {
                let base = self
                    .symbols
                    .as_ref()
                    .and_then(|s| s.lookup(name))
                    .ok_or_else(|| DebugError::UnresolvedSymbol(name.clone()))?;
                Ok(base + self.load_bias + offset)
            }
        }
    }

    fn plant(&mut self, address: u64) -> Result<(), DebugError> {
        if self.breakpoints.contains_key(&address) {
            return Ok(());
        }
        let mem = self.memory()?;
        let original = mem.read(address, 1)?[0];
        mem.write(address, &[INT3])?;
        self.breakpoints.insert(address, original);
        log::debug!("Planted breakpoint at {:#x}", address);
        Ok(())
    }

    fn unplant(&mut self, address: u64) -> Result<(), DebugError> {
        if let Some(original) = self.breakpoints.remove(&address) {
            self.memory()?.write(address, &[original])?;
        }
        Ok(())
    }

    /// Restore every original byte in `pid` without forgetting the breakpoints
    fn lift_all(&self, pid: Pid) -> Result<(), DebugError> {
        let mem = ProcMemory::new(pid.as_raw() as u32);
        for (&address, &original) in &self.breakpoints {
            mem.write(address, &[original])?;
        }
        Ok(())
    }

    fn compute_load_bias(&mut self, pid: Pid) {
        let Some(symbols) = &self.symbols else {
            return;
        };
        if !symbols.is_pie {
            return;
        }

        let path = fs::canonicalize(&self.target).unwrap_or_else(|_| self.target.clone());
        let maps = match fs::read_to_string(format!("/proc/{}/maps", pid)) {
            Ok(maps) => maps,
            Err(e) => {
                log::warn!("Cannot read maps of {}: {}", pid, e);
                return;
            }
        };

        if let Some(base) = parse_load_base(&maps, &path.to_string_lossy()) {
            self.load_bias = base.saturating_sub(symbols.min_vaddr);
            log::debug!("Load bias {:#x}", self.load_bias);
        }
    }

    fn read_pc(&self, pid: Pid) -> Result<u64, DebugError> {
        Ok(regs::pc(&ptrace::getregs(pid)?))
    }

    fn read_sp(&self, pid: Pid) -> Result<u64, DebugError> {
        Ok(regs::sp(&ptrace::getregs(pid)?))
    }

    fn issue(&mut self, pid: Pid, step: bool) -> Result<(), DebugError> {
        let sig = self.pending_signal.take();
        if step {
            ptrace::step(pid, sig)?;
        } else {
            ptrace::cont(pid, sig)?;
        }
        Ok(())
    }

    /// Resume the target, stepping off a planted breakpoint first.
    fn resume(&mut self, step: bool) -> Result<StopReason, DebugError> {
        let pid = self.live_pid()?;
        let pc = self.read_pc(pid)?;

        if let Some(&original) = self.breakpoints.get(&pc) {
            let mem = self.memory()?;
            mem.write(pc, &[original])?;
            self.issue(pid, true)?;
            let stop = self.wait_event(true)?;
            if self.pid.is_some() {
                self.memory()?.write(pc, &[INT3])?;
            }
            if step || stop != StopReason::Stepped {
                return Ok(stop);
            }
        }

        let pid = self.live_pid()?;
        self.issue(pid, step)?;
        self.wait_event(step)
    }

    fn wait_event(&mut self, stepping: bool) -> Result<StopReason, DebugError> {
        loop {
            let pid = self.live_pid()?;
            match waitpid(pid, None)? {
                WaitStatus::Exited(_, code) => {
                    log::info!("Process {} exited with {}", pid, code);
                    self.pid = None;
                    return Ok(StopReason::Exited { code: Some(code) });
                }
                WaitStatus::Signaled(_, sig, _) => {
                    log::info!("Process {} killed by {}", pid, sig);
                    self.pid = None;
                    return Ok(StopReason::Signalled {
                        name: sig.as_str().to_string(),
                    });
                }
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                    if stepping {
                        return Ok(StopReason::Stepped);
                    }
                    let mut regs = ptrace::getregs(pid)?;
                    let address = regs::pc(&regs).wrapping_sub(1);
                    if self.breakpoints.contains_key(&address) {
                        regs::set_pc(&mut regs, address);
                        ptrace::setregs(pid, regs)?;
                        return Ok(StopReason::BreakpointHit { address });
                    }
                    return Ok(StopReason::Signal {
                        name: Signal::SIGTRAP.as_str().to_string(),
                    });
                }
                WaitStatus::Stopped(_, sig) if is_quiet_signal(sig) => {
                    log::trace!("Passing {} to {}", sig, pid);
                    self.pending_signal = Some(sig);
                    self.issue(pid, stepping)?;
                }
                WaitStatus::Stopped(_, sig) => {
                    log::debug!("Process {} received {}", pid, sig);
                    self.pending_signal = Some(sig);
                    return Ok(StopReason::Signal {
                        name: sig.as_str().to_string(),
                    });
                }
                WaitStatus::PtraceEvent(_, _, event)
                    if event == Event::PTRACE_EVENT_FORK as i32
                        || event == Event::PTRACE_EVENT_VFORK as i32 =>
                {
                    self.handle_fork(pid)?;
                    let current = self.live_pid()?;
                    self.issue(current, stepping)?;
                }
                WaitStatus::PtraceEvent(_, _, event)
                    if event == Event::PTRACE_EVENT_EXEC as i32 =>
                {
                    if !self.breakpoints.is_empty() {
                        let dropped = self.breakpoints.len();
                        log::warn!("Process {} exec'd, dropping {} breakpoints", pid, dropped);
                        self.breakpoints.clear();
                    }
                    self.issue(pid, stepping)?;
                }
                other => {
                    log::trace!("ignoring wait status {:?}", other);
                    self.issue(pid, stepping)?;
                }
            }
        }
    }

    fn handle_fork(&mut self, parent: Pid) -> Result<(), DebugError> {
        let child = Pid::from_raw(ptrace::getevent(parent)? as i32);
        // The new tracee starts with a SIGSTOP
        waitpid(child, None)?;

        match self.follow {
            ForkMode::Child => {
                log::info!("Following fork into {}", child);
                self.lift_all(parent)?;
                ptrace::detach(parent, None)?;
                self.pid = Some(child);
            }
            ForkMode::Parent => {
                log::debug!("Detaching fork child {}", child);
                self.lift_all(child)?;
                ptrace::detach(child, None)?;
            }
        }
        Ok(())
    }

    /// Bytes at `address`, as many as are readable up to `max`
    fn read_available(&mut self, address: u64, max: usize) -> Result<Vec<u8>, DebugError> {
        match self.read_memory(address, max) {
            Ok(bytes) => Ok(bytes),
            Err(DebugError::RegionUnmapped { address: end }) if end > address => {
                self.read_memory(address, (end - address) as usize)
            }
            Err(e) => Err(e),
        }
    }
}

impl DebugControl for PtraceDebugger {
    fn configure(&mut self, settings: &SessionSettings) -> Result<(), DebugError> {
        self.follow = settings.follow_fork;
        log::debug!(
            "ptrace backend ignores flavor={} radix={}",
            settings.flavor.as_str(),
            settings.output_radix
        );
        Ok(())
    }

    fn set_breakpoint(&mut self, location: &BreakLocation) -> Result<Option<u64>, DebugError> {
        if self.pid.is_none() {
            log::info!("Breakpoint at {} pending until launch", location);
            self.pending.push(location.clone());
            return Ok(None);
        }
        let address = self.resolve(location)?;
        self.plant(address)?;
        Ok(Some(address))
    }

    fn run(&mut self) -> Result<StopReason, DebugError> {
        let mut command = Command::new(&self.target);
        command.args(&self.args);
        unsafe {
            command.pre_exec(|| ptrace::traceme().map_err(std::io::Error::from));
        }

        let child = command.spawn().map_err(|e| DebugError::LaunchFailed {
            program: self.target.display().to_string(),
            reason: e.to_string(),
        })?;
        let pid = Pid::from_raw(child.id() as i32);
        log::info!("Launched {} as {}", self.target.display(), pid);

        // Stops with SIGTRAP once execve completes
        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            other => {
                return Err(DebugError::LaunchFailed {
                    program: self.target.display().to_string(),
                    reason: format!("unexpected first stop {:?}", other),
                })
            }
        }
        self.pid = Some(pid);

        // Fork events in both modes; the side not followed is cleaned and detached
        let options = Options::PTRACE_O_EXITKILL
            | Options::PTRACE_O_TRACEEXEC
            | Options::PTRACE_O_TRACEFORK
            | Options::PTRACE_O_TRACEVFORK;
        ptrace::setoptions(pid, options)?;

        self.compute_load_bias(pid);
        for location in std::mem::take(&mut self.pending) {
            let address = self.resolve(&location)?;
            self.plant(address)?;
        }

        self.resume(false)
    }

    fn run_until(&mut self, address: u64) -> Result<StopReason, DebugError> {
        let temporary = !self.breakpoints.contains_key(&address);
        self.plant(address)?;

        let stop = self.resume(false)?;
        if temporary && self.pid.is_some() {
            self.unplant(address)?;
        }

        Ok(match stop {
            StopReason::BreakpointHit { address: hit } if hit == address => {
                StopReason::LocationReached
            }
            other => other,
        })
    }

    fn step_instruction(&mut self) -> Result<StopReason, DebugError> {
        self.resume(true)
    }

    fn finish(&mut self) -> Result<StopReason, DebugError> {
        let pid = self.live_pid()?;
        let start_sp = self.read_sp(pid)?;

        loop {
            let pid = self.live_pid()?;
            let pc = self.read_pc(pid)?;
            let sp = self.read_sp(pid)?;
            let returning = is_return_opcode(&self.read_available(pc, 2)?) && sp >= start_sp;

            let stop = self.resume(true)?;
            if stop != StopReason::Stepped {
                return Ok(stop);
            }
            if returning {
                return Ok(StopReason::FunctionFinished);
            }
        }
    }

    fn pc(&mut self) -> Result<u64, DebugError> {
        let pid = self.live_pid()?;
        self.read_pc(pid)
    }

    fn registers(&mut self) -> Result<RegisterFile, DebugError> {
        let pid = self.live_pid()?;
        Ok(regs::register_file(&ptrace::getregs(pid)?))
    }

    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>, DebugError> {
        let mut bytes = self.memory()?.read(address, len)?;
        // Show original bytes under planted breakpoints
        for (&bp, &original) in &self.breakpoints {
            if bp >= address && bp - address < len as u64 {
                bytes[(bp - address) as usize] = original;
            }
        }
        Ok(bytes)
    }

    fn instruction_at(&mut self, address: u64) -> Result<Instruction, DebugError> {
        let bytes = self.read_available(address, MAX_INSN_LEN)?;
        let symbol = address
            .checked_sub(self.load_bias)
            .and_then(|a| self.symbols.as_ref().and_then(|s| s.symbolize(a)));

        Ok(Instruction {
            address,
            symbol,
            text: spaced_hex(&bytes),
        })
    }
}

impl Drop for PtraceDebugger {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            let _ = signal::kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
        }
    }
}

/// Signals passed straight through without stopping, like gdb's `nostop`
/// defaults
fn is_quiet_signal(sig: Signal) -> bool {
    matches!(
        sig,
        Signal::SIGCHLD
            | Signal::SIGWINCH
            | Signal::SIGALRM
            | Signal::SIGURG
            | Signal::SIGIO
            | Signal::SIGPROF
            | Signal::SIGVTALRM
    )
}

/// `ret`, `ret imm16`, far returns, and `rep ret`
fn is_return_opcode(bytes: &[u8]) -> bool {
    match bytes {
        [0xc3, ..] | [0xc2, ..] | [0xcb, ..] | [0xca, ..] => true,
        [0xf3, 0xc3, ..] | [0xf3, 0xc2, ..] => true,
        _ => false,
    }
}

/// Start address of the first mapping of `path` at file offset zero
fn parse_load_base(maps: &str, path: &str) -> Option<u64> {
    maps.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let range = fields.next()?;
            let _perms = fields.next()?;
            let offset = fields.next()?;
            let _dev = fields.next()?;
            let _inode = fields.next()?;
            let pathname = fields.next()?;
            if pathname != path || u64::from_str_radix(offset, 16).ok()? != 0 {
                return None;
            }
            let (start, _) = range.split_once('-')?;
            u64::from_str_radix(start, 16).ok()
        })
        .min()
}

fn spaced_hex(bytes: &[u8]) -> String {
    let encoded = hex::encode(bytes);
    encoded
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_opcodes() {
        assert!(is_return_opcode(&[0xc3]));
        assert!(is_return_opcode(&[0xc2, 0x04]));
        assert!(is_return_opcode(&[0xf3, 0xc3]));
        assert!(!is_return_opcode(&[0xf3]));
        assert!(!is_return_opcode(&[0xe8, 0x00]));
        assert!(!is_return_opcode(&[]));
    }

    #[test]
    fn test_quiet_signals() {
        assert!(is_quiet_signal(Signal::SIGCHLD));
        assert!(!is_quiet_signal(Signal::SIGSEGV));
        assert!(!is_quiet_signal(Signal::SIGTRAP));
    }

    #[test]
    fn test_parse_load_base() {
        let maps = "\
5555f000-55560000 r-xp 00001000 08:01 1234 /opt/run-aout
5555e000-5555f000 r--p 00000000 08:01 1234 /opt/run-aout
55561000-55562000 rw-p 00002000 08:01 1234 /opt/run-aout
f7d00000-f7d20000 r--p 00000000 08:01 99 /usr/lib32/libc.so.6
ffd00000-ffd21000 rw-p 00000000 00:00 0 [stack]
";
        assert_eq!(parse_load_base(maps, "/opt/run-aout"), Some(0x5555_e000));
        assert_eq!(parse_load_base(maps, "/usr/lib32/libc.so.6"), Some(0xf7d0_0000));
        assert_eq!(parse_load_base(maps, "/missing"), None);
    }

    #[test]
    fn test_spaced_hex() {
        assert_eq!(spaced_hex(&[0x55, 0x89, 0xe5]), "55 89 e5");
        assert_eq!(spaced_hex(&[]), "");
    }

    #[test]
    fn test_unlaunched_target_is_terminated() {
        let mut dbg = PtraceDebugger::new(Path::new("/nonexistent/target"), &[]);
        assert!(dbg.pc().unwrap_err().is_terminated());
        assert!(dbg.step_instruction().unwrap_err().is_terminated());
        assert_eq!(
            dbg.set_breakpoint(&BreakLocation::Address(0x1000)).unwrap(),
            None
        );
    }
}
