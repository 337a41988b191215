//! GDB backend - drives an external gdb through its machine interface.
//!
//! gdb runs as a child process with `--interpreter=mi2`. Every command is
//! sent with a numeric token and answered by a result record carrying the
//! same token. Execution commands answer `^running` first and report the
//! next stop later with an `*stopped` async record.
//!
//! The target gets its own terminal through `-inferior-tty-set`, so its
//! output never reaches the MI pipe.

pub mod mi;

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::core::debugger::DebugError;
use crate::debug::types::{
    parse_address, BreakLocation, Instruction, RegisterFile, SessionSettings, StopReason,
};
use crate::debug::DebugControl;
use mi::{parse_record, Record, ResultClass, Results, StreamKind, Value};

/// Terminal handed to the target when none is configured
pub const DEFAULT_INFERIOR_TTY: &str = "/dev/tty";

/// Answer to a synchronous MI command
#[derive(Debug, Default)]
struct Reply {
    results: Results,
    console: String,
}

/// gdb child process speaking MI
pub struct GdbDebugger {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    target: PathBuf,
    args: Vec<String>,
    inferior_tty: PathBuf,
    next_token: u32,
    /// Cached `-data-list-register-names`
    register_names: Option<Vec<String>>,
    /// `*stopped` seen while waiting for a result record
    pending_stop: Option<Results>,
    /// Console output of execution commands, until drained
    console: String,
    alive: bool,
}

impl GdbDebugger {
    /// Start gdb on `target`; the target itself is launched by [`DebugControl::run`].
    pub fn spawn(gdb: &Path, target: &Path, args: &[String]) -> Result<Self, DebugError> {
        log::info!("Starting {} on {}", gdb.display(), target.display());

        let mut child = Command::new(gdb)
            .arg("--nx")
            .arg("--quiet")
            .arg("--interpreter=mi2")
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| DebugError::LaunchFailed {
                program: gdb.display().to_string(),
                reason: e.to_string(),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DebugError::Protocol("gdb stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DebugError::Protocol("gdb stdout unavailable".into()))?;

        let mut gdb = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            target: target.to_path_buf(),
            args: args.to_vec(),
            inferior_tty: default_inferior_tty(),
            next_token: 1,
            register_names: None,
            pending_stop: None,
            console: String::new(),
            alive: false,
        };

        // Banner and notifications up to the first prompt
        gdb.wait_prompt()?;
        Ok(gdb)
    }

    /// Terminal the target is started on
    pub fn set_inferior_tty(&mut self, tty: &Path) {
        self.inferior_tty = tty.to_path_buf();
    }

    fn read_record(&mut self) -> Result<Record, DebugError> {
        loop {
            let mut line = String::new();
            if self.stdout.read_line(&mut line)? == 0 {
                self.alive = false;
                return Err(DebugError::terminated("gdb closed its output"));
            }
            if line.trim().is_empty() {
                continue;
            }
            log::trace!("mi <- {}", line.trim_end());
            match parse_record(&line) {
                Ok(record) => return Ok(record),
                // Output of a target that shares gdb's terminal
                Err(e) => log::debug!("skipping non-MI line `{}`: {}", line.trim_end(), e),
            }
        }
    }

    fn wait_prompt(&mut self) -> Result<(), DebugError> {
        loop {
            if let Record::Prompt = self.read_record()? {
                return Ok(());
            }
        }
    }

    fn send(&mut self, command: &str) -> Result<u32, DebugError> {
        let token = self.next_token;
        self.next_token += 1;
        log::trace!("mi -> {}{}", token, command);
        writeln!(self.stdin, "{}{}", token, command)?;
        self.stdin.flush()?;
        Ok(token)
    }

    /// Send a command and collect records up to its result record.
    fn command(&mut self, command: &str) -> Result<Reply, DebugError> {
        let token = self.send(command)?;
        let mut reply = Reply::default();

        loop {
            match self.read_record()? {
                Record::Result {
                    token: Some(t),
                    class,
                    results,
                } if t == token => {
                    return match class {
                        ResultClass::Error => {
                            let message = results.get_str("msg").unwrap_or("unknown error");
                            Err(classify_error(command, message))
                        }
                        ResultClass::Exit => {
                            self.alive = false;
                            Err(DebugError::terminated("gdb exited"))
                        }
                        _ => {
                            reply.results = results;
                            Ok(reply)
                        }
                    };
                }
                Record::Stream {
                    kind: StreamKind::Console,
                    text,
                } => reply.console.push_str(&text),
                Record::Async { class, results, .. } if class == "stopped" => {
                    self.note_stop(&results);
                    self.pending_stop = Some(results);
                }
                other => log::trace!("ignoring {:?}", other),
            }
        }
    }

    /// Run an execution command and block until the target stops again.
    fn exec(&mut self, command: &str) -> Result<StopReason, DebugError> {
        if !self.alive && command != "-exec-run" {
            return Err(DebugError::terminated("The program is not being run."));
        }

        self.pending_stop = None;
        let reply = self.command(command)?;
        self.console.push_str(&reply.console);

        let results = match self.pending_stop.take() {
            Some(results) => results,
            None => loop {
                match self.read_record()? {
                    Record::Async { class, results, .. } if class == "stopped" => {
                        self.note_stop(&results);
                        break results;
                    }
                    Record::Stream {
                        kind: StreamKind::Console,
                        text,
                    } => self.console.push_str(&text),
                    other => log::trace!("ignoring {:?}", other),
                }
            },
        };

        let reason = stop_reason(&results);
        log::debug!("{} stopped: {:?}", command, reason);
        Ok(reason)
    }

    fn note_stop(&mut self, results: &Results) {
        self.alive = !stop_reason(results).is_exit();
    }

    fn ensure_alive(&self) -> Result<(), DebugError> {
        if self.alive {
            Ok(())
        } else {
            Err(DebugError::terminated("No registers."))
        }
    }

    fn register_names(&mut self) -> Result<Vec<String>, DebugError> {
        if let Some(names) = &self.register_names {
            return Ok(names.clone());
        }

        let reply = self.command("-data-list-register-names")?;
        let names: Vec<String> = reply
            .results
            .get("register-names")
            .and_then(Value::as_list)
            .ok_or_else(|| DebugError::Protocol("missing register-names".into()))?
            .iter()
            .map(|v| v.as_str().unwrap_or("").to_string())
            .collect();

        self.register_names = Some(names.clone());
        Ok(names)
    }
}

impl DebugControl for GdbDebugger {
    fn configure(&mut self, settings: &SessionSettings) -> Result<(), DebugError> {
        let pagination = if settings.pagination { "on" } else { "off" };
        self.command(&format!("-gdb-set pagination {}", pagination))?;
        self.command("-gdb-set confirm off")?;
        self.command(&format!(
            "-gdb-set follow-fork-mode {}",
            settings.follow_fork.as_str()
        ))?;
        self.command(&format!(
            "-gdb-set disassembly-flavor {}",
            settings.flavor.as_str()
        ))?;
        self.command(&format!("-gdb-set output-radix {}", settings.output_radix))?;
        Ok(())
    }

    fn set_breakpoint(&mut self, location: &BreakLocation) -> Result<Option<u64>, DebugError> {
        let spec = match location {
            BreakLocation::Symbol { name, offset: 0 } => name.clone(),
            BreakLocation::Symbol { name, offset } => format!("*{}+{}", name, offset),
            BreakLocation::Address(addr) => format!("*{:#x}", addr),
        };

        let reply = self.command(&format!("-break-insert {}", spec))?;
        let address = reply
            .results
            .get("bkpt")
            .and_then(|b| b.get_str("addr"))
            .and_then(|a| parse_gdb_integer(a).ok());

        log::info!("Breakpoint at {} ({:?})", location, address);
        Ok(address)
    }

    fn run(&mut self) -> Result<StopReason, DebugError> {
        let tty = self.inferior_tty.to_string_lossy().into_owned();
        self.command(&format!("-inferior-tty-set {}", mi_string(&tty)))?;

        if !self.args.is_empty() {
            let quoted: Vec<String> = self.args.iter().map(|a| quote_arg(a)).collect();
            self.command(&format!("-exec-arguments {}", quoted.join(" ")))?;
        }

        log::info!("Running {} {:?}", self.target.display(), self.args);
        self.alive = true;
        self.exec("-exec-run")
    }

    fn run_until(&mut self, address: u64) -> Result<StopReason, DebugError> {
        self.exec(&format!("-exec-until *{:#x}", address))
    }

    fn step_instruction(&mut self) -> Result<StopReason, DebugError> {
        self.exec("-exec-step-instruction")
    }

    fn finish(&mut self) -> Result<StopReason, DebugError> {
        self.exec("-exec-finish")
    }

    fn pc(&mut self) -> Result<u64, DebugError> {
        self.ensure_alive()?;
        let reply = self.command("-data-evaluate-expression \"(unsigned long)$pc\"")?;
        let value = reply
            .results
            .get_str("value")
            .ok_or_else(|| DebugError::Protocol("missing value".into()))?;
        parse_gdb_integer(value)
    }

    fn registers(&mut self) -> Result<RegisterFile, DebugError> {
        self.ensure_alive()?;
        let names = self.register_names()?;
        let reply = self.command("-data-list-register-values x")?;
        let values = reply
            .results
            .get("register-values")
            .and_then(Value::as_list)
            .ok_or_else(|| DebugError::Protocol("missing register-values".into()))?;
        Ok(collect_registers(&names, values))
    }

    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>, DebugError> {
        self.ensure_alive()?;
        let reply = self.command(&format!("-data-read-memory-bytes {:#x} {}", address, len))?;
        let blocks = reply
            .results
            .get("memory")
            .and_then(Value::as_list)
            .ok_or_else(|| DebugError::Protocol("missing memory".into()))?;
        decode_memory(address, len, blocks)
    }

    fn drain_console(&mut self) -> Option<String> {
        if self.console.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.console))
        }
    }

    fn instruction_at(&mut self, address: u64) -> Result<Instruction, DebugError> {
        self.ensure_alive()?;
        let reply = self.command(&format!(
            "-data-disassemble -s {:#x} -e {:#x} -- 0",
            address,
            address + 1
        ))?;
        let insn = reply
            .results
            .get("asm_insns")
            .and_then(Value::as_list)
            .and_then(|l| l.first())
            .ok_or(DebugError::RegionUnmapped { address })?;

        let symbol = insn.get_str("func-name").map(|func| {
            match insn.get_str("offset").and_then(|o| parse_gdb_integer(o).ok()) {
                Some(off) if off != 0 => format!("{}+{}", func, off),
                _ => func.to_string(),
            }
        });

        Ok(Instruction {
            address: insn
                .get_str("address")
                .and_then(|a| parse_gdb_integer(a).ok())
                .unwrap_or(address),
            symbol,
            text: insn.get_str("inst").unwrap_or("").to_string(),
        })
    }
}

impl Drop for GdbDebugger {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "-gdb-exit");
        let _ = self.stdin.flush();
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Map a gdb error message to the session's error kinds
fn classify_error(command: &str, message: &str) -> DebugError {
    if let Some(rest) = message.strip_prefix("Cannot access memory at address ") {
        let address = parse_gdb_integer(rest.trim()).unwrap_or(0);
        return DebugError::RegionUnmapped { address };
    }

    const TERMINATED: &[&str] = &[
        "No registers.",
        "The program is not being run.",
        "not being run",
        "No thread selected.",
    ];
    if TERMINATED.iter().any(|m| message.contains(m)) {
        return DebugError::terminated(message);
    }

    DebugError::CommandFailed {
        command: command.to_string(),
        message: message.to_string(),
    }
}

fn stop_reason(results: &Results) -> StopReason {
    match results.get_str("reason") {
        Some("end-stepping-range") => StopReason::Stepped,
        Some("breakpoint-hit") => StopReason::BreakpointHit {
            address: results
                .get("frame")
                .and_then(|f| f.get_str("addr"))
                .and_then(|a| parse_gdb_integer(a).ok())
                .unwrap_or(0),
        },
        Some("location-reached") => StopReason::LocationReached,
        Some("function-finished") => StopReason::FunctionFinished,
        Some("signal-received") => StopReason::Signal {
            name: results.get_str("signal-name").unwrap_or("?").to_string(),
        },
        Some("exited-normally") => StopReason::Exited { code: Some(0) },
        Some("exited") => StopReason::Exited {
            code: results
                .get_str("exit-code")
                .and_then(|c| i32::from_str_radix(c, 8).ok()),
        },
        Some("exited-signalled") => StopReason::Signalled {
            name: results.get_str("signal-name").unwrap_or("?").to_string(),
        },
        Some(other) => StopReason::Unknown(other.to_string()),
        None => StopReason::Unknown(String::new()),
    }
}

/// `/dev/tty` when this process has a controlling terminal, else `/dev/null`
fn default_inferior_tty() -> PathBuf {
    let usable = OpenOptions::new()
        .read(true)
        .write(true)
        .open(DEFAULT_INFERIOR_TTY)
        .is_ok();
    if usable {
        PathBuf::from(DEFAULT_INFERIOR_TTY)
    } else {
        PathBuf::from("/dev/null")
    }
}

/// Parse an integer as gdb prints it in any output radix: `0x8048400`,
/// `134513664`, `01002002000`, or with a cast and a trailing symbol such as
/// `(void (*)()) 0x8048400 <main+4>`.
fn parse_gdb_integer(s: &str) -> Result<u64, DebugError> {
    let word = s
        .split_whitespace()
        .find(|w| w.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or("");
    let parsed = match word.strip_prefix('0') {
        Some(octal) if !octal.is_empty() && octal.bytes().all(|b| (b'0'..=b'7').contains(&b)) => {
            u64::from_str_radix(octal, 8)
        }
        _ => parse_address(word),
    };
    parsed.map_err(|_| DebugError::Protocol(format!("not an integer: `{}`", s.trim())))
}

fn collect_registers(names: &[String], values: &[Value]) -> RegisterFile {
    values
        .iter()
        .filter_map(|entry| {
            let number: usize = entry.get_str("number")?.parse().ok()?;
            let name = names.get(number).filter(|n| !n.is_empty())?;
            // Vector registers come back as tuples and are skipped
            let raw = entry.get_str("value").filter(|v| !v.starts_with('{'))?;
            let value = parse_gdb_integer(raw).ok()?;
            Some((name.clone(), value))
        })
        .collect()
}

fn decode_memory(address: u64, len: usize, blocks: &[Value]) -> Result<Vec<u8>, DebugError> {
    let mut bytes = Vec::with_capacity(len);
    for block in blocks {
        let begin = block
            .get_str("begin")
            .and_then(|b| parse_gdb_integer(b).ok())
            .unwrap_or(address);
        if begin != address + bytes.len() as u64 {
            break;
        }
        let contents = block.get_str("contents").unwrap_or("");
        let chunk = hex::decode(contents)
            .map_err(|e| DebugError::Protocol(format!("bad memory contents: {}", e)))?;
        bytes.extend_from_slice(&chunk);
    }

    if bytes.len() < len {
        return Err(DebugError::RegionUnmapped {
            address: address + bytes.len() as u64,
        });
    }
    bytes.truncate(len);
    Ok(bytes)
}

/// Quote a program argument for `-exec-arguments`.
///
/// gdb hands the joined arguments to the shell, so each one is single-quoted
/// for the shell first and then wrapped as an MI c-string.
fn quote_arg(arg: &str) -> String {
    mi_string(&format!("'{}'", arg.replace('\'', "'\\''")))
}

/// Wrap text as an MI c-string
fn mi_string(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(line: &str) -> Results {
        match parse_record(line).unwrap() {
            Record::Result { results, .. } | Record::Async { results, .. } => results,
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_parse_gdb_integer() {
        assert_eq!(parse_gdb_integer("0x8048400").unwrap(), 0x0804_8400);
        assert_eq!(parse_gdb_integer("134513664").unwrap(), 134_513_664);
        assert_eq!(
            parse_gdb_integer("(void (*)()) 0x8048400 <main+4>").unwrap(),
            0x0804_8400
        );
        assert!(parse_gdb_integer("<unavailable>").is_err());
    }

    #[test]
    fn test_parse_gdb_integer_radixes() {
        assert_eq!(parse_gdb_integer("01002002000").unwrap(), 0x0804_8400);
        assert_eq!(parse_gdb_integer("0").unwrap(), 0);
        assert_eq!(parse_gdb_integer("0x0").unwrap(), 0);
        assert_eq!(parse_gdb_integer("010 <main+8>").unwrap(), 8);
        assert!(parse_gdb_integer("09").is_err());
    }

    #[test]
    fn test_classify_error() {
        let err = classify_error(
            "-data-read-memory-bytes",
            "Cannot access memory at address 0xbffff000",
        );
        assert!(matches!(err, DebugError::RegionUnmapped { address: 0xbfff_f000 }));

        assert!(classify_error("-data-evaluate-expression", "No registers.").is_terminated());
        assert!(classify_error("-exec-finish", "The program is not being run.").is_terminated());

        let err = classify_error(
            "-exec-finish",
            "\"finish\" not meaningful in the outermost frame.",
        );
        assert!(matches!(err, DebugError::CommandFailed { .. }));
    }

    #[test]
    fn test_stop_reasons() {
        let r = results("*stopped,reason=\"exited\",exit-code=\"01\"");
        assert_eq!(stop_reason(&r), StopReason::Exited { code: Some(1) });

        let r = results("*stopped,reason=\"exited-normally\"");
        assert!(stop_reason(&r).is_exit());

        let r = results(
            "*stopped,reason=\"breakpoint-hit\",bkptno=\"1\",frame={addr=\"0x08048410\"}",
        );
        assert_eq!(stop_reason(&r), StopReason::BreakpointHit { address: 0x0804_8410 });

        let r = results("*stopped,reason=\"signal-received\",signal-name=\"SIGSEGV\"");
        assert_eq!(stop_reason(&r), StopReason::Signal { name: "SIGSEGV".into() });
    }

    #[test]
    fn test_collect_registers_skips_vectors() {
        let names: Vec<String> = ["eax", "ecx", "", "xmm0"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let r = results(
            "^done,register-values=[{number=\"0\",value=\"0x1\"},{number=\"1\",value=\"0x2\"},{number=\"2\",value=\"0x3\"},{number=\"3\",value=\"{v4_float = {0x0, 0x0}}\"}]",
        );
        let values = r.get("register-values").and_then(Value::as_list).unwrap();
        let regs = collect_registers(&names, values);
        assert_eq!(regs.len(), 2);
        assert_eq!(regs.get("ecx"), Some(2));
        assert_eq!(regs.get("xmm0"), None);
    }

    #[test]
    fn test_decode_memory() {
        let r = results(
            "^done,memory=[{begin=\"0x1000\",offset=\"0x0\",end=\"0x1004\",contents=\"01020304\"}]",
        );
        let blocks = r.get("memory").and_then(Value::as_list).unwrap();
        assert_eq!(decode_memory(0x1000, 4, blocks).unwrap(), vec![1, 2, 3, 4]);

        let err = decode_memory(0x1000, 8, blocks).unwrap_err();
        assert!(matches!(err, DebugError::RegionUnmapped { address: 0x1004 }));
    }

    #[test]
    fn test_quote_arg() {
        assert_eq!(quote_arg("hello.out"), r#""'hello.out'""#);
        assert_eq!(quote_arg("two words"), r#""'two words'""#);
        assert_eq!(quote_arg("it's"), r#""'it'\\''s'""#);
        assert_eq!(mi_string("a \"b\""), r#""a \"b\"""#);
    }
}
