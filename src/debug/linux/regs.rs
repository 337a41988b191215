//! Register layout of `PTRACE_GETREGS` per host architecture.

use nix::libc::user_regs_struct;

use crate::debug::types::RegisterFile;

/// `cs` selector of a 32-bit task on an x86_64 kernel
#[cfg(target_arch = "x86_64")]
const COMPAT_CS: u64 = 0x23;

#[cfg(target_arch = "x86_64")]
pub fn pc(regs: &user_regs_struct) -> u64 {
    regs.rip
}

#[cfg(target_arch = "x86_64")]
pub fn sp(regs: &user_regs_struct) -> u64 {
    regs.rsp
}

#[cfg(target_arch = "x86_64")]
pub fn set_pc(regs: &mut user_regs_struct, pc: u64) {
    regs.rip = pc;
}

#[cfg(target_arch = "x86_64")]
pub fn register_file(regs: &user_regs_struct) -> RegisterFile {
    if regs.cs == COMPAT_CS {
        let low = |v: u64| v & 0xffff_ffff;
        return [
            ("eax", regs.rax),
            ("ecx", regs.rcx),
            ("edx", regs.rdx),
            ("ebx", regs.rbx),
            ("esp", regs.rsp),
            ("ebp", regs.rbp),
            ("esi", regs.rsi),
            ("edi", regs.rdi),
            ("eip", regs.rip),
            ("eflags", regs.eflags),
            ("cs", regs.cs),
            ("ss", regs.ss),
            ("ds", regs.ds),
            ("es", regs.es),
            ("fs", regs.fs),
            ("gs", regs.gs),
            ("orig_eax", regs.orig_rax),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), low(value)))
        .collect();
    }

    [
        ("rax", regs.rax),
        ("rbx", regs.rbx),
        ("rcx", regs.rcx),
        ("rdx", regs.rdx),
        ("rsi", regs.rsi),
        ("rdi", regs.rdi),
        ("rbp", regs.rbp),
        ("rsp", regs.rsp),
        ("r8", regs.r8),
        ("r9", regs.r9),
        ("r10", regs.r10),
        ("r11", regs.r11),
        ("r12", regs.r12),
        ("r13", regs.r13),
        ("r14", regs.r14),
        ("r15", regs.r15),
        ("rip", regs.rip),
        ("eflags", regs.eflags),
        ("cs", regs.cs),
        ("ss", regs.ss),
        ("ds", regs.ds),
        ("es", regs.es),
        ("fs", regs.fs),
        ("gs", regs.gs),
        ("fs_base", regs.fs_base),
        ("gs_base", regs.gs_base),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

#[cfg(target_arch = "x86")]
fn word(v: nix::libc::c_long) -> u64 {
    v as u32 as u64
}

#[cfg(target_arch = "x86")]
pub fn pc(regs: &user_regs_struct) -> u64 {
    word(regs.eip)
}

#[cfg(target_arch = "x86")]
pub fn sp(regs: &user_regs_struct) -> u64 {
    word(regs.esp)
}

#[cfg(target_arch = "x86")]
pub fn set_pc(regs: &mut user_regs_struct, pc: u64) {
    regs.eip = pc as u32 as nix::libc::c_long;
}

#[cfg(target_arch = "x86")]
pub fn register_file(regs: &user_regs_struct) -> RegisterFile {
    [
        ("eax", regs.eax),
        ("ecx", regs.ecx),
        ("edx", regs.edx),
        ("ebx", regs.ebx),
        ("esp", regs.esp),
        ("ebp", regs.ebp),
        ("esi", regs.esi),
        ("edi", regs.edi),
        ("eip", regs.eip),
        ("eflags", regs.eflags),
        ("cs", regs.xcs),
        ("ss", regs.xss),
        ("ds", regs.xds),
        ("es", regs.xes),
        ("fs", regs.xfs),
        ("gs", regs.xgs),
        ("orig_eax", regs.orig_eax),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), word(value)))
    .collect()
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    fn zeroed() -> user_regs_struct {
        // Plain integer struct
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn test_native_names() {
        let mut regs = zeroed();
        regs.cs = 0x33;
        regs.rip = 0x401000;
        regs.rsp = 0x7ffc_0000_1000;
        let file = register_file(&regs);
        assert_eq!(file.pc(), Some(0x401000));
        assert_eq!(file.get("rsp"), Some(0x7ffc_0000_1000));
        assert_eq!(file.get("eip"), None);
    }

    #[test]
    fn test_compat_names_truncate() {
        let mut regs = zeroed();
        regs.cs = COMPAT_CS;
        regs.rip = 0x0804_8000;
        regs.rax = 0xdead_beef_0000_0001;
        let file = register_file(&regs);
        assert_eq!(file.get("eip"), Some(0x0804_8000));
        assert_eq!(file.get("eax"), Some(1));
        assert_eq!(file.get("rip"), None);
        assert_eq!(file.sp(), Some(0));
    }

    #[test]
    fn test_set_pc() {
        let mut regs = zeroed();
        set_pc(&mut regs, 0x1234);
        assert_eq!(pc(&regs), 0x1234);
    }
}
