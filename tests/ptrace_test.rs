//! ptrace backend tests against the `steptrace-fixture` binary
//!
//! Run with: cargo test --test ptrace_test

#![cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]

#[cfg(test)]
mod tests {
    use std::path::Path;

    use steptrace::debug::linux::PtraceDebugger;
    use steptrace::debug::types::{BreakLocation, ForkMode, SessionSettings, StopReason};
    use steptrace::debug::DebugControl;

    const FIXTURE: &str = env!("CARGO_BIN_EXE_steptrace-fixture");

    fn launch(mode: &str, follow_fork: ForkMode) -> PtraceDebugger {
        let mut dbg = PtraceDebugger::new(Path::new(FIXTURE), &[mode.to_string()]);
        let settings = SessionSettings {
            follow_fork,
            ..Default::default()
        };
        dbg.configure(&settings).unwrap();
        dbg
    }

    fn symbol(name: &str) -> BreakLocation {
        BreakLocation::Symbol {
            name: name.into(),
            offset: 0,
        }
    }

    fn in_target(dbg: &mut PtraceDebugger) -> bool {
        let pc = dbg.pc().unwrap();
        let insn = dbg.instruction_at(pc).unwrap();
        insn.symbol.map_or(false, |s| s.starts_with("fixture_target"))
    }

    #[test]
    fn test_breakpoint_hit_and_finish() {
        let mut dbg = launch("call", ForkMode::Child);
        assert_eq!(dbg.set_breakpoint(&symbol("fixture_target")).unwrap(), None);

        let StopReason::BreakpointHit { address } = dbg.run().unwrap() else {
            panic!("expected the pending breakpoint to be hit");
        };
        assert_eq!(dbg.pc().unwrap(), address);
        assert_eq!(dbg.registers().unwrap().pc(), Some(address));

        let insn = dbg.instruction_at(address).unwrap();
        assert_eq!(insn.symbol.as_deref(), Some("fixture_target"));
        // Planted int3 is hidden from reads
        assert_ne!(dbg.read_memory(address, 1).unwrap(), vec![0xcc]);

        assert_eq!(dbg.finish().unwrap(), StopReason::FunctionFinished);
        assert!(!in_target(&mut dbg));
    }

    #[test]
    fn test_step_off_breakpoint_and_until() {
        let mut dbg = launch("call", ForkMode::Child);
        dbg.set_breakpoint(&symbol("main")).unwrap();

        let StopReason::BreakpointHit { address: main } = dbg.run().unwrap() else {
            panic!("expected a stop in main");
        };
        let target = dbg
            .set_breakpoint(&symbol("fixture_target"))
            .unwrap()
            .expect("resolved after launch");

        assert_eq!(dbg.step_instruction().unwrap(), StopReason::Stepped);
        assert_ne!(dbg.pc().unwrap(), main);

        assert_eq!(dbg.run_until(target).unwrap(), StopReason::LocationReached);
        assert_eq!(dbg.pc().unwrap(), target);
    }

    #[test]
    fn test_runs_to_exit() {
        let mut dbg = launch("call", ForkMode::Child);
        assert_eq!(dbg.run().unwrap(), StopReason::Exited { code: Some(3) });
        assert!(dbg.pc().unwrap_err().is_terminated());
        assert!(dbg.step_instruction().unwrap_err().is_terminated());
    }

    #[test]
    fn test_follow_fork_parent_leaves_child_clean() {
        let mut dbg = launch("fork", ForkMode::Parent);
        dbg.set_breakpoint(&symbol("fixture_target")).unwrap();

        // Only the child calls fixture_target; it must exit normally with 7
        assert_eq!(dbg.run().unwrap(), StopReason::Exited { code: Some(7) });
    }

    #[test]
    fn test_follow_fork_child() {
        let mut dbg = launch("fork", ForkMode::Child);
        dbg.set_breakpoint(&symbol("fixture_target")).unwrap();

        assert!(matches!(dbg.run().unwrap(), StopReason::BreakpointHit { .. }));
        assert!(in_target(&mut dbg));
        assert_eq!(dbg.finish().unwrap(), StopReason::FunctionFinished);
        assert!(!in_target(&mut dbg));
    }
}
