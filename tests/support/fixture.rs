//! Target program for the ptrace backend tests.
//!
//! `call` calls `fixture_target` once and exits with its result. `fork` calls
//! it from a forked child and exits with the child's status, or 100 plus the
//! signal number when the child was killed.

#[no_mangle]
#[inline(never)]
pub extern "C" fn fixture_target(value: i32) -> i32 {
    std::hint::black_box(value)
}

fn main() {
    let mode = std::env::args().nth(1).unwrap_or_default();
    let code = match mode.as_str() {
        "call" => fixture_target(3),
        #[cfg(target_os = "linux")]
        "fork" => fork_and_wait(),
        _ => 2,
    };
    std::process::exit(code);
}

#[cfg(target_os = "linux")]
fn fork_and_wait() -> i32 {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    match unsafe { fork() } {
        Ok(ForkResult::Child) => std::process::exit(fixture_target(7)),
        Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => code,
            Ok(WaitStatus::Signaled(_, sig, _)) => 100 + sig as i32,
            _ => 1,
        },
        Err(_) => 1,
    }
}
