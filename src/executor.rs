//! Innermost process of the run: drops privileges, wires up stdio, and
//! supervises the target program under the wall-clock deadline.
//!
//! Runs as the init of a fresh PID namespace, so the target and anything it
//! forks die with it. Communicates its outcome to the container purely
//! through its exit status.

use crate::types::{JudgeConfig, GRACE_MS};
use nix::sys::signal::{kill, sigprocmask, SigSet, Signal, SigmaskHow};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, close, dup2, fork, read, setgid, setuid, ForkResult, Gid, Uid};
use std::ffi::CString;
use std::fs;
use std::os::unix::io::RawFd;

/// Exit-status protocol towards the container.
const EXIT_RUN_OK: isize = 0;
const EXIT_RUN_FAILED: isize = 1;
const EXIT_DEADLINE: isize = 2;
const EXIT_SIGNALLED: isize = 3;

const TARGET_UID: u32 = 65534;
const TARGET_GID: u32 = 65534;

const SANDBOX_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Entry point of the executor process. `barrier_read`/`barrier_write` gate
/// the exec on cgroup placement; `result_write` is the container's result
/// pipe, inherited only so it can be closed here.
pub fn main(
    cfg: &JudgeConfig,
    barrier_read: RawFd,
    barrier_write: RawFd,
    result_write: RawFd,
) -> isize {
    // A leaked result-pipe write end would keep the container's read side
    // open forever.
    let _ = close(result_write);

    if chdir(&cfg.scratch_root().join("tmp")).is_err() {
        return EXIT_RUN_FAILED;
    }

    if fs::write("stdin", &cfg.stdin_payload).is_err() {
        return EXIT_RUN_FAILED;
    }

    // Best-effort: with only uid 0 mapped in the user namespace the kernel
    // may refuse the transition, in which case the process stays at the
    // namespace root, still unprivileged on the host.
    let _ = setgid(Gid::from_raw(TARGET_GID));
    let _ = setuid(Uid::from_raw(TARGET_UID));

    if redirect_stdio().is_err() {
        return EXIT_RUN_FAILED;
    }

    // Cgroup placement barrier: exec before this and the target's first
    // instructions run unconfined.
    let _ = close(barrier_write);
    let mut byte = [0u8; 1];
    match read(barrier_read, &mut byte) {
        Ok(n) if n > 0 => {}
        _ => return EXIT_RUN_FAILED,
    }
    let _ = close(barrier_read);

    // SIGCHLD must be blocked before the fork so the child's death is
    // observed by sigtimedwait rather than discarded.
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGCHLD);
    if sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).is_err() {
        return EXIT_RUN_FAILED;
    }

    let target = match unsafe { fork() } {
        Ok(ForkResult::Child) => exec_target(cfg, &mask),
        Ok(ForkResult::Parent { child }) => child,
        Err(_) => return EXIT_RUN_FAILED,
    };

    let deadline_ms = cfg.time_limit_ms as i64 + GRACE_MS as i64;
    if let Err(err) = wait_sigchld(deadline_ms) {
        let _ = kill(target, Signal::SIGKILL);
        let _ = waitpid(target, None);
        return if err.raw_os_error() == Some(libc::EAGAIN) {
            EXIT_DEADLINE
        } else {
            EXIT_RUN_FAILED
        };
    }

    // The signal may be a spurious re-queue; only trust an actual reap. If
    // the target cannot be collected, kill it rather than risk reporting a
    // clean exit for a program that is still running.
    match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(_, 0)) => EXIT_RUN_OK,
        Ok(WaitStatus::Exited(_, _)) => EXIT_RUN_FAILED,
        Ok(WaitStatus::Signaled(_, _, _)) => EXIT_SIGNALLED,
        _ => {
            let _ = kill(target, Signal::SIGKILL);
            let _ = waitpid(target, None);
            EXIT_RUN_FAILED
        }
    }
}

/// Reopen the standard streams onto the scratch files. The current
/// directory is already the tmpfs.
fn redirect_stdio() -> nix::Result<()> {
    let stdin_fd = nix::fcntl::open("stdin", nix::fcntl::OFlag::O_RDONLY, Mode::empty())?;
    dup2(stdin_fd, libc::STDIN_FILENO)?;
    close(stdin_fd)?;

    let out_flags =
        nix::fcntl::OFlag::O_WRONLY | nix::fcntl::OFlag::O_CREAT | nix::fcntl::OFlag::O_TRUNC;
    let mode = Mode::from_bits_truncate(0o644);

    let stdout_fd = nix::fcntl::open("stdout", out_flags, mode)?;
    dup2(stdout_fd, libc::STDOUT_FILENO)?;
    close(stdout_fd)?;

    let stderr_fd = nix::fcntl::open("stderr", out_flags, mode)?;
    dup2(stderr_fd, libc::STDERR_FILENO)?;
    close(stderr_fd)?;
    Ok(())
}

/// Grandchild: restore the signal mask, lift the stack limit, and become the
/// target program. Never returns; exec failure exits with a non-zero status
/// that surfaces as a runtime error.
fn exec_target(cfg: &JudgeConfig, mask: &SigSet) -> ! {
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(mask), None);

    let unlimited = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    unsafe {
        libc::setrlimit(libc::RLIMIT_STACK, &unlimited);
    }

    let mut argv = Vec::with_capacity(cfg.cmdline.len());
    for arg in &cfg.cmdline {
        match CString::new(arg.as_str()) {
            Ok(c) => argv.push(c),
            Err(_) => std::process::exit(127),
        }
    }
    let env = match CString::new(SANDBOX_PATH) {
        Ok(c) => [c],
        Err(_) => std::process::exit(127),
    };

    let _ = nix::unistd::execve(&argv[0], &argv[..], &env[..]);
    std::process::exit(127);
}

/// Block until SIGCHLD arrives or the deadline passes. EAGAIN in the error
/// case means the deadline fired.
fn wait_sigchld(deadline_ms: i64) -> std::io::Result<()> {
    let timeout = libc::timespec {
        tv_sec: (deadline_ms / 1000) as libc::time_t,
        tv_nsec: ((deadline_ms % 1000) * 1_000_000) as libc::c_long,
    };
    let mut mask: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut mask);
        libc::sigaddset(&mut mask, libc::SIGCHLD);
    }

    let rc = unsafe { libc::sigtimedwait(&mask, std::ptr::null_mut(), &timeout) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_includes_grace_window() {
        let cfg = JudgeConfig::new("/srv/rootfs", "/sys/fs/cgroup", vec!["/bin/true".into()]);
        assert_eq!(cfg.time_limit_ms as i64 + GRACE_MS as i64, 2000);
    }

    #[test]
    fn sigchld_wait_times_out_when_no_child_exits() {
        // Block SIGCHLD on this thread, then wait 10ms with no child: the
        // wait must report EAGAIN.
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).unwrap();

        let err = wait_sigchld(10).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));

        sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None).unwrap();
    }
}
