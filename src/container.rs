//! Container init: the middle process of the run.
//!
//! Executes as uid 0 inside the fresh user namespace (still the invoking
//! user on the host). Builds the sandboxed filesystem view, confines the
//! executor in a cgroup, reaps it, derives the verdict, and ships the result
//! frame back to the supervisor. It deliberately stays out of the PID
//! namespace so it can act as the executor's reaper from outside.

use crate::cgroup::JudgeCgroup;
use crate::mount::{self, ScratchMount};
use crate::supervisor::CLONE_STACK_SIZE;
use crate::types::{FileSpec, JudgeConfig, JudgeError, JudgeResult, Result};
use crate::{executor, proto, verdict};
use nix::fcntl::OFlag;
use nix::sched::{clone, CloneFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, pipe2, read, sethostname, write};
use std::fs::File;
use std::os::unix::io::{FromRawFd, RawFd};

/// Entry point of the container process, invoked from the supervisor's
/// clone callback. The return value becomes the process exit status; any
/// non-zero exit before the result frame is emitted surfaces as UKE in the
/// supervisor.
pub fn main(
    cfg: &JudgeConfig,
    barrier_read: RawFd,
    barrier_write: RawFd,
    result_read: RawFd,
    result_write: RawFd,
) -> isize {
    let _ = close(barrier_write);
    let _ = close(result_read);

    match run(cfg, barrier_read, result_write) {
        Ok(()) => 0,
        Err(err) => {
            log::error!("container init failed: {}", err);
            1
        }
    }
}

fn run(cfg: &JudgeConfig, barrier_read: RawFd, result_write: RawFd) -> Result<()> {
    // The supervisor signals once the uid/gid maps are written; mount and
    // cgroup operations are refused before that.
    let mut byte = [0u8; 1];
    match read(barrier_read, &mut byte) {
        Ok(n) if n > 0 => {}
        _ => {
            return Err(JudgeError::Process(
                "supervisor aborted before releasing the barrier".to_string(),
            ))
        }
    }
    let _ = close(barrier_read);

    sethostname("sandbox")
        .map_err(|e| JudgeError::Namespace(format!("failed to set hostname: {}", e)))?;
    mount::make_mounts_private()?;

    let scratch = ScratchMount::construct(cfg)?;
    scratch.materialise_inputs(&cfg.input_files)?;

    let cgroup = JudgeCgroup::create(cfg)?;
    cgroup.apply_limits(cfg)?;

    // Fresh barrier pair gating the executor's exec on cgroup placement.
    let (exec_barrier_read, exec_barrier_write) = pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| JudgeError::Process(format!("pipe(exec barrier): {}", e)))?;

    let mut stack = vec![0u8; CLONE_STACK_SIZE];
    let exec_cfg = cfg.clone();
    let cb: Box<dyn FnMut() -> isize> = Box::new(move || {
        executor::main(
            &exec_cfg,
            exec_barrier_read,
            exec_barrier_write,
            result_write,
        )
    });
    // The PID namespace starts here, one level below, so this process can
    // reap the executor from outside it.
    let flags = CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWUTS;
    let exec_pid = unsafe { clone(cb, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| JudgeError::Process(format!("clone(executor): {}", e)))?;

    if let Err(err) = cgroup.attach(exec_pid) {
        let _ = kill(exec_pid, Signal::SIGKILL);
        let _ = waitpid(exec_pid, None);
        return Err(err);
    }

    let _ = write(exec_barrier_write, b"1");
    let _ = close(exec_barrier_write);
    let _ = close(exec_barrier_read);

    let status = waitpid(exec_pid, None)
        .map_err(|e| JudgeError::Process(format!("waitpid(executor): {}", e)))?;
    let exit_status = match status {
        WaitStatus::Exited(_, code) => code,
        _ => 255,
    };

    let usage = cgroup.usage();
    let result = JudgeResult {
        verdict: verdict::derive(exit_status, &usage, cfg.time_limit_ms),
        time_ms: usage.time_ms(),
        memory_mb: usage.peak_mb(),
        stdout: scratch.read_back("stdout"),
        stderr: scratch.read_back("stderr"),
        output_files: cfg
            .output_filenames
            .iter()
            .map(|name| FileSpec {
                filename: name.clone(),
                content: scratch.read_back(name),
                mode: 0,
            })
            .collect(),
    };

    // Verdict is settled; nothing below may change it.
    cgroup.remove();
    scratch.teardown();

    let mut writer = unsafe { File::from_raw_fd(result_write) };
    proto::encode_result(&mut writer, &result)?;
    Ok(())
}
