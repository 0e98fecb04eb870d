//! Supervisor: the outermost process of the run.
//!
//! Reads the request, launches the container init in fresh namespaces,
//! writes its uid/gid maps from the outside (the only place the kernel
//! allows it), and turns whatever happens next into exactly one well-formed
//! response frame.

use crate::types::{JudgeConfig, JudgeError, JudgeResult, Result, Verdict};
use crate::{container, proto, sweeper};
use nix::fcntl::OFlag;
use nix::sched::{clone, CloneFlags};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{close, getgid, getuid, pipe2, write, Pid};
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::FromRawFd;
use std::time::Duration;

pub(crate) const CLONE_STACK_SIZE: usize = 1024 * 1024;

/// Serve one request from `input` and emit one response on `output`.
///
/// Errors propagate to the caller, which must still produce the UKE
/// response (see [`internal_error`]); a verdict of any kind returns `Ok`.
pub fn serve<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    sweep_cutoff: Option<Duration>,
) -> Result<()> {
    let cfg = proto::decode_request(input)?;
    log::debug!(
        "judging sandbox {} ({} ms, {} MiB)",
        cfg.sandbox_id,
        cfg.time_limit_ms,
        cfg.memory_limit_mb
    );

    if let Some(max_age) = sweep_cutoff {
        sweeper::sweep(&cfg, max_age);
    }

    let result = run(&cfg)?;
    proto::encode_result(output, &result)?;
    output.flush()?;
    Ok(())
}

/// Execute one judged run and collect its result.
pub fn run(cfg: &JudgeConfig) -> Result<JudgeResult> {
    let (barrier_read, barrier_write) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| JudgeError::Process(format!("pipe(barrier): {}", e)))?;
    let (result_read, result_write) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| JudgeError::Process(format!("pipe(result): {}", e)))?;

    let mut stack = vec![0u8; CLONE_STACK_SIZE];
    let init_cfg = cfg.clone();
    let cb: Box<dyn FnMut() -> isize> = Box::new(move || {
        container::main(
            &init_cfg,
            barrier_read,
            barrier_write,
            result_read,
            result_write,
        )
    });
    // No CLONE_NEWPID here: the PID namespace is entered one level deeper so
    // the container can reap the executor from outside it.
    let flags = CloneFlags::CLONE_NEWUSER
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWIPC
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWUTS;
    let init_pid = unsafe { clone(cb, &mut stack, flags, Some(libc::SIGCHLD)) }
        .map_err(|e| JudgeError::Namespace(format!("clone(container): {}", e)))?;

    // Only the container writes results; holding this end open would turn a
    // dead container into a hang instead of a short read.
    let _ = close(result_write);

    if let Err(err) = write_id_maps(init_pid) {
        let _ = kill(init_pid, Signal::SIGKILL);
        let _ = waitpid(init_pid, None);
        let _ = close(barrier_read);
        let _ = close(barrier_write);
        let _ = close(result_read);
        return Err(err);
    }

    // Maps are in place; release the container.
    let _ = write(barrier_write, b"1");
    let _ = close(barrier_write);
    let _ = close(barrier_read);

    // The container's own bounded wait on the executor bounds this wait.
    let status = waitpid(init_pid, None)
        .map_err(|e| JudgeError::Process(format!("waitpid(container): {}", e)))?;

    let mut reader = unsafe { File::from_raw_fd(result_read) };
    proto::decode_result(&mut reader).map_err(|_| {
        JudgeError::Process(format!(
            "container exited before reporting a result ({:?})",
            status
        ))
    })
}

/// Map uid 0 inside the new user namespace to the invoking user. Must be
/// done from outside the namespace, and `setgroups` must be denied before
/// the gid map is written when running unprivileged.
fn write_id_maps(pid: Pid) -> Result<()> {
    let proc_dir = format!("/proc/{}", pid.as_raw());
    let write_map = |name: &str, content: String| -> Result<()> {
        std::fs::write(format!("{}/{}", proc_dir, name), content)
            .map_err(|e| JudgeError::Namespace(format!("failed to write {}: {}", name, e)))
    };

    write_map("setgroups", "deny".to_string())?;
    write_map("uid_map", format!("0 {} 1", getuid().as_raw()))?;
    write_map("gid_map", format!("0 {} 1", getgid().as_raw()))?;
    Ok(())
}

/// The response emitted when judging itself failed: UKE, zero measurements,
/// and the failure message on the stderr channel.
pub fn internal_error(message: &str) -> JudgeResult {
    JudgeResult {
        verdict: Verdict::Uke,
        time_ms: 0,
        memory_mb: 0,
        stdout: Vec::new(),
        stderr: format!("Internal Error: {}", message).into_bytes(),
        output_files: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_response_is_well_formed() {
        let res = internal_error("pipe(barrier): too many open files");
        assert_eq!(res.verdict, Verdict::Uke);
        assert_eq!(res.time_ms, 0);
        assert_eq!(res.memory_mb, 0);
        assert!(res.stdout.is_empty());
        assert!(res.stderr.starts_with(b"Internal Error: "));
        assert!(res.output_files.is_empty());

        // It must survive the wire like any other result.
        let mut buf = Vec::new();
        proto::encode_result(&mut buf, &res).unwrap();
        let decoded = proto::decode_result(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, res);
    }
}
