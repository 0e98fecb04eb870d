/// Core types for the judging sandbox
use std::path::PathBuf;
use thiserror::Error;

/// Extra wall-clock allowance on top of the advertised time limit before the
/// executor hard-kills the target. The measured-CPU check still produces a
/// clean TLE for programs that finish inside the grace window.
pub const GRACE_MS: u32 = 1000;

/// Classification of a single judged run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Ok = 0,
    Tle = 1,
    Mle = 2,
    Re = 3,
    Uke = 4,
}

impl Verdict {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl From<u32> for Verdict {
    fn from(v: u32) -> Self {
        match v {
            0 => Verdict::Ok,
            1 => Verdict::Tle,
            2 => Verdict::Mle,
            3 => Verdict::Re,
            _ => Verdict::Uke,
        }
    }
}

/// A named file travelling through the protocol, either into the scratch
/// tmpfs before the run or back out of it afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSpec {
    pub filename: String,
    pub content: Vec<u8>,
    /// Permission bits applied when the file is materialised. Zero for
    /// files read back after the run.
    pub mode: u32,
}

impl FileSpec {
    pub fn text(filename: &str, content: &str, mode: u32) -> Self {
        FileSpec {
            filename: filename.to_string(),
            content: content.as_bytes().to_vec(),
            mode,
        }
    }
}

/// One judging request. Immutable once decoded from the request frame.
#[derive(Clone, Debug)]
pub struct JudgeConfig {
    /// Advertised CPU/wall budget in milliseconds. The hard kill fires at
    /// `time_limit_ms + GRACE_MS`.
    pub time_limit_ms: u32,
    /// Cgroup `memory.max`, in MiB.
    pub memory_limit_mb: i64,
    /// Cgroup `pids.max`.
    pub pids_limit: u32,
    /// Host path of the read-only rootfs image.
    pub rootfs_path: String,
    /// Passed verbatim to the tmpfs `size=` mount option, e.g. "64M".
    pub tmpfs_size: String,
    /// Writable cgroup v2 directory under which one child group is created.
    pub cgroup_root: String,
    /// Caller-chosen token naming the scratch directory and cgroup child.
    /// Must be unique per concurrent invocation.
    pub sandbox_id: String,
    /// Bytes presented to the target program on standard input.
    pub stdin_payload: Vec<u8>,
    /// Argument vector; element 0 is the absolute path inside the sandbox.
    pub cmdline: Vec<String>,
    /// Files materialised into the scratch tmpfs before the run.
    pub input_files: Vec<FileSpec>,
    /// Names read back from the scratch tmpfs after the run.
    pub output_filenames: Vec<String>,
}

impl JudgeConfig {
    /// Request with defaults suitable for a typical judged test case and a
    /// freshly generated sandbox id.
    pub fn new(rootfs_path: &str, cgroup_root: &str, cmdline: Vec<String>) -> Self {
        JudgeConfig {
            time_limit_ms: 1000,
            memory_limit_mb: 256,
            pids_limit: 64,
            rootfs_path: rootfs_path.to_string(),
            tmpfs_size: "64M".to_string(),
            cgroup_root: cgroup_root.to_string(),
            sandbox_id: uuid::Uuid::new_v4().to_string(),
            stdin_payload: Vec::new(),
            cmdline,
            input_files: Vec::new(),
            output_filenames: Vec::new(),
        }
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        self.memory_limit_mb * 1024 * 1024
    }

    /// Scratch directory this invocation owns on the host.
    pub fn scratch_root(&self) -> PathBuf {
        PathBuf::from(format!("/tmp/judger_sandbox_{}", self.sandbox_id))
    }
}

/// One judging response. Emitted exactly once per request, even on
/// catastrophic failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JudgeResult {
    pub verdict: Verdict,
    /// CPU user time in milliseconds, from cgroup `cpu.stat` `user_usec`.
    pub time_ms: u32,
    /// Peak memory in MiB: the floor of `memory.peak` bytes / 2^20.
    pub memory_mb: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub output_files: Vec<FileSpec>,
}

/// Error types for the sandbox
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("namespace error: {0}")]
    Namespace(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("cgroup error: {0}")]
    Cgroup(String),

    #[error("process error: {0}")]
    Process(String),
}

impl From<nix::errno::Errno> for JudgeError {
    fn from(err: nix::errno::Errno) -> Self {
        JudgeError::Process(err.to_string())
    }
}

/// Result type alias for sandbox operations
pub type Result<T> = std::result::Result<T, JudgeError>;
