/// Cgroup v2 child group owned by one judged run
use crate::types::{JudgeConfig, JudgeError, Result};
use nix::unistd::Pid;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

/// Counters harvested from the child group after the run.
#[derive(Clone, Copy, Debug, Default)]
pub struct CgroupUsage {
    /// `cpu.stat` field `user_usec`.
    pub user_usec: u64,
    /// `memory.peak` in bytes.
    pub peak_bytes: u64,
    /// `memory.events` field `oom_kill`.
    pub oom_kills: u64,
}

impl CgroupUsage {
    pub fn time_ms(&self) -> u32 {
        (self.user_usec / 1000) as u32
    }

    /// Floor of the peak byte count in MiB. The byte value is preserved up
    /// to this single division.
    pub fn peak_mb(&self) -> i64 {
        (self.peak_bytes / (1024 * 1024)) as i64
    }
}

/// The child group `<cgroup_root>/judge.<sandbox_id>`.
pub struct JudgeCgroup {
    path: PathBuf,
}

pub fn group_name(sandbox_id: &str) -> String {
    format!("judge.{}", sandbox_id)
}

impl JudgeCgroup {
    /// Create the child group directory with mode 0755. An already-existing
    /// group is reused; the caller guarantees id uniqueness.
    pub fn create(cfg: &JudgeConfig) -> Result<Self> {
        let path = Path::new(&cfg.cgroup_root).join(group_name(&cfg.sandbox_id));
        match DirBuilder::new().mode(0o755).create(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(JudgeError::Cgroup(format!(
                    "failed to create {}: {}",
                    path.display(),
                    e
                )))
            }
        }
        Ok(JudgeCgroup { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_control(&self, name: &str, value: &str) -> Result<()> {
        let file = self.path.join(name);
        fs::write(&file, value)
            .map_err(|e| JudgeError::Cgroup(format!("failed to write {}: {}", file.display(), e)))
    }

    /// Write the resource limits of the request into the control files. The
    /// cpu quota is pinned to one CPU-second per second; the time verdict is
    /// driven by the measured `user_usec`, not by throttling.
    pub fn apply_limits(&self, cfg: &JudgeConfig) -> Result<()> {
        self.write_control("cpu.max", "100000 100000")?;
        self.write_control("pids.max", &cfg.pids_limit.to_string())?;
        self.write_control("memory.max", &cfg.memory_limit_bytes().to_string())?;
        self.write_control("memory.swap.max", "0")?;
        Ok(())
    }

    /// Move a process into the group. Must happen before the target execs,
    /// or its first instructions run unconfined.
    pub fn attach(&self, pid: Pid) -> Result<()> {
        self.write_control("cgroup.procs", &pid.as_raw().to_string())
    }

    /// Harvest the counters. Missing files and absent keys read as zero so
    /// that a partially torn-down group still yields a well-formed result.
    pub fn usage(&self) -> CgroupUsage {
        let cpu_stat = fs::read_to_string(self.path.join("cpu.stat")).unwrap_or_default();
        let mem_events = fs::read_to_string(self.path.join("memory.events")).unwrap_or_default();
        let peak_bytes = fs::read_to_string(self.path.join("memory.peak"))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);

        CgroupUsage {
            user_usec: stat_value(&cpu_stat, "user_usec"),
            peak_bytes,
            oom_kills: stat_value(&mem_events, "oom_kill"),
        }
    }

    /// Best-effort removal. Failures are logged and swallowed; they must not
    /// contaminate an already-computed verdict.
    pub fn remove(&self) {
        if let Err(e) = fs::remove_dir(&self.path) {
            log::warn!("failed to remove cgroup {}: {}", self.path.display(), e);
        }
    }
}

/// Extract one value from a whitespace-separated key/value listing such as
/// `cpu.stat` or `memory.events`. Absent keys read as zero.
pub fn stat_value(content: &str, key: &str) -> u64 {
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(k), Some(v)) = (parts.next(), parts.next()) {
            if k == key {
                return v.parse().unwrap_or(0);
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(root: &Path) -> JudgeConfig {
        let mut cfg = JudgeConfig::new("/unused", root.to_str().unwrap(), vec!["/bin/true".into()]);
        cfg.sandbox_id = format!("cgtest_{}", std::process::id());
        cfg.memory_limit_mb = 64;
        cfg.pids_limit = 8;
        cfg
    }

    #[test]
    fn stat_value_extracts_named_field() {
        let content = "usage_usec 5130000\nuser_usec 4400000\nsystem_usec 730000\n";
        assert_eq!(stat_value(content, "user_usec"), 4_400_000);
        assert_eq!(stat_value(content, "system_usec"), 730_000);
    }

    #[test]
    fn stat_value_defaults_to_zero() {
        assert_eq!(stat_value("", "oom_kill"), 0);
        assert_eq!(stat_value("low 0\nhigh 2\n", "oom_kill"), 0);
        assert_eq!(stat_value("oom_kill banana\n", "oom_kill"), 0);
    }

    #[test]
    fn usage_conversions_truncate() {
        let usage = CgroupUsage {
            user_usec: 1_999_999,
            peak_bytes: 300 * 1024 * 1024 + 512,
            oom_kills: 0,
        };
        assert_eq!(usage.time_ms(), 1999);
        assert_eq!(usage.peak_mb(), 300);
    }

    #[test]
    fn limits_and_counters_against_plain_directory() {
        // Control files behave like ordinary files outside a real cgroupfs,
        // which is enough to verify names and formatting.
        let base = std::env::temp_dir().join(format!("judgebox_cgroup_{}", std::process::id()));
        fs::create_dir_all(&base).unwrap();
        let cfg = test_config(&base);

        let group = JudgeCgroup::create(&cfg).unwrap();
        group.apply_limits(&cfg).unwrap();
        assert_eq!(
            fs::read_to_string(group.path().join("cpu.max")).unwrap(),
            "100000 100000"
        );
        assert_eq!(
            fs::read_to_string(group.path().join("memory.max")).unwrap(),
            (64u64 * 1024 * 1024).to_string()
        );
        assert_eq!(
            fs::read_to_string(group.path().join("memory.swap.max")).unwrap(),
            "0"
        );

        group.attach(Pid::from_raw(1234)).unwrap();
        assert_eq!(
            fs::read_to_string(group.path().join("cgroup.procs")).unwrap(),
            "1234"
        );

        // No counter files yet: everything reads as zero.
        let usage = group.usage();
        assert_eq!(usage.user_usec, 0);
        assert_eq!(usage.peak_bytes, 0);
        assert_eq!(usage.oom_kills, 0);

        // remove() is best-effort and does not panic on a non-empty dir.
        group.remove();
        let _ = fs::remove_dir_all(&base);
    }
}
