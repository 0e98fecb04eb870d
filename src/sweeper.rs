//! Startup sweep for residue left by earlier crashed runs.
//!
//! A crash between "cgroup created" and "result emitted" leaves a stale
//! `judger_sandbox_*` scratch directory and a stale `judge.*` cgroup child
//! on the host. The sweep removes entries older than a caller-chosen cutoff,
//! keyed by modification time, and never touches the invocation currently
//! being served. Everything here is best-effort.

use crate::cgroup::group_name;
use crate::types::JudgeConfig;
use nix::mount::umount;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Sweep both residue kinds for the current request's environment.
pub fn sweep(cfg: &JudgeConfig, max_age: Duration) {
    let scratch = sweep_scratch(Path::new("/tmp"), &cfg.sandbox_id, max_age);
    let groups = sweep_cgroups(Path::new(&cfg.cgroup_root), &cfg.sandbox_id, max_age);
    if scratch > 0 || groups > 0 {
        log::info!(
            "swept {} stale scratch dir(s) and {} stale cgroup(s)",
            scratch,
            groups
        );
    }
}

/// Remove stale scratch directories under `base`. Returns how many were
/// removed.
pub fn sweep_scratch(base: &Path, current_id: &str, max_age: Duration) -> usize {
    let own = format!("judger_sandbox_{}", current_id);
    let mut removed = 0;

    for path in stale_entries(base, "judger_sandbox_", &own, max_age) {
        // Mounts may still be pinned if the crashed run got that far.
        let _ = umount(&path.join("tmp"));
        let _ = umount(&path);
        match fs::remove_dir(&path) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("failed to sweep {}: {}", path.display(), e),
        }
    }
    removed
}

/// Remove stale cgroup children under `root`. Returns how many were removed.
pub fn sweep_cgroups(root: &Path, current_id: &str, max_age: Duration) -> usize {
    let own = group_name(current_id);
    let mut removed = 0;

    for path in stale_entries(root, "judge.", &own, max_age) {
        match fs::remove_dir(&path) {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("failed to sweep cgroup {}: {}", path.display(), e),
        }
    }
    removed
}

/// Directories under `base` whose name matches `prefix`, is not `skip`, and
/// whose modification time is older than `max_age`.
fn stale_entries(
    base: &Path,
    prefix: &str,
    skip: &str,
    max_age: Duration,
) -> Vec<std::path::PathBuf> {
    let now = SystemTime::now();
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("failed to scan {}: {}", base.display(), e);
            return Vec::new();
        }
    };

    let mut stale = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || name == skip {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let age = match now.duration_since(modified) {
            Ok(age) => age,
            Err(_) => continue, // future timestamp, skip
        };
        if age > max_age {
            stale.push(path);
        }
    }
    stale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_base(tag: &str) -> std::path::PathBuf {
        let base = std::env::temp_dir().join(format!("judgebox_sweep_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn sweeps_only_stale_matching_directories() {
        let base = unique_base("scratch");
        fs::create_dir(base.join("judger_sandbox_dead")).unwrap();
        fs::create_dir(base.join("judger_sandbox_live")).unwrap();
        fs::create_dir(base.join("unrelated")).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = sweep_scratch(&base, "live", Duration::ZERO);
        assert_eq!(removed, 1);
        assert!(!base.join("judger_sandbox_dead").exists());
        assert!(base.join("judger_sandbox_live").exists());
        assert!(base.join("unrelated").exists());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn fresh_directories_survive_a_long_cutoff() {
        let base = unique_base("fresh");
        fs::create_dir(base.join("judger_sandbox_recent")).unwrap();

        let removed = sweep_scratch(&base, "other", Duration::from_secs(3600));
        assert_eq!(removed, 0);
        assert!(base.join("judger_sandbox_recent").exists());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn cgroup_sweep_skips_the_current_group() {
        let base = unique_base("cgroup");
        fs::create_dir(base.join("judge.dead")).unwrap();
        fs::create_dir(base.join("judge.current")).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let removed = sweep_cgroups(&base, "current", Duration::ZERO);
        assert_eq!(removed, 1);
        assert!(!base.join("judge.dead").exists());
        assert!(base.join("judge.current").exists());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn missing_base_directory_is_harmless() {
        let base = std::env::temp_dir().join("judgebox_sweep_nonexistent");
        assert_eq!(sweep_scratch(&base, "x", Duration::ZERO), 0);
        assert_eq!(sweep_cgroups(&base, "x", Duration::ZERO), 0);
    }
}
