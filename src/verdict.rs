//! Verdict derivation: a pure function over the executor exit status and the
//! harvested cgroup counters.

use crate::cgroup::CgroupUsage;
use crate::types::Verdict;

/// Derive the verdict for a finished run.
///
/// `exit_status` is the executor's exit code when it exited normally, 255
/// otherwise. The executor reports 0 for a clean target exit, 1 for a
/// non-zero exit, 2 for the wall-clock kill and 3 for a signalled target;
/// anything else means the run machinery itself misbehaved.
///
/// Precedence: an OOM kill dominates everything (the target may have exited
/// cleanly just before the kernel killed its page fault), then measured CPU
/// time over the limit (the grace window can let an over-budget program
/// finish), then the plain exit-code mapping.
pub fn derive(exit_status: i32, usage: &CgroupUsage, time_limit_ms: u32) -> Verdict {
    let mut verdict = match exit_status {
        0 => Verdict::Ok,
        1 => Verdict::Re,
        2 => Verdict::Tle,
        _ => Verdict::Uke,
    };

    if usage.time_ms() > time_limit_ms {
        verdict = Verdict::Tle;
    }
    if usage.oom_kills > 0 {
        verdict = Verdict::Mle;
    }
    verdict
}
