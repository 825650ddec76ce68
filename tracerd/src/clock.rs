//! Clock alignment (SPEC_FULL.md §4.7): `bpf_ktime_get_ns()` returns
//! nanoseconds since boot, not wall-clock time. At startup we read both
//! clocks once, compute the boot offset, and publish it into the config map
//! so the kernel can add it to every timestamp before it ever reaches user
//! space.

use nix::time::{clock_gettime, ClockId};

fn to_ns(ts: nix::sys::time::TimeSpec) -> u64 {
    (ts.tv_sec() as u64) * 1_000_000_000 + (ts.tv_nsec() as u64)
}

/// `boot_ns = realtime - monotonic`: the wall-clock time the machine
/// booted, expressed in nanoseconds since the Unix epoch.
pub fn compute_boot_offset_ns() -> anyhow::Result<u64> {
    let realtime = clock_gettime(ClockId::CLOCK_REALTIME)?;
    let monotonic = clock_gettime(ClockId::CLOCK_MONOTONIC)?;
    Ok(to_ns(realtime).saturating_sub(to_ns(monotonic)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_offset_is_positive_and_stable_across_calls() {
        let first = compute_boot_offset_ns().unwrap();
        let second = compute_boot_offset_ns().unwrap();
        assert!(first > 0);
        // Both clocks advance in lockstep, so the offset should be stable
        // to within a generous scheduling-jitter tolerance.
        let delta = first.abs_diff(second);
        assert!(delta < 1_000_000_000, "boot offset drifted by {delta}ns");
    }
}
