//! PID filter (SPEC_FULL.md §4.6): suppresses events from a process or its
//! parent once blacklisted, re-evaluating membership at each `exec` since a
//! reused pid may now belong to an entirely different program.

use std::collections::HashSet;
use std::fs;

use linnix_ai_ebpf_common::MAX_BLACKLIST_ENTRIES;
use log::debug;

use crate::config::PidFilterConfig;

/// Tracks which pids are suppressed (blacklisted) or explicitly cleared
/// (whitelisted). A pid not in either set has not yet been evaluated.
pub struct PidFilter {
    blacklist: HashSet<u32>,
    whitelist: HashSet<u32>,
    patterns: Vec<String>,
}

impl PidFilter {
    /// Pre-seeds the blacklist with `{0, 1, 2, self}` per SPEC_FULL.md §4.6.
    pub fn new(config: &PidFilterConfig, self_pid: u32) -> Self {
        let mut blacklist = HashSet::new();
        blacklist.insert(0);
        blacklist.insert(1);
        blacklist.insert(2);
        blacklist.insert(self_pid);
        Self {
            blacklist,
            whitelist: HashSet::new(),
            patterns: config
                .blacklist_patterns
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// True if `pid` or `ppid` is currently blacklisted.
    pub fn is_suppressed(&self, pid: u32, ppid: u32) -> bool {
        self.blacklist.contains(&pid) || self.blacklist.contains(&ppid)
    }

    /// Handle an `exec` event: the pid may have been reused, so forget any
    /// prior verdict before re-evaluating against `comm`/cmdline.
    pub fn on_exec(&mut self, pid: u32, comm: &str) {
        self.blacklist.remove(&pid);
        self.whitelist.remove(&pid);

        if self.matches_pattern(comm) {
            self.blacklist.insert(pid);
            debug!("pid {pid} blacklisted by comm match: {comm}");
            return;
        }

        match self.cmdline(pid) {
            Some(cmdline) if !cmdline.is_empty() => {
                if self.matches_pattern(&cmdline) {
                    self.blacklist.insert(pid);
                    debug!("pid {pid} blacklisted by cmdline match");
                } else {
                    self.whitelist.insert(pid);
                }
            }
            // Empty cmdline means "do not blacklist" (SPEC_FULL.md §4.6).
            _ => {
                self.whitelist.insert(pid);
            }
        }
    }

    /// Handle an `exit` event: drop the pid from both lists.
    pub fn on_exit(&mut self, pid: u32) {
        self.blacklist.remove(&pid);
        self.whitelist.remove(&pid);
    }

    fn matches_pattern(&self, haystack: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let haystack = haystack.to_lowercase();
        self.patterns.iter().any(|p| haystack.contains(p.as_str()))
    }

    fn cmdline(&self, pid: u32) -> Option<String> {
        let raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        let text = raw
            .iter()
            .map(|&b| if b == 0 { b' ' } else { b })
            .collect::<Vec<u8>>();
        Some(String::from_utf8_lossy(&text).trim().to_string())
    }

    /// First `K <= MAX_BLACKLIST_ENTRIES` blacklisted pids, sorted ascending,
    /// for mirroring into the kernel config map (SPEC_FULL.md §4.6).
    pub fn sorted_blacklist_for_kernel(&self) -> Vec<u32> {
        let mut sorted: Vec<u32> = self.blacklist.iter().copied().collect();
        sorted.sort_unstable();
        sorted.truncate(MAX_BLACKLIST_ENTRIES as usize);
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> PidFilter {
        PidFilter::new(&PidFilterConfig::default(), 999)
    }

    #[test]
    fn preseeds_blacklist() {
        let f = filter();
        assert!(f.is_suppressed(0, 100));
        assert!(f.is_suppressed(1, 100));
        assert!(f.is_suppressed(2, 100));
        assert!(f.is_suppressed(100, 999));
    }

    #[test]
    fn parent_on_blacklist_suppresses_child() {
        let f = filter();
        assert!(f.is_suppressed(12345, 1));
    }

    #[test]
    fn exec_reevaluates_by_comm_pattern() {
        let cfg = PidFilterConfig {
            blacklist_patterns: vec!["noisy".to_string()],
        };
        let mut f = PidFilter::new(&cfg, 999);
        f.on_exec(500, "noisy-agent");
        assert!(f.is_suppressed(500, 1));
    }

    #[test]
    fn exec_without_pattern_match_whitelists() {
        let mut f = filter();
        f.blacklist.insert(500);
        f.on_exec(500, "bash");
        assert!(!f.is_suppressed(500, 1));
    }

    #[test]
    fn exit_clears_both_lists() {
        let mut f = filter();
        f.blacklist.insert(500);
        f.on_exit(500);
        assert!(!f.blacklist.contains(&500));
        assert!(!f.whitelist.contains(&500));
    }

    #[test]
    fn kernel_mirror_is_sorted_and_capped() {
        let mut f = filter();
        for pid in (10..50).rev() {
            f.blacklist.insert(pid);
        }
        let mirrored = f.sorted_blacklist_for_kernel();
        assert!(mirrored.len() <= MAX_BLACKLIST_ENTRIES as usize);
        assert!(mirrored.windows(2).all(|w| w[0] <= w[1]));
    }
}
