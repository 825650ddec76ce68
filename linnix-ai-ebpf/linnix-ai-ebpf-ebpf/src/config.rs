//! The config map (SPEC_FULL.md §6): a small key -> u64 table written only
//! from user space (clock alignment at startup, PID-filter mirror sync on
//! exec) and read-only from the kernel's viewpoint.

use aya_ebpf::{macros::map, maps::Array};
use linnix_ai_ebpf_common::{
    CONFIG_MAP_ENTRIES, CONFIG_PID_BLACKLIST_BASE, CONFIG_SYSTEM_BOOT_NS, MAX_BLACKLIST_ENTRIES,
};

#[map(name = "CONFIG")]
static mut CONFIG: Array<u64> = Array::with_max_entries(CONFIG_MAP_ENTRIES, 0);

#[inline(always)]
fn config_get(key: u32) -> u64 {
    unsafe { CONFIG.get(key).copied().unwrap_or(0) }
}

/// `boot_ns = realtime - monotonic`, written once at startup; added to every
/// kernel timestamp so consumer-visible times are wall-clock (SPEC_FULL.md §4.7).
#[inline(always)]
pub fn boot_ns_offset() -> u64 {
    config_get(CONFIG_SYSTEM_BOOT_NS)
}

/// True if `pid` or `ppid` matches a mirrored blacklist slot. Slots are
/// scanned in order and the scan stops at the first zero sentinel
/// (SPEC_FULL.md §4.6).
#[inline(always)]
pub fn is_blacklisted(pid: u32, ppid: u32) -> bool {
    for i in 0..MAX_BLACKLIST_ENTRIES {
        let entry = config_get(CONFIG_PID_BLACKLIST_BASE + i);
        if entry == 0 {
            break;
        }
        let entry = entry as u32;
        if entry == pid || entry == ppid {
            return true;
        }
    }
    false
}
