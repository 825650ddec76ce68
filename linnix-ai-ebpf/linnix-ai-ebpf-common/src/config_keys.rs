//! Config-map key layout (SPEC_FULL.md §6). The config map is a small
//! key -> u64 mapping, read-only from the kernel's viewpoint and mutated
//! only by user space (clock alignment at startup, PID-filter sync on
//! exec).

/// First of 32 consecutive PID-blacklist slots (keys 0..31). Zero is a
/// sentinel terminating the list.
pub const CONFIG_PID_BLACKLIST_BASE: u32 = 0;

/// Maximum number of blacklist entries mirrored into the kernel.
pub const MAX_BLACKLIST_ENTRIES: u32 = 32;

/// Debug-enabled flag (0/1).
pub const CONFIG_DEBUG_ENABLED: u32 = 32;

/// `boot_ns = realtime - monotonic`, added to every kernel timestamp.
pub const CONFIG_SYSTEM_BOOT_NS: u32 = 33;

/// Total number of config-map entries (blacklist slots + the two scalars).
pub const CONFIG_MAP_ENTRIES: u32 = MAX_BLACKLIST_ENTRIES + 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklist_slots_dont_collide_with_scalars() {
        assert_eq!(
            CONFIG_PID_BLACKLIST_BASE + MAX_BLACKLIST_ENTRIES,
            CONFIG_DEBUG_ENABLED
        );
        assert_eq!(CONFIG_DEBUG_ENABLED + 1, CONFIG_SYSTEM_BOOT_NS);
    }
}
