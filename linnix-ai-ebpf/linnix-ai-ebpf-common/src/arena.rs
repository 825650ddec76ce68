//! Per-CPU payload arena layout constants (SPEC_FULL.md §4.1), carried over
//! verbatim from the reference source's `bootstrap.templ.h` so the two
//! sides of the pipeline agree on entry size and per-CPU capacity.

/// Size in bytes of one arena entry ("page" for rollover accounting).
pub const PAYLOAD_BUFFER_ENTRY_SIZE: u32 = 64;

/// Entries owned by a single CPU's band (16 K entries * 64 B = 1 MiB/CPU).
pub const PAYLOAD_BUFFER_N_ENTRIES_PER_CPU: u32 = 16 * 1024;

/// Page-age rollover timeout: a partially filled page older than this is
/// rolled over even if it still has room, so a slow CPU cannot hold the
/// consumer back indefinitely.
pub const PAYLOAD_FLUSH_TIMEOUT_NS: u64 = 750_000_000;

/// Upper bound on distinct CPUs the arena's flat key space is sized for.
pub const MAX_CPUS: u32 = 256;

/// Cap on captured argv-block bytes per `process_exec` event.
pub const ARGV_MAX_SIZE: usize = 384;

/// Cap on captured filename bytes per `openat` event.
pub const FILENAME_MAX_SIZE: usize = 384;

/// Cap on captured write-content bytes (stdout/stderr) per `write` event.
pub const WRITE_CONTENT_MAX_SIZE: usize = 32768;

/// Total flat key space: CPU `c` owns keys `[c * N, (c+1) * N)`.
pub const fn arena_total_entries() -> u32 {
    MAX_CPUS * PAYLOAD_BUFFER_N_ENTRIES_PER_CPU
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_total_entries_is_consistent() {
        assert_eq!(
            arena_total_entries(),
            MAX_CPUS * PAYLOAD_BUFFER_N_ENTRIES_PER_CPU
        );
    }
}
