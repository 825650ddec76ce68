#![cfg_attr(all(feature = "bpf", not(feature = "user")), no_std)]

//! Shared kernel/user wire types for the telemetry pipeline: the event
//! header ring slot, the per-CPU payload arena layout, the dynamic-field
//! descriptor encodings, and the fixed payload struct for each event type.
//! This crate is the single source of truth for the memory layout crossing
//! the kernel/user boundary; both sides depend on it so the layouts cannot
//! drift apart.

#[cfg(test)]
use core::mem::size_of;

use bytemuck::{Pod, Zeroable};

mod arena;
mod config_keys;
mod descriptor;
mod header;
mod payloads;
mod ring;
mod telemetry_config;

pub use arena::*;
pub use config_keys::*;
pub use descriptor::*;
pub use header::*;
pub use payloads::*;
pub use ring::*;
pub use telemetry_config::*;

/// Construct a 64-bit unique process id from a pid and its start time,
/// robust to pid reuse: `(pid_low24 << 40) | start_ns_low40`.
#[inline(always)]
pub const fn make_upid(pid: u32, start_time_ns: u64) -> u64 {
    (((pid as u64) & 0xFF_FFFF) << 40) | (start_time_ns & 0xFF_FFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_upid_is_deterministic() {
        assert_eq!(make_upid(42, 123_456), make_upid(42, 123_456));
    }

    #[test]
    fn make_upid_distinguishes_start_time() {
        assert_ne!(make_upid(42, 1), make_upid(42, 2));
    }

    #[test]
    fn make_upid_fits_in_documented_bit_widths() {
        // pid is masked to 24 bits, start_ns to 40 bits, matching the spec's
        // `(pid_low24 << 40) | start_ns_low40` construction.
        let upid = make_upid(u32::MAX, u64::MAX);
        assert_eq!(upid >> 40, (u32::MAX as u64) & 0xFF_FFFF);
        assert_eq!(upid & 0xFF_FFFF_FFFF, u64::MAX & 0xFF_FFFF_FFFF);
    }

    #[test]
    fn layout_is_aligned() {
        assert_eq!(
            size_of::<EventHeader>() % 8,
            0,
            "wire format should be 8-byte aligned"
        );
    }
}
