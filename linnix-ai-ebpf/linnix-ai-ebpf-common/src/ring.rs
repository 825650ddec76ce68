//! Header ring buffer (SPEC_FULL.md §4.2): a lock-free, ticket-ordered MPSC
//! ring over a memory-mappable BPF array, one cache-line-pair slot per
//! reservation. This is the reference codebase's own ring mechanism,
//! generalized to carry an `EventHeader` (identity + payload locator)
//! instead of a full fixed-size event, since the payload itself now lives
//! in the per-CPU arena.
//!
//! ARCHITECTURE:
//!   - Multiple kernel producers (one eBPF program instance per CPU)
//!   - Single userspace consumer (the reassembler)
//!   - Strict ordering via an atomic ticket counter
//!   - Cache-line aligned slots to prevent false sharing
//!
//! Slot state machine: `EMPTY -> WRITING` (atomic ticket reservation),
//! `WRITING -> READY` (header commit), `WRITING -> ABANDONED` (reaper
//! intervened on a stalled producer), `READY`/`ABANDONED -> EMPTY`
//! (implicit on wrap; the read-only consumer never writes `EMPTY` back,
//! to avoid cache ping-pong with kernel producers).

use crate::EventHeader;

/// Ring size: 1 Mi slots. Must be a power of 2 for efficient masking.
pub const SEQUENCER_RING_SIZE: u32 = 1024 * 1024;

/// Bit mask for wrapping an index (`RING_SIZE - 1`).
pub const SEQUENCER_RING_MASK: u32 = SEQUENCER_RING_SIZE - 1;

/// Default Reaper timeout: a slot stuck in `WRITING` longer than this is
/// considered stalled and skipped.
pub const REAPER_TIMEOUT_NS: u64 = 10_000_000;

pub mod slot_flags {
    pub const EMPTY: u8 = 0;
    pub const WRITING: u8 = 1;
    pub const READY: u8 = 2;
    pub const ABANDONED: u8 = 3;
}

/// A cache-line-pair-aligned ring slot carrying one `EventHeader`.
///
/// Layout (128 bytes total):
///   `[0]`       flags: u8
///   `[1..8]`    _pad1: padding to the ticket field
///   `[8..16]`   ticket_id: u64
///   `[16..24]`  reserved_at_ns: u64 (for the Reaper)
///   `[24..96]`  header: EventHeader (72 bytes)
///   `[96..128]` _pad2: padding to 128
#[repr(C, align(128))]
#[derive(Copy, Clone)]
pub struct RingSlot {
    pub flags: u8,
    pub _pad1: [u8; 7],
    pub ticket_id: u64,
    pub reserved_at_ns: u64,
    pub header: EventHeader,
    pub _pad2: [u8; 32],
}

impl RingSlot {
    pub const fn zeroed() -> Self {
        Self {
            flags: slot_flags::EMPTY,
            _pad1: [0; 7],
            ticket_id: 0,
            reserved_at_ns: 0,
            header: EventHeader::zeroed(),
            _pad2: [0; 32],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, size_of};

    #[test]
    fn ring_slot_layout() {
        assert_eq!(size_of::<RingSlot>(), 128, "RingSlot must be 128 bytes");
        assert_eq!(align_of::<RingSlot>(), 128, "RingSlot must be 128-byte aligned");
    }

    #[test]
    fn ring_size_is_power_of_two() {
        assert!(SEQUENCER_RING_SIZE.is_power_of_two());
        assert_eq!(SEQUENCER_RING_MASK, SEQUENCER_RING_SIZE - 1);
    }
}
