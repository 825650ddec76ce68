//! Header ring producer (SPEC_FULL.md §4.2): the reference codebase's own
//! ticket-reserved MPSC ring, generalized to carry an `EventHeader` instead
//! of a full fixed-size event. See `linnix_ai_ebpf_common::ring` for the
//! slot layout and state machine this implements.

use aya_ebpf::macros::map;
use aya_ebpf::maps::Array;
use aya_ebpf::helpers::bpf_ktime_get_ns;
use linnix_ai_ebpf_common::{slot_flags, EventHeader, RingSlot, SEQUENCER_RING_MASK, SEQUENCER_RING_SIZE};

/// `BPF_F_MMAPABLE` (0x400): lets the userspace consumer `mmap()` this map
/// directly for zero-copy access instead of paying a syscall per read.
const BPF_F_MMAPABLE: u32 = 1024;

#[map(name = "HEADER_RING")]
static mut HEADER_RING: Array<RingSlot> = Array::with_max_entries(SEQUENCER_RING_SIZE, BPF_F_MMAPABLE);

/// Cache-line aligned ticket counter, kept as a `.bss` global rather than a
/// map element to avoid a map-lookup helper call on every event (same
/// rationale as the reference codebase's `GLOBAL_SEQUENCER`).
#[repr(C, align(64))]
struct AlignedTicketCounter {
    value: u64,
    _padding: [u8; 56],
}

#[no_mangle]
static mut RING_TICKET: AlignedTicketCounter = AlignedTicketCounter {
    value: 0,
    _padding: [0; 56],
};

#[inline(always)]
unsafe fn atomic_fetch_add_u64(ptr: *mut u64, val: u64) -> u64 {
    core::intrinsics::atomic_xadd_acqrel(ptr, val)
}

/// A reserved, not-yet-committed ring slot. Produced by [`reserve_slot`] before
/// any payload bytes are allocated, so that a reserve failure drops the event
/// wholesale with zero arena bytes spent (SPEC_FULL.md §3, §4.2).
pub struct RingReservation {
    slot_ptr: *mut RingSlot,
    ticket: u64,
}

/// Reserve a ring slot and mark it `WRITING`. Returns `Err` when the slot
/// pointer cannot be resolved; the caller must drop the event wholesale on
/// failure and must not allocate a payload slice.
pub fn reserve_slot() -> Result<RingReservation, i64> {
    let ticket_ptr = unsafe { &raw mut RING_TICKET.value };
    let ticket = unsafe { atomic_fetch_add_u64(ticket_ptr, 1) };
    let slot_idx = (ticket & (SEQUENCER_RING_MASK as u64)) as u32;
    let slot_ptr = unsafe { HEADER_RING.get_ptr_mut(slot_idx) }.ok_or(-2i64)?;

    let now = unsafe { bpf_ktime_get_ns() };
    unsafe {
        core::ptr::write_volatile(&mut (*slot_ptr).flags, slot_flags::WRITING);
        core::ptr::write_volatile(&mut (*slot_ptr).ticket_id, ticket);
        core::ptr::write_volatile(&mut (*slot_ptr).reserved_at_ns, now);
    }

    Ok(RingReservation { slot_ptr, ticket })
}

/// Write `header` into a previously reserved slot and flip it `READY`. Call
/// only after the payload (if any) has been allocated and written.
pub fn commit_slot(reservation: RingReservation, header: &EventHeader) {
    #[cfg(feature = "fault-injection")]
    {
        if (reservation.ticket % 10_000) == 0 {
            return;
        }
    }

    unsafe {
        core::ptr::write_volatile(&mut (*reservation.slot_ptr).header, *header);
        core::ptr::write_volatile(&mut (*reservation.slot_ptr).flags, slot_flags::READY);
    }
}
