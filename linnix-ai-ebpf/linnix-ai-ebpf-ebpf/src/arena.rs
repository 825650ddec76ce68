//! Per-CPU payload arena: a bump allocator over a flat global array map.
//!
//! The array is sized `MAX_CPUS * PAYLOAD_BUFFER_N_ENTRIES_PER_CPU` entries
//! of `PAYLOAD_BUFFER_ENTRY_SIZE` bytes each; CPU `c` owns the contiguous
//! byte range `[c * band_bytes(), (c+1) * band_bytes())`. A "page" in the
//! rollover sense is one full lap of a CPU's band: the cursor advances
//! byte-by-byte within the band and wraps to zero either when the next
//! allocation would not fit before the end of the band, or when the
//! current lap has been open longer than `PAYLOAD_FLUSH_TIMEOUT_NS`.

use aya_ebpf::{
    helpers::{bpf_probe_read_kernel_buf, bpf_probe_read_user_buf},
    macros::map,
    maps::{Array, PerCpuArray},
};
use linnix_ai_ebpf_common::{
    arena_total_entries, PAYLOAD_BUFFER_ENTRY_SIZE, PAYLOAD_BUFFER_N_ENTRIES_PER_CPU,
    PAYLOAD_FLUSH_TIMEOUT_NS,
};

/// Bound on how many entry-sized chunks a single arena write may touch.
/// `WRITE_CONTENT_MAX_SIZE` (32768) / `PAYLOAD_BUFFER_ENTRY_SIZE` (64) is
/// 512; one extra chunk covers a non-entry-aligned start offset.
const MAX_WRITE_CHUNKS: u32 = 513;

#[map(name = "ARENA")]
static mut ARENA: Array<[u8; PAYLOAD_BUFFER_ENTRY_SIZE as usize]> =
    Array::with_max_entries(arena_total_entries(), 0);

#[repr(C)]
#[derive(Copy, Clone)]
struct ArenaCursor {
    /// Byte offset of the bump pointer within this CPU's band.
    byte_offset: u32,
    /// `bpf_ktime_get_ns()` timestamp of when the current lap started.
    page_start_ns: u64,
}

impl ArenaCursor {
    const fn zeroed() -> Self {
        Self {
            byte_offset: 0,
            page_start_ns: 0,
        }
    }
}

#[map(name = "ARENA_CURSOR")]
static mut ARENA_CURSOR: PerCpuArray<ArenaCursor> = PerCpuArray::with_max_entries(1, 0);

const fn band_bytes() -> u32 {
    PAYLOAD_BUFFER_N_ENTRIES_PER_CPU * PAYLOAD_BUFFER_ENTRY_SIZE
}

/// Rounds up to a whole number of entries so every allocation starts on an
/// entry boundary; `global_entry_index()` would otherwise lose the intra-entry
/// offset of any allocation that doesn't begin at one.
#[inline(always)]
const fn align_up_entry(n: u32) -> u32 {
    (n + PAYLOAD_BUFFER_ENTRY_SIZE - 1) & !(PAYLOAD_BUFFER_ENTRY_SIZE - 1)
}

/// A reserved byte range within one CPU's arena band.
pub struct ArenaSlice {
    pub cpu: u32,
    /// Byte offset local to the CPU's band.
    pub local_start: u32,
    pub len: u32,
}

impl ArenaSlice {
    /// Absolute byte index in the flat arena (the form descriptors use).
    pub fn global_byte_index(&self) -> u32 {
        self.cpu * band_bytes() + self.local_start
    }

    /// Entry index local to the CPU's band.
    pub fn local_entry_index(&self) -> u32 {
        self.local_start / PAYLOAD_BUFFER_ENTRY_SIZE
    }

    pub fn local_end_entry_index(&self) -> u32 {
        (self.local_start + self.len + PAYLOAD_BUFFER_ENTRY_SIZE - 1) / PAYLOAD_BUFFER_ENTRY_SIZE
    }

    /// Flat entry index across the whole arena (the form header locators
    /// use): `cpu * entries_per_cpu + local_entry_index()`. Headers carry no
    /// separate CPU field, so this is how the reassembler recovers which
    /// CPU's band a slice belongs to (`global_entry_index() / entries_per_cpu`).
    pub fn global_entry_index(&self) -> u32 {
        self.global_byte_index() / PAYLOAD_BUFFER_ENTRY_SIZE
    }

    pub fn global_end_entry_index(&self) -> u32 {
        (self.global_byte_index() + self.len + PAYLOAD_BUFFER_ENTRY_SIZE - 1) / PAYLOAD_BUFFER_ENTRY_SIZE
    }

    /// A sub-range `[offset, offset+len)` within this reserved slice, used to
    /// address the fixed struct and each dynamic field independently inside
    /// one combined allocation.
    pub fn sub(&self, offset: u32, len: u32) -> ArenaSlice {
        let clamped_len = core::cmp::min(len, self.len.saturating_sub(offset));
        ArenaSlice {
            cpu: self.cpu,
            local_start: self.local_start + core::cmp::min(offset, self.len),
            len: clamped_len,
        }
    }
}

/// Reserve `size` bytes in CPU `cpu`'s band, rolling the cursor over to a
/// fresh lap first if the allocation would not fit or the current lap is
/// older than the flush timeout. Returns `None` only when `size` exceeds
/// the whole band (the verifier-provable failure case from SPEC_FULL.md
/// §4.1); map-lookup failure against `ARENA_CURSOR` is treated the same way
/// since it cannot be distinguished from a real allocator fault here.
pub fn arena_alloc(cpu: u32, size: u32, now_ns: u64) -> Option<ArenaSlice> {
    if size == 0 || size > band_bytes() {
        return None;
    }
    let cursor_ptr = unsafe { ARENA_CURSOR.get_ptr_mut(0) }?;
    let cursor = unsafe { &mut *cursor_ptr };

    let aligned = align_up_entry(size);
    let would_overflow = cursor
        .byte_offset
        .checked_add(aligned)
        .map_or(true, |end| end > band_bytes());
    let timed_out =
        cursor.page_start_ns != 0 && now_ns.saturating_sub(cursor.page_start_ns) > PAYLOAD_FLUSH_TIMEOUT_NS;

    if would_overflow || timed_out {
        let slack = band_bytes() - cursor.byte_offset;
        if slack >= 8 {
            zero_arena_range(cpu, cursor.byte_offset, 8);
        }
        cursor.byte_offset = 0;
        cursor.page_start_ns = now_ns;
    } else if cursor.page_start_ns == 0 {
        cursor.page_start_ns = now_ns;
    }

    let local_start = cursor.byte_offset;
    cursor.byte_offset += aligned;
    Some(ArenaSlice {
        cpu,
        local_start,
        len: size,
    })
}

#[inline(always)]
fn entry_for(cpu: u32, local_offset: u32) -> (u32, u32) {
    let entry_local = local_offset / PAYLOAD_BUFFER_ENTRY_SIZE;
    let intra = local_offset % PAYLOAD_BUFFER_ENTRY_SIZE;
    (cpu * PAYLOAD_BUFFER_N_ENTRIES_PER_CPU + entry_local, intra)
}

fn zero_arena_range(cpu: u32, local_offset: u32, len: u32) {
    let mut written = 0u32;
    let mut offset = local_offset;
    for _ in 0..2u32 {
        if written >= len {
            break;
        }
        let (global_idx, intra) = entry_for(cpu, offset);
        let chunk = core::cmp::min(len - written, PAYLOAD_BUFFER_ENTRY_SIZE - intra);
        if let Some(slot_ptr) = unsafe { ARENA.get_ptr_mut(global_idx) } {
            for b in 0..chunk {
                unsafe {
                    core::ptr::write_volatile((slot_ptr as *mut u8).add((intra + b) as usize), 0u8);
                }
            }
        }
        written += chunk;
        offset += chunk;
    }
}

/// Copies up to `len` bytes from user memory at `src` into the arena
/// starting at `slice`'s reserved range. Returns the number of bytes
/// actually written (0 on the first failed chunk).
pub fn write_user_bytes(slice: &ArenaSlice, src: *const u8, len: u32) -> u32 {
    write_chunks(slice, len, |dst, chunk_offset, chunk_len| unsafe {
        let user_ptr = src.add(chunk_offset as usize);
        let dst_slice = core::slice::from_raw_parts_mut(dst, chunk_len as usize);
        bpf_probe_read_user_buf(user_ptr, dst_slice).is_ok()
    })
}

/// Copies up to `len` bytes from kernel memory at `src` (typically a
/// stack-local fixed-payload struct) into the arena at `slice`'s range.
pub fn write_kernel_bytes(slice: &ArenaSlice, src: *const u8, len: u32) -> u32 {
    write_chunks(slice, len, |dst, chunk_offset, chunk_len| unsafe {
        let kernel_ptr = src.add(chunk_offset as usize);
        let dst_slice = core::slice::from_raw_parts_mut(dst, chunk_len as usize);
        bpf_probe_read_kernel_buf(kernel_ptr, dst_slice).is_ok()
    })
}

fn write_chunks(
    slice: &ArenaSlice,
    len: u32,
    mut copy_chunk: impl FnMut(*mut u8, u32, u32) -> bool,
) -> u32 {
    let len = core::cmp::min(len, slice.len);
    let mut written = 0u32;
    let mut offset = slice.local_start;
    for _ in 0..MAX_WRITE_CHUNKS {
        if written >= len {
            break;
        }
        let (global_idx, intra) = entry_for(slice.cpu, offset);
        let chunk = core::cmp::min(len - written, PAYLOAD_BUFFER_ENTRY_SIZE - intra);
        let Some(slot_ptr) = (unsafe { ARENA.get_ptr_mut(global_idx) }) else {
            break;
        };
        let dst = unsafe { (slot_ptr as *mut u8).add(intra as usize) };
        if !copy_chunk(dst, written, chunk) {
            break;
        }
        written += chunk;
        offset += chunk;
    }
    written
}
