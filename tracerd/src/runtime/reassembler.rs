//! Header-ring reassembler (SPEC_FULL.md §4.5): consumes the header ring,
//! resolves each header's payload slice out of the per-CPU arena, walks
//! descriptors, and materializes a typed event for the consumer callback.
//!
//! # Architecture
//!
//! The ring buffer uses a ticket-based protocol:
//! - Kernel producers atomically reserve tickets (sequence numbers)
//! - Each ticket maps to a slot in the ring buffer
//! - The consumer reads slots in strict ticket order
//!
//! # Safety Mechanisms
//!
//! 1. **Strict Ordering**: headers are processed in ticket order (1, 2, 3, ...)
//! 2. **Reaper Timeout**: stalled producers (WRITING state too long) are skipped
//! 3. **Validator**: runtime assertion that ordering is never violated
//!
//! # Performance
//!
//! - **Mmap Mode**: zero-copy access via a memory-mapped BPF array
//!   (`HEADER_RING` requires `BPF_F_MMAPABLE`).
//! - **Huge Pages**: requested via `madvise(MADV_HUGEPAGE)` on the header
//!   ring, which spans many 4 KB pages.
//! - **Read-Only Header Consumer**: we never write `EMPTY` flags back to the
//!   ring, avoiding cache ping-pong with kernel producers.
//!
//! Resolving a header's payload is a separate step: the arena lives in its
//! own flat `ARENA` map, looked up entry-by-entry into a scratch buffer
//! before descriptor resolution (SPEC_FULL.md §4.5 steps 4-6).

#![allow(dead_code)]
use std::io;
use std::os::fd::{BorrowedFd, RawFd};

use linnix_ai_ebpf_common::{
    slot_flags, Descriptor, EventHeader, EventKind, EventType, RingSlot, PAYLOAD_BUFFER_ENTRY_SIZE,
    PAYLOAD_BUFFER_N_ENTRIES_PER_CPU, REAPER_TIMEOUT_NS, SEQUENCER_RING_MASK, SEQUENCER_RING_SIZE,
};
use log::{debug, error, info, warn};
use memmap2::MmapMut;

use crate::metrics::Metrics;

const MADV_HUGEPAGE: libc::c_int = 14;

fn advise_hugepages(ptr: *mut RingSlot, len: usize) {
    let ret = unsafe { libc::madvise(ptr as *mut libc::c_void, len, MADV_HUGEPAGE) };
    if ret == 0 {
        info!(
            "MADV_HUGEPAGE succeeded for header ring ({} MB)",
            len / (1024 * 1024)
        );
    } else {
        let err = io::Error::last_os_error();
        warn!("MADV_HUGEPAGE failed ({err}) - continuing without huge pages");
    }
}

/// Validates strict ticket ordering of incoming headers.
#[derive(Debug, Default)]
pub struct OrderingValidator {
    last_ticket: Option<u64>,
    violations: u64,
}

impl OrderingValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ticket: u64) -> bool {
        if let Some(last) = self.last_ticket
            && ticket != last + 1
        {
            error!(
                "ORDERING VIOLATION: expected ticket {}, got {ticket}",
                last + 1
            );
            self.violations += 1;
            self.last_ticket = Some(ticket);
            return false;
        }
        self.last_ticket = Some(ticket);
        true
    }

    pub fn violations(&self) -> u64 {
        self.violations
    }
}

/// One resolved dynamic field: a borrow into the reassembler's payload
/// output buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldSlice {
    pub offset: usize,
    pub len: usize,
}

impl FieldSlice {
    pub const EMPTY: FieldSlice = FieldSlice { offset: 0, len: 0 };

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A fully reassembled event: the header, its recognized/unknown type, and
/// the resolved dynamic fields, borrowed from the caller-owned payload
/// buffer (SPEC_FULL.md §6 callback contract).
pub struct ReassembledEvent<'a> {
    pub header: EventHeader,
    pub kind: EventKind,
    pub fixed: &'a [u8],
    /// Resolved dynamic fields in descriptor-declaration order for this
    /// event type (e.g. `[argv]` for `process_exec`, `[filename]` for
    /// `sys_enter_openat`, `[content]` for `sys_enter_write`).
    pub dynamic_fields: Vec<FieldSlice>,
    payload_buf: &'a [u8],
}

impl<'a> ReassembledEvent<'a> {
    pub fn field(&self, index: usize) -> &'a [u8] {
        match self.dynamic_fields.get(index) {
            Some(s) if !s.is_empty() => &self.payload_buf[s.offset..s.offset + s.len],
            _ => &[],
        }
    }

    /// The full resolved dynamic-field byte buffer (concatenation of every
    /// non-empty field, in declaration order); use `field()` to slice out
    /// one field, or this when only the raw bytes matter.
    pub fn payload_buf(&self) -> &'a [u8] {
        self.payload_buf
    }
}

/// Consumer for the header ring buffer (mmap'd, zero-copy) plus the per-CPU
/// payload arena (map-lookup access: dynamic content is read far less often
/// than headers and can be much larger than one cache line).
pub struct Reassembler {
    _mmap: MmapMut,
    ring_ptr: *mut RingSlot,
    cursor: u64,
    mask: u64,
    validator: OrderingValidator,
    reaper_timeout_ns: u64,
    n_entries_per_cpu: u32,
    /// Scratch buffer reused across events for the resolved arena bytes.
    scratch: Vec<u8>,
}

// SAFETY: the mmap is process-local and there is exactly one consumer
// thread; `ring_ptr` stays valid as long as `_mmap` is alive.
unsafe impl Send for Reassembler {}

impl Reassembler {
    pub fn from_fd(fd: BorrowedFd<'_>) -> io::Result<Self> {
        let ring_size_bytes = (SEQUENCER_RING_SIZE as usize) * std::mem::size_of::<RingSlot>();
        info!(
            "initializing header-ring reassembler: {} slots, {} MB",
            SEQUENCER_RING_SIZE,
            ring_size_bytes / (1024 * 1024)
        );

        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .len(ring_size_bytes)
                .map_mut(&fd)
                .map_err(|e| {
                    error!(
                        "failed to mmap HEADER_RING: {e}. Ensure the map was created with \
                         BPF_F_MMAPABLE (0x400)."
                    );
                    e
                })?
        };

        let ring_ptr = mmap.as_ptr() as *mut RingSlot;
        advise_hugepages(ring_ptr, ring_size_bytes);

        let mut reassembler = Self {
            _mmap: mmap,
            ring_ptr,
            cursor: 0,
            mask: SEQUENCER_RING_MASK as u64,
            validator: OrderingValidator::new(),
            reaper_timeout_ns: REAPER_TIMEOUT_NS,
            n_entries_per_cpu: PAYLOAD_BUFFER_N_ENTRIES_PER_CPU,
            scratch: Vec::new(),
        };
        reassembler.zero_ring_buffer();
        Ok(reassembler)
    }

    pub fn from_raw_fd(raw_fd: RawFd) -> io::Result<Self> {
        let fd = unsafe { BorrowedFd::borrow_raw(raw_fd) };
        Self::from_fd(fd)
    }

    fn zero_ring_buffer(&mut self) {
        let len = (SEQUENCER_RING_SIZE as usize) * std::mem::size_of::<RingSlot>();
        let start = std::time::Instant::now();
        unsafe {
            core::ptr::write_bytes(self.ring_ptr as *mut u8, 0, len);
        }
        info!("header ring zeroed in {:?}", start.elapsed());
    }

    pub fn set_reaper_timeout_ms(&mut self, timeout_ms: u64) {
        self.reaper_timeout_ns = timeout_ms * 1_000_000;
    }

    fn get_boot_time_ns() -> u64 {
        use nix::time::{clock_gettime, ClockId};
        match clock_gettime(ClockId::CLOCK_BOOTTIME) {
            Ok(ts) => (ts.tv_sec() as u64) * 1_000_000_000 + (ts.tv_nsec() as u64),
            Err(_) => 0,
        }
    }

    /// Poll for a batch of headers (SPEC_FULL.md §4.2/§5 drain discipline).
    /// Read-only: never writes flags back to the ring.
    pub fn poll_headers(&mut self, max_batch_size: usize, metrics: &Metrics) -> Vec<EventHeader> {
        let mut headers = Vec::with_capacity(max_batch_size);
        let now_ns = Self::get_boot_time_ns();

        for _ in 0..max_batch_size {
            let slot_ptr = unsafe { self.ring_ptr.add((self.cursor & self.mask) as usize) };
            let flags = unsafe { core::ptr::read_volatile(&(*slot_ptr).flags) };

            match flags {
                f if f == slot_flags::READY => {
                    let ticket = unsafe { core::ptr::read_volatile(&(*slot_ptr).ticket_id) };
                    if ticket == self.cursor {
                        let header = unsafe { core::ptr::read_volatile(&(*slot_ptr).header) };
                        if !self.validator.check(ticket) {
                            metrics.inc_ordering_violation();
                        }
                        headers.push(header);
                        self.cursor += 1;
                    } else if ticket < self.cursor {
                        break;
                    } else {
                        error!("gap detected: cursor={} slot ticket={ticket}", self.cursor);
                        metrics.inc_ordering_violation();
                        self.cursor = ticket;
                    }
                }
                f if f == slot_flags::WRITING => {
                    let ticket = unsafe { core::ptr::read_volatile(&(*slot_ptr).ticket_id) };
                    if ticket != self.cursor {
                        break;
                    }
                    let reserved_at = unsafe { core::ptr::read_volatile(&(*slot_ptr).reserved_at_ns) };
                    if reserved_at == 0 {
                        break;
                    }
                    if now_ns.saturating_sub(reserved_at) > self.reaper_timeout_ns {
                        warn!(
                            "reaper: slot {} (ticket {ticket}) stuck in WRITING, skipping",
                            self.cursor
                        );
                        metrics.inc_reaped();
                        self.cursor += 1;
                    } else {
                        break;
                    }
                }
                f if f == slot_flags::EMPTY => break,
                f if f == slot_flags::ABANDONED => {
                    debug!("skipping abandoned slot {}", self.cursor);
                    metrics.inc_abandoned();
                    self.cursor += 1;
                }
                _ => {
                    let ticket = unsafe { core::ptr::read_volatile(&(*slot_ptr).ticket_id) };
                    if ticket >= self.cursor {
                        warn!("unknown slot flag at cursor {}", self.cursor);
                    }
                    break;
                }
            }
        }

        headers
    }

    /// Drain up to `max_total` headers, looping `poll_headers` until the
    /// ring is caught up or the cap is hit.
    pub fn drain_headers(&mut self, max_total: usize, metrics: &Metrics) -> Vec<EventHeader> {
        let mut all = Vec::new();
        loop {
            let batch = self.poll_headers(1000, metrics);
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
            if all.len() >= max_total {
                warn!("drain limit reached at {} headers", all.len());
                break;
            }
        }
        all
    }

    /// Resolve a header's payload slice from the arena into the
    /// reassembler's scratch buffer, then materialize it into `payload_out`
    /// as a fixed part plus resolved dynamic fields (SPEC_FULL.md §4.5 steps
    /// 4-6). `arena_read` looks up one arena entry by its flat global index;
    /// it is the caller's map-backed accessor, keeping this module
    /// independent of the specific BPF map handle type.
    ///
    /// Headers carry no separate CPU field; `start_index`/`end_index` are
    /// flat entry indices across the whole arena
    /// (`cpu * n_entries_per_cpu + local_entry`), so the producing CPU is
    /// recovered here via integer division.
    pub fn resolve_payload<'out>(
        &mut self,
        header: &EventHeader,
        arena_read: impl Fn(u32) -> Option<[u8; PAYLOAD_BUFFER_ENTRY_SIZE as usize]>,
        payload_out: &'out mut [u8],
        metrics: &Metrics,
    ) -> ReassembledEvent<'out> {
        let kind = EventKind::from_raw(header.event_type);
        let n = self.n_entries_per_cpu;
        let payload_entries = header.payload_entries(n);

        if payload_entries == 0 {
            return ReassembledEvent {
                header: *header,
                kind,
                fixed: &[],
                dynamic_fields: Vec::new(),
                payload_buf: &[],
            };
        }

        let cpu = header.start_index / n;
        self.scratch.clear();
        let entry_size = PAYLOAD_BUFFER_ENTRY_SIZE;
        self.scratch
            .reserve(payload_entries as usize * entry_size as usize);
        let cpu_base = cpu * n;
        for i in 0..payload_entries {
            let local = (header.start_index + i) % n;
            let global_idx = cpu_base + local;
            match arena_read(global_idx) {
                Some(bytes) => self.scratch.extend_from_slice(&bytes),
                None => {
                    metrics.inc_arena_lookup_failure();
                    self.scratch.extend_from_slice(&[0u8; PAYLOAD_BUFFER_ENTRY_SIZE as usize]);
                }
            }
        }

        let EventKind::Known(event_type) = kind else {
            warn!(
                "unknown event type {} on wire; delivering header-only",
                header.event_type
            );
            return ReassembledEvent {
                header: *header,
                kind,
                fixed: &[],
                dynamic_fields: Vec::new(),
                payload_buf: &[],
            };
        };

        let fixed_size = event_type.fixed_payload_size();
        if fixed_size > self.scratch.len() {
            metrics.inc_descriptor_bounds_violation();
            return ReassembledEvent {
                header: *header,
                kind,
                fixed: &[],
                dynamic_fields: Vec::new(),
                payload_buf: &[],
            };
        }

        let band_bytes = n as u64 * entry_size as u64;
        let scratch_start_local_byte = (header.start_index % n) as u64 * entry_size as u64;
        let cpu_base_bytes = cpu as u64 * band_bytes;

        let descriptors = descriptors_for(event_type, &self.scratch);
        let mut write_offset = 0usize;
        let mut resolved = Vec::with_capacity(descriptors.len());

        for raw in descriptors {
            let Some((byte_index, byte_length)) = Descriptor::decode(raw) else {
                resolved.push(FieldSlice::EMPTY);
                continue;
            };
            if byte_length == 0 {
                resolved.push(FieldSlice::EMPTY);
                continue;
            }

            let local_byte_offset = (byte_index as u64).wrapping_sub(cpu_base_bytes) % band_bytes;
            let rel_to_scratch =
                (local_byte_offset + band_bytes - scratch_start_local_byte) % band_bytes;

            let src_start = rel_to_scratch as usize;
            let src_end = src_start + byte_length as usize;
            if src_end > self.scratch.len() || write_offset + byte_length as usize > payload_out.len() {
                metrics.inc_descriptor_bounds_violation();
                resolved.push(FieldSlice::EMPTY);
                continue;
            }

            payload_out[write_offset..write_offset + byte_length as usize]
                .copy_from_slice(&self.scratch[src_start..src_end]);
            resolved.push(FieldSlice {
                offset: write_offset,
                len: byte_length as usize,
            });
            write_offset += byte_length as usize;
        }

        ReassembledEvent {
            header: *header,
            kind,
            fixed: &self.scratch[..fixed_size],
            dynamic_fields: resolved,
            payload_buf: &payload_out[..write_offset],
        }
    }
}

/// Raw descriptor values declared by `event_type`'s fixed struct, read out of
/// the already-resolved scratch bytes, in the order the consumer should
/// expect them (SPEC_FULL.md §4.4/§6 callback contract).
fn descriptors_for(event_type: EventType, fixed_bytes: &[u8]) -> Vec<u64> {
    fn read_u64(bytes: &[u8], offset: usize) -> u64 {
        u64::from_ne_bytes(bytes[offset..offset + 8].try_into().unwrap())
    }

    match event_type {
        EventType::ProcessExec => vec![read_u64(fixed_bytes, 0)], // argv
        EventType::SysEnterOpenat => {
            let offset = core::mem::offset_of!(linnix_ai_ebpf_common::OpenatEntryPayload, filename);
            vec![read_u64(fixed_bytes, offset)]
        }
        EventType::SysEnterWrite => {
            let offset = core::mem::offset_of!(linnix_ai_ebpf_common::WriteEntryPayload, content);
            vec![read_u64(fixed_bytes, offset)]
        }
        EventType::ProcessExit
        | EventType::SysExitOpenat
        | EventType::SysEnterRead
        | EventType::VmscanDirectReclaimBegin
        | EventType::OomMarkVictim
        | EventType::PsiMemstallEnter => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_validator_detects_gaps() {
        let mut v = OrderingValidator::new();
        assert!(v.check(0));
        assert!(v.check(1));
        assert!(!v.check(5));
        assert_eq!(v.violations(), 1);
    }

    #[test]
    fn ring_slot_alignment() {
        use std::mem::{align_of, size_of};
        assert_eq!(size_of::<RingSlot>(), 128);
        assert_eq!(align_of::<RingSlot>(), 128);
    }

    #[test]
    fn descriptors_for_exec_reads_argv_at_offset_zero() {
        let mut bytes = [0u8; 16];
        let d = Descriptor::encode(100, 9);
        bytes[0..8].copy_from_slice(&d.to_ne_bytes());
        let decoded = descriptors_for(EventType::ProcessExec, &bytes);
        assert_eq!(decoded, vec![d]);
    }

    #[test]
    fn descriptors_for_exit_is_empty() {
        assert!(descriptors_for(EventType::ProcessExit, &[0u8; 8]).is_empty());
    }
}
