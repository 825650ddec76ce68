use bytemuck::{Pod, Zeroable};

/// Closed event-type registry. Values are a reference numbering but must
/// stay stable across releases once chosen; unknown values observed on the
/// wire indicate version skew and are surfaced, never silently dropped.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    ProcessExec = 0,
    ProcessExit = 1,
    SysEnterOpenat = 1024,
    SysExitOpenat = 1025,
    SysEnterRead = 1026,
    SysEnterWrite = 1028,
    VmscanDirectReclaimBegin = 2048,
    OomMarkVictim = 3072,
    /// Not numbered in the reference source; placed adjacent to the OOM
    /// marker since both are memory-pressure signals (implementation-defined,
    /// see SPEC_FULL.md Design Notes, Open Question (d)).
    PsiMemstallEnter = 3073,
}

impl EventType {
    pub const fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::ProcessExec,
            1 => Self::ProcessExit,
            1024 => Self::SysEnterOpenat,
            1025 => Self::SysExitOpenat,
            1026 => Self::SysEnterRead,
            1028 => Self::SysEnterWrite,
            2048 => Self::VmscanDirectReclaimBegin,
            3072 => Self::OomMarkVictim,
            3073 => Self::PsiMemstallEnter,
            _ => return None,
        })
    }

    /// Size in bytes of this event type's fixed payload struct, placed at
    /// the head of its arena slice. Used by the reassembler to know where
    /// the fixed part ends and dynamic-field bytes begin.
    pub const fn fixed_payload_size(self) -> usize {
        match self {
            Self::ProcessExec => core::mem::size_of::<crate::ExecPayload>(),
            Self::ProcessExit => core::mem::size_of::<crate::ExitPayload>(),
            Self::SysEnterOpenat => core::mem::size_of::<crate::OpenatEntryPayload>(),
            Self::SysExitOpenat => core::mem::size_of::<crate::OpenatExitPayload>(),
            Self::SysEnterRead => core::mem::size_of::<crate::ReadEntryPayload>(),
            Self::SysEnterWrite => core::mem::size_of::<crate::WriteEntryPayload>(),
            Self::VmscanDirectReclaimBegin | Self::OomMarkVictim | Self::PsiMemstallEnter => {
                core::mem::size_of::<crate::MarkerPayload>()
            }
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ProcessExec => "process_exec",
            Self::ProcessExit => "process_exit",
            Self::SysEnterOpenat => "sys_enter_openat",
            Self::SysExitOpenat => "sys_exit_openat",
            Self::SysEnterRead => "sys_enter_read",
            Self::SysEnterWrite => "sys_enter_write",
            Self::VmscanDirectReclaimBegin => "vmscan_direct_reclaim_begin",
            Self::OomMarkVictim => "oom_mark_victim",
            Self::PsiMemstallEnter => "psi_memstall_enter",
        }
    }
}

/// Either a recognized event type or a raw value the current build does not
/// know about. A header with an unknown type is still delivered to the
/// callback as a header-only event (see SPEC_FULL.md §7).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Known(EventType),
    Unknown(u32),
}

impl EventKind {
    pub const fn from_raw(raw: u32) -> Self {
        match EventType::from_u32(raw) {
            Some(t) => Self::Known(t),
            None => Self::Unknown(raw),
        }
    }
}

/// Fixed-size header ring entry: identity, timestamp, and a payload locator
/// into the producing CPU's arena band. Reserved before the payload slice is
/// allocated; the reassembler fills `event_id` on receipt (it is always zero
/// on the wire, since it is assigned by the single consumer thread).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct EventHeader {
    pub event_id: u64,
    pub event_type: u32,
    pub _pad0: u32,
    pub timestamp_ns: u64,
    pub pid: u32,
    pub ppid: u32,
    pub upid: u64,
    pub uppid: u64,
    pub comm: [u8; 16],
    /// Start of this event's payload slice within its CPU's arena band.
    pub start_index: u32,
    /// End (exclusive) of this event's payload slice, same band.
    pub end_index: u32,
}

impl EventHeader {
    pub const fn zeroed() -> Self {
        Self {
            event_id: 0,
            event_type: 0,
            _pad0: 0,
            timestamp_ns: 0,
            pid: 0,
            ppid: 0,
            upid: 0,
            uppid: 0,
            comm: [0; 16],
            start_index: 0,
            end_index: 0,
        }
    }

    /// Number of payload entries this header's slice spans, modulo the
    /// arena's per-CPU capacity (SPEC_FULL.md §4.5 step 4).
    pub const fn payload_entries(&self, n_entries_per_cpu: u32) -> u32 {
        let start = self.start_index % n_entries_per_cpu;
        let end = self.end_index % n_entries_per_cpu;
        (end + n_entries_per_cpu - start) % n_entries_per_cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_pod() {
        fn assert_pod<T: Pod + Zeroable>() {}
        assert_pod::<EventHeader>();
    }

    #[test]
    fn payload_entries_handles_wrap() {
        let mut h = EventHeader::zeroed();
        h.start_index = 10;
        h.end_index = 12;
        assert_eq!(h.payload_entries(16), 2);

        // end < start within the band: arena wrapped.
        h.start_index = 14;
        h.end_index = 2;
        assert_eq!(h.payload_entries(16), 4);
    }

    #[test]
    fn payload_entries_zero_is_header_only() {
        let mut h = EventHeader::zeroed();
        h.start_index = 7;
        h.end_index = 7;
        assert_eq!(h.payload_entries(16), 0);
    }

    #[test]
    fn event_kind_roundtrips_known_values() {
        assert_eq!(
            EventKind::from_raw(0),
            EventKind::Known(EventType::ProcessExec)
        );
        assert_eq!(EventKind::from_raw(9_999), EventKind::Unknown(9_999));
    }
}
