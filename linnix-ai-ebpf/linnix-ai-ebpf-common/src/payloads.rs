//! Fixed payload structs, one per event type (SPEC_FULL.md §4.3/§4.4). Each
//! is placed at the head of an event's arena slice; any variable-length
//! field is a `Descriptor` inline here, resolved by the reassembler against
//! the bytes that follow in the same slice.

use bytemuck::{Pod, Zeroable};

/// `process_exec`: argv is a null-separated string block, e.g. `"a\0bb\0ccc\0"`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecPayload {
    /// Descriptor for the argv block.
    pub argv: u64,
    /// Descriptor for an environment-prefix scan match, when the
    /// `env-scan` build toggle is enabled (SPEC_FULL.md §9 Open Question c).
    /// Zero (absent) otherwise.
    pub env_match: u64,
}

impl ExecPayload {
    pub const fn zeroed() -> Self {
        Self {
            argv: 0,
            env_match: 0,
        }
    }
}

/// `process_exit`: `exit_code`, falling back to `exit_signal` when zero.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct ExitPayload {
    pub exit_code: i32,
    pub exit_signal: i32,
}

impl ExitPayload {
    pub const fn zeroed() -> Self {
        Self {
            exit_code: 0,
            exit_signal: 0,
        }
    }

    /// The value the consumer should treat as "the" exit status: `exit_code`
    /// unless it is zero, in which case `exit_signal`.
    pub const fn effective_code(&self) -> i32 {
        if self.exit_code != 0 {
            self.exit_code
        } else {
            self.exit_signal
        }
    }
}

/// `sys_enter_openat`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct OpenatEntryPayload {
    pub dfd: i32,
    pub flags: u32,
    pub mode: u32,
    pub _pad: u32,
    /// Descriptor for the null-terminated filename string.
    pub filename: u64,
}

impl OpenatEntryPayload {
    pub const fn zeroed() -> Self {
        Self {
            dfd: 0,
            flags: 0,
            mode: 0,
            _pad: 0,
            filename: 0,
        }
    }
}

/// `sys_exit_openat`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct OpenatExitPayload {
    pub fd: i32,
    pub _pad: u32,
}

impl OpenatExitPayload {
    pub const fn zeroed() -> Self {
        Self { fd: 0, _pad: 0 }
    }
}

/// `sys_enter_read`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadEntryPayload {
    pub fd: u32,
    pub _pad: u32,
    pub count: u64,
}

impl ReadEntryPayload {
    pub const fn zeroed() -> Self {
        Self {
            fd: 0,
            _pad: 0,
            count: 0,
        }
    }
}

/// `sys_enter_write`. `content` is only populated when `fd` is 1 (stdout) or
/// 2 (stderr); otherwise it stays the zero (absent) descriptor.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteEntryPayload {
    pub fd: u32,
    pub _pad: u32,
    pub count: u64,
    pub content: u64,
}

impl WriteEntryPayload {
    pub const fn zeroed() -> Self {
        Self {
            fd: 0,
            _pad: 0,
            count: 0,
            content: 0,
        }
    }

    /// Whether this fd is eligible for content capture under SPEC_FULL.md §4.3.
    pub const fn captures_content(fd: u32) -> bool {
        fd == 1 || fd == 2
    }
}

/// Marker events (`vmscan_direct_reclaim_begin`, `oom_mark_victim`,
/// `psi_memstall_enter`): no fixed fields beyond the header; payload is
/// empty unless the running kernel exposes additional context.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct MarkerPayload {
    pub _reserved: u64,
}

impl MarkerPayload {
    pub const fn zeroed() -> Self {
        Self { _reserved: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_payload_prefers_exit_code() {
        let p = ExitPayload {
            exit_code: 1,
            exit_signal: 9,
        };
        assert_eq!(p.effective_code(), 1);
    }

    #[test]
    fn exit_payload_falls_back_to_signal() {
        let p = ExitPayload {
            exit_code: 0,
            exit_signal: 9,
        };
        assert_eq!(p.effective_code(), 9);
    }

    #[test]
    fn write_content_capture_is_limited_to_stdio() {
        assert!(WriteEntryPayload::captures_content(1));
        assert!(WriteEntryPayload::captures_content(2));
        assert!(!WriteEntryPayload::captures_content(3));
        assert!(!WriteEntryPayload::captures_content(0));
    }
}
