use bytemuck::{Pod, Zeroable};

/// `task_struct` field offsets, discovered via BTF at load time so the
/// kernel program stays portable across kernel builds (CO-RE) without
/// depending on a generated `vmlinux.h`. Passed into the eBPF program as a
/// global (`EbpfLoader::set_global`), mirroring the reference codebase's own
/// `TelemetryConfig` mechanism, trimmed to the fields the tracepoint
/// handlers in this roster actually read.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct TelemetryConfig {
    /// Offset of `real_parent` in `task_struct` (parent task pointer).
    pub task_real_parent_offset: u32,
    /// Offset of `tgid` in `task_struct` (thread-group id, i.e. `pid`).
    pub task_tgid_offset: u32,
    /// Offset of `pid` in `task_struct` (thread id).
    pub task_pid_offset: u32,
    /// Offset of `comm` in `task_struct` (16-byte process name).
    pub task_comm_offset: u32,
    /// Offset of `start_boottime` in `task_struct` (ns since boot, stable
    /// across the process lifetime; the `start_time_ns` half of `upid`).
    pub task_start_boottime_offset: u32,
    /// Offset of `mm` in `task_struct` (pointer to `mm_struct`).
    pub task_mm_offset: u32,
    /// Offset of `arg_start` in `mm_struct` (start of argv in user memory).
    pub mm_arg_start_offset: u32,
    /// Offset of `arg_end` in `mm_struct` (end of argv in user memory).
    pub mm_arg_end_offset: u32,
    /// Offset of `exit_code` in `task_struct`.
    pub task_exit_code_offset: u32,
    /// Offset of `exit_signal` in `task_struct`.
    pub task_exit_signal_offset: u32,
}

impl TelemetryConfig {
    pub const fn zeroed() -> Self {
        Self {
            task_real_parent_offset: 0,
            task_tgid_offset: 0,
            task_pid_offset: 0,
            task_comm_offset: 0,
            task_start_boottime_offset: 0,
            task_mm_offset: 0,
            mm_arg_start_offset: 0,
            mm_arg_end_offset: 0,
            task_exit_code_offset: 0,
            task_exit_signal_offset: 0,
        }
    }
}

#[cfg(feature = "user")]
#[allow(dead_code)]
fn assert_telemetry_config_traits() {
    fn assert_traits<T: Pod + Zeroable>() {}
    assert_traits::<TelemetryConfig>();
}
