//! `task_struct`/`mm_struct` field access via CO-RE offsets discovered by
//! userspace at load time (SPEC_FULL.md §9, "Unsafe shared-memory layouts").
//! Mirrors the reference codebase's own dynamic-offset reading approach,
//! trimmed and extended to the fields this roster's handlers need.

use aya_ebpf::helpers::bpf_probe_read;
use linnix_ai_ebpf_common::TelemetryConfig;

#[no_mangle]
static mut TELEMETRY_CONFIG: TelemetryConfig = TelemetryConfig::zeroed();

pub fn load_config() -> TelemetryConfig {
    unsafe { core::ptr::read_volatile(&TELEMETRY_CONFIG) }
}

/// Opaque `task_struct` pointer; fields are read via `bpf_probe_read` at
/// BTF-discovered offsets rather than a generated `vmlinux.h` layout.
#[repr(C)]
pub struct TaskStruct {
    _opaque: [u8; 0],
}

fn read_field<T: Copy>(base: *const u8, offset: u32) -> Option<T> {
    if base.is_null() || offset == 0 {
        return None;
    }
    let ptr = unsafe { base.add(offset as usize) as *const T };
    unsafe { bpf_probe_read(ptr).ok() }
}

fn read_ptr(base: *const u8, offset: u32) -> Option<*const u8> {
    let addr: usize = read_field(base, offset)?;
    if addr == 0 {
        None
    } else {
        Some(addr as *const u8)
    }
}

pub fn read_task_pid(task: *const TaskStruct, config: &TelemetryConfig) -> u32 {
    read_field::<i32>(task as *const u8, config.task_tgid_offset).unwrap_or(0) as u32
}

pub fn read_task_comm(task: *const TaskStruct, config: &TelemetryConfig) -> [u8; 16] {
    read_field(task as *const u8, config.task_comm_offset).unwrap_or([0u8; 16])
}

pub fn read_task_start_boottime(task: *const TaskStruct, config: &TelemetryConfig) -> u64 {
    read_field(task as *const u8, config.task_start_boottime_offset).unwrap_or(0)
}

/// `(ppid, parent_start_boottime_ns)`, both needed to build `uppid`. Reads
/// the parent `task_struct` once and pulls both fields from it.
pub fn parent_identity(task: *const TaskStruct, config: &TelemetryConfig) -> (u32, u64) {
    let Some(parent) = read_ptr(task as *const u8, config.task_real_parent_offset) else {
        return (0, 0);
    };
    let tgid: i32 = read_field(parent, config.task_tgid_offset).unwrap_or(0);
    if tgid <= 0 {
        return (0, 0);
    }
    let start_ns = read_field(parent, config.task_start_boottime_offset).unwrap_or(0);
    (tgid as u32, start_ns)
}

/// `(exit_code, exit_signal)` as recorded on `task_struct` at the time the
/// exit tracepoint fires. Either half reads as 0 if its offset is
/// unconfigured or the probe read fails.
pub fn read_exit_status(task: *const TaskStruct, config: &TelemetryConfig) -> (i32, i32) {
    let exit_code = read_field::<i32>(task as *const u8, config.task_exit_code_offset).unwrap_or(0);
    let exit_signal =
        read_field::<i32>(task as *const u8, config.task_exit_signal_offset).unwrap_or(0);
    (exit_code, exit_signal)
}

/// `[arg_start, arg_end)` in the target process's user address space, read
/// from its `mm_struct`. `None` if any offset is unconfigured or the
/// pointers can't be resolved.
pub fn argv_range(task: *const TaskStruct, config: &TelemetryConfig) -> Option<(u64, u64)> {
    let mm = read_ptr(task as *const u8, config.task_mm_offset)?;
    let arg_start: u64 = read_field(mm, config.mm_arg_start_offset)?;
    let arg_end: u64 = read_field(mm, config.mm_arg_end_offset)?;
    if arg_end <= arg_start {
        return None;
    }
    Some((arg_start, arg_end))
}
