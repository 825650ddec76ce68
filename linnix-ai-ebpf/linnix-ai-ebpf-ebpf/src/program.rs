use aya_ebpf::{
    helpers::{bpf_get_current_task_btf, bpf_get_current_pid_tgid, bpf_get_smp_processor_id, bpf_ktime_get_ns},
    macros::{tracepoint, btf_tracepoint},
    programs::{BtfTracePointContext, TracePointContext},
};
use linnix_ai_ebpf_common::{
    make_upid, Descriptor, EventHeader, EventType, ExecPayload, ExitPayload, MarkerPayload,
    OpenatEntryPayload, OpenatExitPayload, ReadEntryPayload, WriteEntryPayload, ARGV_MAX_SIZE,
    FILENAME_MAX_SIZE, WRITE_CONTENT_MAX_SIZE,
};

use crate::arena::{arena_alloc, write_kernel_bytes, write_user_bytes, ArenaSlice};
use crate::config::{boot_ns_offset, is_blacklisted};
use crate::identity::{
    argv_range, load_config, parent_identity, read_exit_status, read_task_comm,
    read_task_start_boottime, TaskStruct,
};
use crate::ring::{commit_slot, reserve_slot};

/// Offsets common to every `sys_enter_*`/`sys_exit_*` tracepoint format: an
/// 8-byte common header, an 8-byte syscall-nr slot, then up to 6 args (or
/// the return value for `sys_exit_*`), each 8 bytes regardless of the
/// argument's real width.
const SYS_ARG0_OFFSET: usize = 16;
const SYS_ARG1_OFFSET: usize = 24;
const SYS_ARG2_OFFSET: usize = 32;
const SYS_ARG3_OFFSET: usize = 40;
const SYS_EXIT_RET_OFFSET: usize = 16;

fn tp_read_u64(ctx: &TracePointContext, offset: usize) -> Option<u64> {
    unsafe { ctx.read_at::<u64>(offset).ok() }
}

fn tp_read_i64(ctx: &TracePointContext, offset: usize) -> Option<i64> {
    unsafe { ctx.read_at::<i64>(offset).ok() }
}

/// Identity captured by the common prologue (SPEC_FULL.md §4.3): thread-group
/// id, parent thread-group id, wall-clock timestamp, `comm`, and the
/// PID-reuse-proof `upid`/`uppid` pair.
struct Identity {
    pid: u32,
    ppid: u32,
    comm: [u8; 16],
    upid: u64,
    uppid: u64,
    now_ns: u64,
    cpu: u32,
    task: *const TaskStruct,
}

/// Runs the prologue common to every handler: thread-group-leader check,
/// blacklist short-circuit, identity capture. Returns `None` when the event
/// should be dropped without reserving anything.
fn common_prologue() -> Option<Identity> {
    let pid_tgid = bpf_get_current_pid_tgid();
    let tid = pid_tgid as u32;
    let tgid = (pid_tgid >> 32) as u32;
    if tid != tgid || tgid == 0 {
        // Only the thread-group leader's events are emitted.
        return None;
    }

    let config = load_config();
    let task = unsafe { bpf_get_current_task_btf() } as *const TaskStruct;
    let (ppid, parent_start_ns) = parent_identity(task, &config);

    if is_blacklisted(tgid, ppid) {
        return None;
    }

    let comm = read_task_comm(task, &config);
    let start_ns = read_task_start_boottime(task, &config);
    let upid = make_upid(tgid, start_ns);
    let uppid = make_upid(ppid, parent_start_ns);

    Some(Identity {
        pid: tgid,
        ppid,
        comm,
        upid,
        uppid,
        now_ns: unsafe { bpf_ktime_get_ns() }.wrapping_add(boot_ns_offset()),
        cpu: unsafe { bpf_get_smp_processor_id() },
        task,
    })
}

fn base_header(ident: &Identity, event_type: EventType) -> EventHeader {
    let mut header = EventHeader::zeroed();
    header.event_type = event_type as u32;
    header.timestamp_ns = ident.now_ns;
    header.pid = ident.pid;
    header.ppid = ident.ppid;
    header.upid = ident.upid;
    header.uppid = ident.uppid;
    header.comm = ident.comm;
    header
}

/// Reserves one contiguous arena slice sized `fixed_size + dynamic_cap`,
/// writes `fixed` at its head, and fills in `start_index`/`end_index` on
/// `header`. On allocation failure the header is still submitted with an
/// empty payload (SPEC_FULL.md §4.1 failure semantics).
fn reserve_payload<P: Copy>(
    header: &mut EventHeader,
    cpu: u32,
    now_ns: u64,
    fixed: &P,
    dynamic_cap: u32,
) -> Option<ArenaSlice> {
    let fixed_size = core::mem::size_of::<P>() as u32;
    let slice = arena_alloc(cpu, fixed_size + dynamic_cap, now_ns)?;
    write_kernel_bytes(&slice.sub(0, fixed_size), fixed as *const P as *const u8, fixed_size);
    header.start_index = slice.global_entry_index();
    header.end_index = slice.global_end_entry_index();
    Some(slice)
}

/// Captures up to `cap` bytes of user memory at `user_ptr` into the slice
/// immediately following the fixed struct, returning a descriptor for it
/// (zero/absent if nothing was captured).
fn capture_user_field(slice: &ArenaSlice, fixed_size: u32, user_ptr: u64, cap: u32) -> u64 {
    if user_ptr == 0 || cap == 0 {
        return 0;
    }
    let field_slice = slice.sub(fixed_size, cap);
    let written = write_user_bytes(&field_slice, user_ptr as *const u8, cap);
    if written == 0 {
        0
    } else {
        Descriptor::encode(field_slice.global_byte_index(), written)
    }
}

// ---------------------------------------------------------------------------
// process_exec
// ---------------------------------------------------------------------------

#[tracepoint(category = "sched", name = "sched_process_exec")]
pub fn handle_exec(ctx: TracePointContext) -> u32 {
    let _ = ctx;
    try_handle_exec()
}

fn try_handle_exec() -> u32 {
    let Some(ident) = common_prologue() else {
        return 0;
    };
    let Ok(reservation) = reserve_slot() else {
        return 0;
    };

    let mut header = base_header(&ident, EventType::ProcessExec);
    let fixed = ExecPayload::zeroed();
    let config = load_config();
    let range = argv_range(ident.task, &config);
    let argv_cap = range
        .map(|(s, e)| core::cmp::min((e - s) as u32, ARGV_MAX_SIZE as u32))
        .unwrap_or(0);
    let fixed_size = core::mem::size_of::<ExecPayload>() as u32;

    if let Some(slice) = reserve_payload(&mut header, ident.cpu, ident.now_ns, &fixed, argv_cap) {
        let argv_desc = match range {
            Some((arg_start, _)) => capture_user_field(&slice, fixed_size, arg_start, argv_cap),
            None => 0,
        };
        if argv_desc != 0 {
            write_kernel_bytes(
                &slice.sub(0, fixed_size),
                &argv_desc as *const u64 as *const u8,
                8,
            );
        }
    }

    commit_slot(reservation, &header);
    0
}

// ---------------------------------------------------------------------------
// process_exit
// ---------------------------------------------------------------------------

#[tracepoint(category = "sched", name = "sched_process_exit")]
pub fn handle_exit(ctx: TracePointContext) -> u32 {
    let _ = ctx;
    try_handle_exit()
}

fn try_handle_exit() -> u32 {
    let Some(ident) = common_prologue() else {
        return 0;
    };
    let Ok(reservation) = reserve_slot() else {
        return 0;
    };

    let mut header = base_header(&ident, EventType::ProcessExit);
    let config = load_config();
    let (exit_code, exit_signal) = read_exit_status(ident.task, &config);
    let fixed = ExitPayload {
        exit_code,
        exit_signal,
    };
    reserve_payload(&mut header, ident.cpu, ident.now_ns, &fixed, 0);

    commit_slot(reservation, &header);
    0
}

// ---------------------------------------------------------------------------
// sys_enter_openat / sys_exit_openat
// ---------------------------------------------------------------------------

#[tracepoint(category = "syscalls", name = "sys_enter_openat")]
pub fn handle_openat_enter(ctx: TracePointContext) -> u32 {
    try_handle_openat_enter(&ctx)
}

fn try_handle_openat_enter(ctx: &TracePointContext) -> u32 {
    let Some(ident) = common_prologue() else {
        return 0;
    };
    let Ok(reservation) = reserve_slot() else {
        return 0;
    };
    let dfd = tp_read_i64(ctx, SYS_ARG0_OFFSET).unwrap_or(0) as i32;
    let filename_ptr = tp_read_u64(ctx, SYS_ARG1_OFFSET).unwrap_or(0);
    let flags = tp_read_u64(ctx, SYS_ARG2_OFFSET).unwrap_or(0) as u32;
    let mode = tp_read_u64(ctx, SYS_ARG3_OFFSET).unwrap_or(0) as u32;

    let mut header = base_header(&ident, EventType::SysEnterOpenat);
    let fixed = OpenatEntryPayload {
        dfd,
        flags,
        mode,
        _pad: 0,
        filename: 0,
    };
    let fixed_size = core::mem::size_of::<OpenatEntryPayload>() as u32;
    if let Some(slice) = reserve_payload(
        &mut header,
        ident.cpu,
        ident.now_ns,
        &fixed,
        FILENAME_MAX_SIZE as u32,
    ) {
        let desc = capture_user_field(&slice, fixed_size, filename_ptr, FILENAME_MAX_SIZE as u32);
        if desc != 0 {
            let offset_of_filename = core::mem::offset_of!(OpenatEntryPayload, filename) as u32;
            write_kernel_bytes(
                &slice.sub(offset_of_filename, 8),
                &desc as *const u64 as *const u8,
                8,
            );
        }
    }

    commit_slot(reservation, &header);
    0
}

#[tracepoint(category = "syscalls", name = "sys_exit_openat")]
pub fn handle_openat_exit(ctx: TracePointContext) -> u32 {
    try_handle_openat_exit(&ctx)
}

fn try_handle_openat_exit(ctx: &TracePointContext) -> u32 {
    let Some(ident) = common_prologue() else {
        return 0;
    };
    let Ok(reservation) = reserve_slot() else {
        return 0;
    };
    let fd = tp_read_i64(ctx, SYS_EXIT_RET_OFFSET).unwrap_or(0) as i32;

    let mut header = base_header(&ident, EventType::SysExitOpenat);
    let fixed = OpenatExitPayload { fd, _pad: 0 };
    reserve_payload(&mut header, ident.cpu, ident.now_ns, &fixed, 0);

    commit_slot(reservation, &header);
    0
}

// ---------------------------------------------------------------------------
// sys_enter_read
// ---------------------------------------------------------------------------

#[tracepoint(category = "syscalls", name = "sys_enter_read")]
pub fn handle_read_enter(ctx: TracePointContext) -> u32 {
    try_handle_read_enter(&ctx)
}

fn try_handle_read_enter(ctx: &TracePointContext) -> u32 {
    let Some(ident) = common_prologue() else {
        return 0;
    };
    let Ok(reservation) = reserve_slot() else {
        return 0;
    };
    let fd = tp_read_u64(ctx, SYS_ARG0_OFFSET).unwrap_or(0) as u32;
    let count = tp_read_u64(ctx, SYS_ARG2_OFFSET).unwrap_or(0);

    let mut header = base_header(&ident, EventType::SysEnterRead);
    let fixed = ReadEntryPayload {
        fd,
        _pad: 0,
        count,
    };
    reserve_payload(&mut header, ident.cpu, ident.now_ns, &fixed, 0);

    commit_slot(reservation, &header);
    0
}

// ---------------------------------------------------------------------------
// sys_enter_write
// ---------------------------------------------------------------------------

#[tracepoint(category = "syscalls", name = "sys_enter_write")]
pub fn handle_write_enter(ctx: TracePointContext) -> u32 {
    try_handle_write_enter(&ctx)
}

fn try_handle_write_enter(ctx: &TracePointContext) -> u32 {
    let Some(ident) = common_prologue() else {
        return 0;
    };
    let Ok(reservation) = reserve_slot() else {
        return 0;
    };
    let fd = tp_read_u64(ctx, SYS_ARG0_OFFSET).unwrap_or(0) as u32;
    let buf_ptr = tp_read_u64(ctx, SYS_ARG1_OFFSET).unwrap_or(0);
    let count = tp_read_u64(ctx, SYS_ARG2_OFFSET).unwrap_or(0);

    let mut header = base_header(&ident, EventType::SysEnterWrite);
    let fixed = WriteEntryPayload {
        fd,
        _pad: 0,
        count,
        content: 0,
    };
    let fixed_size = core::mem::size_of::<WriteEntryPayload>() as u32;
    let capture_content = WriteEntryPayload::captures_content(fd);
    let content_cap = if capture_content {
        core::cmp::min(count, WRITE_CONTENT_MAX_SIZE as u64) as u32
    } else {
        0
    };

    if let Some(slice) = reserve_payload(&mut header, ident.cpu, ident.now_ns, &fixed, content_cap)
    {
        if capture_content {
            let desc = capture_user_field(&slice, fixed_size, buf_ptr, content_cap);
            if desc != 0 {
                let offset_of_content = core::mem::offset_of!(WriteEntryPayload, content) as u32;
                write_kernel_bytes(
                    &slice.sub(offset_of_content, 8),
                    &desc as *const u64 as *const u8,
                    8,
                );
            }
        }
    }

    commit_slot(reservation, &header);
    0
}

// ---------------------------------------------------------------------------
// Memory-pressure markers
// ---------------------------------------------------------------------------

fn emit_marker(event_type: EventType) -> u32 {
    let Some(ident) = common_prologue() else {
        return 0;
    };
    let Ok(reservation) = reserve_slot() else {
        return 0;
    };
    let mut header = base_header(&ident, event_type);
    let fixed = MarkerPayload::zeroed();
    reserve_payload(&mut header, ident.cpu, ident.now_ns, &fixed, 0);
    commit_slot(reservation, &header);
    0
}

#[tracepoint(category = "vmscan", name = "mm_vmscan_direct_reclaim_begin")]
pub fn handle_vmscan_direct_reclaim_begin(ctx: TracePointContext) -> u32 {
    let _ = ctx;
    emit_marker(EventType::VmscanDirectReclaimBegin)
}

#[btf_tracepoint(function = "mark_victim")]
pub fn handle_oom_mark_victim(ctx: BtfTracePointContext) -> u32 {
    let _ = ctx;
    emit_marker(EventType::OomMarkVictim)
}

#[tracepoint(category = "sched", name = "sched_psi_memstall_enter")]
pub fn handle_psi_memstall_enter(ctx: TracePointContext) -> u32 {
    let _ = ctx;
    emit_marker(EventType::PsiMemstallEnter)
}

#[cfg(all(not(test), target_arch = "bpf"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";
