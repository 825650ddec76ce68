// let_chains stabilized in Rust 1.82 (Jan 2025)
// Both local stable and Docker stable support it without feature flags

use anyhow::Context;
use aya::programs::{BtfTracePoint, KProbe, TracePoint};
use aya::{Btf, Ebpf, EbpfLoader, Pod};
use aya_log::EbpfLogger;
use caps::{CapSet, Capability};
use clap::Parser;
use linnix_ai_ebpf_common::{EventKind, TelemetryConfig};
use log::{info, warn};
use std::{fs, path::Path, path::PathBuf};

use tracerd::bpf_config::derive_telemetry_config;
use tracerd::collector::{self, Collector};
use tracerd::config::Config;

#[repr(transparent)]
#[derive(Copy, Clone)]
struct TelemetryConfigPod(TelemetryConfig);

unsafe impl Pod for TelemetryConfigPod {}

struct BpfRuntimeGuards {
    _bpf: Ebpf,
    _logger: Option<EbpfLogger>,
}

fn attach_kprobe_internal(bpf: &mut Ebpf, program: &str, symbol: &str) -> anyhow::Result<()> {
    let probe: &mut KProbe = bpf
        .program_mut(program)
        .ok_or_else(|| anyhow::anyhow!("{program} program not found"))?
        .try_into()?;
    probe.load()?;
    probe.attach(symbol, 0)?;
    Ok(())
}

fn attach_tracepoint_internal(
    bpf: &mut Ebpf,
    program: &str,
    category: &str,
    name: &str,
) -> anyhow::Result<()> {
    let tp: &mut TracePoint = bpf
        .program_mut(program)
        .ok_or_else(|| anyhow::anyhow!("{program} program not found"))?
        .try_into()?;
    tp.load()?;
    tp.attach(category, name)?;
    Ok(())
}

fn attach_tracepoint_optional(bpf: &mut Ebpf, program: &str, category: &str, name: &str) {
    if let Err(err) = attach_tracepoint_internal(bpf, program, category, name) {
        warn!("[tracerd] optional tracepoint {category}:{name} ({program}) not attached: {err:?}");
    }
}

fn attach_btf_tracepoint_optional(
    bpf: &mut Ebpf,
    program: &str,
    tracepoint: &str,
    btf: Option<&Btf>,
) {
    let Some(btf) = btf else {
        warn!("[tracerd] skipping BTF tracepoint {tracepoint} ({program}) - system BTF unavailable");
        return;
    };

    let result = (|| -> anyhow::Result<()> {
        let tp: &mut BtfTracePoint = bpf
            .program_mut(program)
            .ok_or_else(|| anyhow::anyhow!("{program} program not found"))?
            .try_into()?;
        tp.load(tracepoint, btf)?;
        tp.attach()?;
        Ok(())
    })();

    if let Err(err) = result {
        warn!("[tracerd] optional BTF tracepoint {tracepoint} ({program}) not attached: {err:?}");
    }
}

#[derive(Parser, Debug)]
#[command(name = "tracerd")]
#[command(about = "Process and syscall telemetry collector")]
struct Args {
    /// Path to config file
    #[arg(long, value_name = "PATH", default_value = "/etc/tracerd/tracerd.toml")]
    config: PathBuf,
    /// Enable libbpf/eBPF-log debug prints
    #[arg(short = 'v', long = "debug")]
    debug: bool,
}

/// Locate and read the eBPF object from common install/build paths.
fn read_bpf_bytes() -> anyhow::Result<(Vec<u8>, String)> {
    const CANDIDATES: [&str; 10] = [
        "/usr/local/share/tracerd/linnix-ai-ebpf-ebpf",
        "/usr/local/share/tracerd/linnix-ai-ebpf-ebpf.o",
        "target/bpfel-unknown-none/release/linnix-ai-ebpf-ebpf",
        "./target/bpfel-unknown-none/release/linnix-ai-ebpf-ebpf",
        "../target/bpfel-unknown-none/release/linnix-ai-ebpf-ebpf",
        "../../target/bpfel-unknown-none/release/linnix-ai-ebpf-ebpf",
        "target/bpf/linnix-ai-ebpf-ebpf.o",
        "./target/bpf/linnix-ai-ebpf-ebpf.o",
        "../target/bpf/linnix-ai-ebpf-ebpf.o",
        "../../target/bpf/linnix-ai-ebpf-ebpf.o",
    ];

    if let Ok(path) = std::env::var("TRACERD_BPF_PATH") {
        let data = fs::read(&path)?;
        return Ok((data, path));
    }

    for candidate in CANDIDATES {
        if Path::new(candidate).exists() {
            return Ok((fs::read(candidate)?, candidate.to_string()));
        }
    }

    anyhow::bail!(
        "BPF object not found. Set TRACERD_BPF_PATH or install to /usr/local/share/tracerd/"
    );
}

fn init_ebpf(bpf_bytes: &[u8], telemetry_cfg: TelemetryConfig) -> anyhow::Result<BpfRuntimeGuards> {
    let telemetry = TelemetryConfigPod(telemetry_cfg);
    let mut loader = EbpfLoader::new();
    loader.set_global("TELEMETRY_CONFIG", &telemetry, true);
    let mut bpf = loader.load(bpf_bytes)?;

    let logger = match EbpfLogger::init(&mut bpf) {
        Ok(logger) => {
            info!("[tracerd] BPF logger initialized.");
            Some(logger)
        }
        Err(e) => {
            warn!("[tracerd] BPF logger not active: {e}");
            None
        }
    };

    attach_tracepoint_internal(&mut bpf, "handle_exec", "sched", "sched_process_exec")?;
    attach_tracepoint_internal(&mut bpf, "handle_exit", "sched", "sched_process_exit")?;
    attach_tracepoint_internal(
        &mut bpf,
        "handle_openat_enter",
        "syscalls",
        "sys_enter_openat",
    )?;
    attach_tracepoint_internal(
        &mut bpf,
        "handle_openat_exit",
        "syscalls",
        "sys_exit_openat",
    )?;
    attach_tracepoint_internal(&mut bpf, "handle_read_enter", "syscalls", "sys_enter_read")?;
    attach_tracepoint_internal(&mut bpf, "handle_write_enter", "syscalls", "sys_enter_write")?;

    attach_tracepoint_optional(
        &mut bpf,
        "handle_vmscan_direct_reclaim_begin",
        "vmscan",
        "mm_vmscan_direct_reclaim_begin",
    );
    attach_tracepoint_optional(
        &mut bpf,
        "handle_psi_memstall_enter",
        "sched",
        "sched_psi_memstall_enter",
    );

    let btf = match Btf::from_sys_fs() {
        Ok(btf) => Some(btf),
        Err(err) => {
            warn!("[tracerd] failed to load system BTF: {err:?}");
            None
        }
    };
    attach_btf_tracepoint_optional(&mut bpf, "handle_oom_mark_victim", "mark_victim", btf.as_ref());

    info!("[tracerd] all programs attached.");

    Ok(BpfRuntimeGuards {
        _bpf: bpf,
        _logger: logger,
    })
}

fn ensure_environment() -> anyhow::Result<()> {
    check_capabilities()?;
    check_kernel_version(5, 8)?;
    Ok(())
}

fn check_capabilities() -> anyhow::Result<()> {
    let required = [
        Capability::CAP_BPF,
        Capability::CAP_PERFMON,
        Capability::CAP_SYS_ADMIN,
    ];

    for cap in &required {
        let has_cap = caps::has_cap(None, CapSet::Effective, *cap)
            .with_context(|| format!("failed to query capability {cap:?}"))?;
        if !has_cap {
            anyhow::bail!(
                "missing {:?} capability. Grant it with `sudo setcap cap_bpf,cap_perfmon,cap_sys_admin+ep $(command -v tracerd)` and restart.",
                cap
            );
        }
    }

    Ok(())
}

fn check_kernel_version(min_major: u32, min_minor: u32) -> anyhow::Result<()> {
    let release = fs::read_to_string("/proc/sys/kernel/osrelease")
        .context("failed to read /proc/sys/kernel/osrelease")?;
    let version =
        parse_kernel_version(&release).context("unable to parse kernel release string")?;

    if version < (min_major, min_minor) {
        anyhow::bail!(
            "kernel {major}.{minor} lacks tracepoint support; require >= {min_major}.{min_minor}",
            major = version.0,
            minor = version.1,
            min_major = min_major,
            min_minor = min_minor
        );
    }

    Ok(())
}

fn parse_kernel_version(raw: &str) -> Option<(u32, u32)> {
    let version_part = raw.trim().split('-').next()?;
    let mut segments = version_part.split('.');
    let major = segments.next()?.parse().ok()?;
    let minor = segments.next()?.parse().ok()?;
    Some((major, minor))
}

fn format_event_line(event: &collector::Event<'_>) -> String {
    let kind = EventKind::from_raw(event.header.event_type);
    let name = match kind {
        EventKind::Known(t) => t.name(),
        EventKind::Unknown(raw) => {
            warn!("[tracerd] unknown event type {raw} on wire (version skew)");
            return format!(
                "{ts} unknown(raw={raw}) comm={comm} pid={pid} ppid={ppid}",
                ts = event.header.timestamp_ns,
                comm = comm_str(&event.header.comm),
                pid = event.header.pid,
                ppid = event.header.ppid,
            );
        }
    };

    let detail = match kind {
        EventKind::Known(linnix_ai_ebpf_common::EventType::ProcessExit) if event.fixed.len() >= 8 => {
            let exit_code = i32::from_ne_bytes(event.fixed[0..4].try_into().unwrap());
            let exit_signal = i32::from_ne_bytes(event.fixed[4..8].try_into().unwrap());
            let effective = if exit_code != 0 { exit_code } else { exit_signal };
            effective.to_string()
        }
        EventKind::Known(linnix_ai_ebpf_common::EventType::SysEnterOpenat) => event
            .dynamic_fields
            .first()
            .map(|f| String::from_utf8_lossy(&event.payload[f.offset..f.offset + f.len]).to_string())
            .unwrap_or_default(),
        _ => String::new(),
    };

    let mut line = format!(
        "{ts} {event} {comm} {pid} {ppid} {detail}",
        ts = event.header.timestamp_ns,
        event = name,
        comm = comm_str(&event.header.comm),
        pid = event.header.pid,
        ppid = event.header.ppid,
    );

    if let EventKind::Known(linnix_ai_ebpf_common::EventType::ProcessExec) = kind
        && let Some(field) = event.dynamic_fields.first()
        && !field.is_empty()
    {
        let argv = String::from_utf8_lossy(&event.payload[field.offset..field.offset + field.len])
            .replace('\0', " ");
        line.push('\n');
        line.push_str(argv.trim_end());
    }

    line
}

fn comm_str(comm: &[u8; 16]) -> String {
    let end = comm.iter().position(|&b| b == 0).unwrap_or(comm.len());
    String::from_utf8_lossy(&comm[..end]).to_string()
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.debug { "debug" } else { "info" }),
    )
    .init();

    ensure_environment()?;

    let config = if args.config == PathBuf::from("/etc/tracerd/tracerd.toml") {
        Config::load()
    } else {
        unsafe {
            std::env::set_var("TRACERD_CONFIG", &args.config);
        }
        Config::load()
    };

    let telemetry_cfg = derive_telemetry_config()?;
    let (bpf_bytes, bpf_path) = read_bpf_bytes()?;
    info!("[tracerd] loaded eBPF object from {bpf_path}");

    let guards = init_ebpf(&bpf_bytes, telemetry_cfg)?;

    let self_pid = std::process::id();
    let mut collector = Collector::new(guards._bpf, config, self_pid);
    collector.sync_config_map()?;

    ctrlc::set_handler(Collector::shutdown).context("failed to install signal handler")?;

    let rc = collector.initialize(|event| {
        println!("{}", format_event_line(&event));
        0
    });

    drop(guards._logger);
    std::process::exit(rc);
}
