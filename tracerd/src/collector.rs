//! The `Collector` object (SPEC_FULL.md §6/§9): owns the loaded BPF program,
//! its maps, and the reassembler's scratch state for the lifetime of one
//! `initialize` call. `shutdown()` is the one piece of process-wide mutable
//! state in this crate by design -- it must be callable from a signal
//! handler, which cannot hold a `&mut Collector`.

use std::borrow::BorrowMut;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use aya::maps::{Array as BpfArray, MapData};
use aya::Ebpf;
use linnix_ai_ebpf_common::{
    EventHeader, EventType, CONFIG_DEBUG_ENABLED, CONFIG_PID_BLACKLIST_BASE,
    CONFIG_SYSTEM_BOOT_NS, MAX_BLACKLIST_ENTRIES, PAYLOAD_BUFFER_ENTRY_SIZE,
};
use log::{info, warn};

use crate::config::Config;
use crate::event_id::EventIdGenerator;
use crate::metrics::Metrics;
use crate::pid_filter::PidFilter;
use crate::runtime::reassembler::{FieldSlice, Reassembler};

/// Process-wide exit flag, the sole exception to "no process-wide mutable
/// state" (SPEC_FULL.md §9). Set from a signal handler via
/// `Collector::shutdown`.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn comm_str(comm: &[u8; 16]) -> String {
    let end = comm.iter().position(|&b| b == 0).unwrap_or(comm.len());
    String::from_utf8_lossy(&comm[..end]).to_string()
}

/// Mirror the current blacklist into the kernel config map's PID slots.
/// Generic over the map handle's ownership so it works both against a
/// `map_mut()` borrow (one-shot setup) and an owned `MapData` taken out of
/// the `Ebpf` object for the lifetime of the drain loop (where `ARENA` is
/// held open as a borrow of the same `Ebpf`, see `initialize`).
fn sync_pid_blacklist<T: BorrowMut<MapData>>(
    pid_filter: &PidFilter,
    config_map: &mut BpfArray<T, u64>,
) -> Result<()> {
    let sorted = pid_filter.sorted_blacklist_for_kernel();
    let padded = sorted.iter().copied().chain(std::iter::repeat(0));
    for (slot, pid) in (0..MAX_BLACKLIST_ENTRIES).zip(padded) {
        config_map.set(CONFIG_PID_BLACKLIST_BASE + slot, pid as u64, 0)?;
    }
    Ok(())
}

/// A single reassembled event, passed to the consumer callback
/// (SPEC_FULL.md §6 callback contract). Rust closures capture their own
/// context, so this plays the role the reference design's `header_ctx`/
/// `payload_ctx` opaque pointers play in a C callback API.
pub struct Event<'a> {
    pub header: EventHeader,
    pub fixed: &'a [u8],
    pub dynamic_fields: &'a [FieldSlice],
    pub payload: &'a [u8],
}

pub struct Collector {
    bpf: Ebpf,
    config: Config,
    metrics: Arc<Metrics>,
    pid_filter: PidFilter,
    event_ids: EventIdGenerator,
}

impl Collector {
    pub fn new(bpf: Ebpf, config: Config, self_pid: u32) -> Self {
        let pid_filter = PidFilter::new(&config.pid_filter, self_pid);
        Self {
            bpf,
            config,
            metrics: Arc::new(Metrics::new()),
            pid_filter,
            event_ids: EventIdGenerator::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Write the clock-alignment offset, debug flag, and initial PID
    /// blacklist into the kernel config map (SPEC_FULL.md §4.6/§4.7).
    pub fn sync_config_map(&mut self) -> Result<()> {
        let boot_ns = crate::clock::compute_boot_offset_ns()?;
        let mut config_map: BpfArray<&mut MapData, u64> = BpfArray::try_from(
            self.bpf.map_mut("CONFIG").context("CONFIG map not found")?,
        )?;
        config_map.set(CONFIG_SYSTEM_BOOT_NS, boot_ns, 0)?;
        config_map.set(CONFIG_DEBUG_ENABLED, self.config.runtime.debug as u64, 0)?;
        sync_pid_blacklist(&self.pid_filter, &mut config_map)
    }

    /// Blocks, draining the header ring and resolving each header's payload
    /// out of the arena, until `shutdown()` is called. Returns 0 on a clean
    /// exit, non-zero otherwise (SPEC_FULL.md §6).
    pub fn initialize<F>(&mut self, mut callback: F) -> i32
    where
        F: FnMut(Event<'_>) -> i32,
    {
        let header_map = match self.bpf.take_map("HEADER_RING") {
            Some(m) => m,
            None => {
                warn!("HEADER_RING map not found");
                return 1;
            }
        };
        let header_map_data: MapData = match header_map.try_into() {
            Ok(m) => m,
            Err(e) => {
                warn!("HEADER_RING is not a plain array map: {e}");
                return 1;
            }
        };
        let mut reassembler = match Reassembler::from_raw_fd(header_map_data.fd().as_raw_fd()) {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to initialize reassembler: {e}");
                return 1;
            }
        };
        reassembler.set_reaper_timeout_ms(self.config.runtime.reaper_timeout_ms);

        // Taken as an owned handle (not `map_mut`) so it doesn't hold a
        // borrow of `self.bpf` for the loop's lifetime -- `ARENA` below
        // needs that borrow to stay immutable and live the whole drain loop.
        let mut config_map: BpfArray<MapData, u64> = match self
            .bpf
            .take_map("CONFIG")
            .context("CONFIG map not found")
            .and_then(|m| MapData::try_from(m).context("CONFIG is not a plain array map"))
            .and_then(|m| BpfArray::try_from(m).context("failed to open CONFIG map"))
        {
            Ok(m) => m,
            Err(e) => {
                warn!("{e:#}");
                return 1;
            }
        };

        let arena_map: BpfArray<&MapData, [u8; PAYLOAD_BUFFER_ENTRY_SIZE as usize]> = match self
            .bpf
            .map("ARENA")
            .context("ARENA map not found")
            .and_then(|m| BpfArray::try_from(m).context("failed to open ARENA map"))
        {
            Ok(m) => m,
            Err(e) => {
                warn!("{e:#}");
                return 1;
            }
        };

        let mut payload_buf = vec![0u8; 64 * 1024];
        let poll_interval = std::time::Duration::from_millis(self.config.runtime.poll_interval_ms);

        info!("collector initialized, entering drain loop");
        while !SHUTDOWN_REQUESTED.load(Ordering::Relaxed) {
            let headers = reassembler.poll_headers(1024, &self.metrics);
            if headers.is_empty() {
                std::thread::sleep(poll_interval);
                self.metrics.rollup();
                continue;
            }

            for mut header in headers {
                if self.pid_filter.is_suppressed(header.pid, header.ppid) {
                    self.metrics.inc_filtered();
                    continue;
                }

                match EventType::from_u32(header.event_type) {
                    Some(EventType::ProcessExec) => {
                        let comm = comm_str(&header.comm);
                        self.pid_filter.on_exec(header.pid, &comm);
                        if let Err(e) = sync_pid_blacklist(&self.pid_filter, &mut config_map) {
                            warn!("failed to re-sync pid filter after exec: {e:#}");
                        }
                    }
                    Some(EventType::ProcessExit) => {
                        self.pid_filter.on_exit(header.pid);
                        if let Err(e) = sync_pid_blacklist(&self.pid_filter, &mut config_map) {
                            warn!("failed to re-sync pid filter after exit: {e:#}");
                        }
                    }
                    _ => {}
                }

                if !self
                    .metrics
                    .record_event(self.config.runtime.events_rate_cap, header.event_type)
                {
                    continue;
                }

                header.event_id = self.event_ids.next_id();

                let reassembled = reassembler.resolve_payload(
                    &header,
                    |idx| arena_map.get(&idx, 0).ok(),
                    &mut payload_buf,
                    &self.metrics,
                );

                let rc = callback(Event {
                    header: reassembled.header,
                    fixed: reassembled.fixed,
                    dynamic_fields: &reassembled.dynamic_fields,
                    payload: reassembled.payload_buf(),
                });
                if rc != 0 {
                    warn!("callback returned {rc}, shutting down");
                    Self::shutdown();
                }
            }
        }

        info!("collector shutting down cleanly");
        0
    }

    /// Request shutdown. Safe to call from a signal handler.
    pub fn shutdown() {
        SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
    }
}
