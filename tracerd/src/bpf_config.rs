//! Derives `TelemetryConfig` (`task_struct`/`mm_struct` field offsets) from
//! the running kernel's BTF, so the eBPF program stays portable across
//! kernel builds (CO-RE) without a generated `vmlinux.h`.

use anyhow::{Context, Result, anyhow};
use btf::btf::{Btf, Struct, Type};
use linnix_ai_ebpf_common::TelemetryConfig;
use std::env;

const KERNEL_BTF_PATH: &str = "/sys/kernel/btf/vmlinux";
const ENV_KERNEL_BTF_PATH: &str = "TRACERD_KERNEL_BTF";

/// Walk `task_struct` and `mm_struct` via BTF and fill in every offset
/// `TelemetryConfig` carries.
pub fn derive_telemetry_config() -> Result<TelemetryConfig> {
    let btf_path = env::var(ENV_KERNEL_BTF_PATH).unwrap_or_else(|_| KERNEL_BTF_PATH.to_string());
    let btf = Btf::from_file(btf_path).context("failed to load kernel BTF metadata")?;

    let task_struct = expect_named_struct(&btf, "task_struct")?;

    let (real_parent_bits, _) = member_offset(task_struct, "real_parent")?;
    let (tgid_bits, _) = member_offset(task_struct, "tgid")?;
    let (pid_bits, _) = member_offset(task_struct, "pid")?;
    let (comm_bits, _) = member_offset(task_struct, "comm")?;
    let (start_boottime_bits, _) = member_offset(task_struct, "start_boottime")?;
    let (mm_bits, mm_type) = member_offset(task_struct, "mm")?;
    let (exit_code_bits, _) = member_offset(task_struct, "exit_code")?;
    let (exit_signal_bits, _) = member_offset(task_struct, "exit_signal")?;

    let mm_struct = resolve_struct_deep(&btf, mm_type)?;
    let (arg_start_bits, _) = member_offset(mm_struct, "arg_start")?;
    let (arg_end_bits, _) = member_offset(mm_struct, "arg_end")?;

    let mut telemetry = TelemetryConfig::zeroed();
    telemetry.task_real_parent_offset = to_bytes(real_parent_bits)?;
    telemetry.task_tgid_offset = to_bytes(tgid_bits)?;
    telemetry.task_pid_offset = to_bytes(pid_bits)?;
    telemetry.task_comm_offset = to_bytes(comm_bits)?;
    telemetry.task_start_boottime_offset = to_bytes(start_boottime_bits)?;
    telemetry.task_mm_offset = to_bytes(mm_bits)?;
    telemetry.mm_arg_start_offset = to_bytes(arg_start_bits)?;
    telemetry.mm_arg_end_offset = to_bytes(arg_end_bits)?;
    telemetry.task_exit_code_offset = to_bytes(exit_code_bits)?;
    telemetry.task_exit_signal_offset = to_bytes(exit_signal_bits)?;

    Ok(telemetry)
}

/// `mm` is a pointer to `mm_struct` on `task_struct`; follow typedefs/
/// qualifiers/pointers until a struct is reached.
fn resolve_struct_deep(btf: &Btf, mut type_id: u32) -> Result<&Struct> {
    for _ in 0..32 {
        let ty = btf
            .get_type_by_id(type_id)
            .with_context(|| format!("failed to resolve type id {type_id}"))?;
        match &ty.base_type {
            Type::Struct(st) => return Ok(st),
            Type::Const(map)
            | Type::Volatile(map)
            | Type::Restrict(map)
            | Type::Typedef(map)
            | Type::TypeTag(map)
            | Type::Pointer(map) => {
                type_id = map.type_id;
            }
            other => {
                return Err(anyhow!(
                    "type id {type_id} does not resolve to a struct ({other:?})"
                ));
            }
        }
    }

    Err(anyhow!(
        "type resolution exceeded while resolving struct for type id {type_id}"
    ))
}

fn expect_named_struct<'a>(btf: &'a Btf, name: &str) -> Result<&'a Struct> {
    let ty = btf
        .get_type_by_name(name)
        .with_context(|| format!("type {name} not found in BTF"))?;
    match &ty.base_type {
        Type::Struct(st) => Ok(st),
        other => Err(anyhow!("type {name} is not a struct (found {:?})", other)),
    }
}

fn member_offset(st: &Struct, name: &str) -> Result<(u32, u32)> {
    st.members
        .iter()
        .find(|member| member.name.as_deref() == Some(name))
        .map(|member| (member.offset, member.type_id))
        .ok_or_else(|| anyhow!("member {name} not found"))
}

fn to_bytes(bits: u32) -> Result<u32> {
    if bits % 8 == 0 {
        Ok(bits / 8)
    } else {
        Err(anyhow!("member offset {bits} is not byte aligned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bytes_roundtrip() {
        assert_eq!(to_bytes(0).unwrap(), 0);
        assert_eq!(to_bytes(8).unwrap(), 1);
        assert!(to_bytes(3).is_err());
    }
}
