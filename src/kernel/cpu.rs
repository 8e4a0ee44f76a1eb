/// CPU affinity inherited from `cpu.cfg`
use crate::config::types::{JailError, Result};
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

/// Parse a hexadecimal cpu mask such as `3` or `0x0f`.
pub fn parse_cpu_mask(content: &str) -> Result<u64> {
    let text = content.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let mask = u64::from_str_radix(digits, 16)
        .map_err(|e| JailError::Config(format!("invalid cpu mask {:?}: {}", text, e)))?;
    if mask == 0 {
        return Err(JailError::Config("empty cpu mask".to_string()));
    }
    Ok(mask)
}

/// Cpu indices set in `mask`
pub fn cpus_in_mask(mask: u64) -> Vec<usize> {
    (0..64).filter(|i| mask & (1u64 << i) != 0).collect()
}

/// Restrict the calling process to the cpus in `mask`.
pub fn apply_cpu_mask(mask: u64) -> Result<()> {
    let mut set = CpuSet::new();
    for cpu in cpus_in_mask(mask) {
        set.set(cpu)
            .map_err(|e| JailError::Process(format!("cpu {} out of range: {}", cpu, e)))?;
    }
    sched_setaffinity(Pid::from_raw(0), &set)
        .map_err(|e| JailError::Process(format!("cannot set cpu affinity: {}", e)))?;
    log::debug!("cpu affinity set to {:x}", mask);
    Ok(())
}
