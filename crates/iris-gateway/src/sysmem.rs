//! Minimal process memory reporting for `/health` and `/metrics`.
//!
//! Reads `/proc/self/status` directly rather than pulling in a full system
//! inventory crate — the health/metrics surface only ever needs this one
//! process's RSS.

/// Resident set size of this process, in megabytes. `0` if unavailable
/// (non-Linux, or `/proc` unmounted).
pub fn memory_usage_mb() -> u64 {
    memory_usage_bytes() / (1024 * 1024)
}

/// Resident set size of this process, in bytes.
pub fn memory_usage_bytes() -> u64 {
    read_vmrss_kb().map(|kb| kb * 1024).unwrap_or(0)
}

fn read_vmrss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            return rest.trim().split_whitespace().next()?.parse().ok();
        }
    }
    None
}
