//! Resource spec parsing shared across drivers.

use super::{DriverError, DriverResult};

const MIN_MEMORY_BYTES: u64 = 128 * 1024 * 1024;
const MIN_DISK_BYTES: u64 = 1024 * 1024 * 1024;

/// Parse a size string (`512m`, `1g`, `256Mi`, bare bytes) into bytes.
///
/// Docker-style suffixes (`k/kb`, `m/mb`, `g/gb`, any case) and Kubernetes
/// binary units (`Ki/Mi/Gi`) are both accepted here; whether a given unit is
/// legal for a backend is the driver's decision.
pub fn parse_size(input: &str) -> DriverResult<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DriverError::InvalidSpec("empty size string".to_string()));
    }

    let lower = s.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(d) = lower.strip_suffix("ki") {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix("mi") {
        (d, 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix("gi") {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix("kb") {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix("mb") {
        (d, 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix("gb") {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix('k') {
        (d, 1024)
    } else if let Some(d) = lower.strip_suffix('m') {
        (d, 1024 * 1024)
    } else if let Some(d) = lower.strip_suffix('g') {
        (d, 1024 * 1024 * 1024)
    } else {
        (lower.as_str(), 1)
    };

    let value: u64 = digits.trim().parse().map_err(|_| {
        DriverError::InvalidSpec(format!("invalid size string: '{input}'"))
    })?;

    Ok(value * multiplier)
}

/// Parse memory and raise it to the 128 MiB floor.
pub fn memory_bytes(input: &str) -> DriverResult<u64> {
    Ok(parse_size(input)?.max(MIN_MEMORY_BYTES))
}

/// Parse disk and raise it to the 1 GiB floor.
pub fn disk_bytes(input: &str) -> DriverResult<u64> {
    Ok(parse_size(input)?.max(MIN_DISK_BYTES))
}

/// Reject memory units Kubernetes would misread.
///
/// In Kubernetes `512m` means 0.512 bytes (milli-bytes), not 512 MiB, so the
/// Docker-style lowercase suffixes must never reach the API. Only binary
/// units (`Ki`/`Mi`/`Gi`) or a bare byte count are allowed.
pub fn validate_memory_for_kubernetes(memory: &str) -> DriverResult<()> {
    let s = memory.trim();
    if s.is_empty() {
        return Err(DriverError::InvalidSpec("empty memory string".to_string()));
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    if s.ends_with("Ki") || s.ends_with("Mi") || s.ends_with("Gi") {
        let digits = &s[..s.len() - 2];
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return Ok(());
        }
    }
    Err(DriverError::InvalidSpec(format!(
        "memory '{s}' is not a valid Kubernetes quantity: use a binary unit \
         suffix such as Mi or Gi ('512m' means milli-bytes, not mebibytes)"
    )))
}
