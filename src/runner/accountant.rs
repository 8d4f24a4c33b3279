//! Resource accounting
//!
//! Wall-clock time around a closure and one resident-memory sample of the
//! host process taken afterwards. The memory figure covers the whole process,
//! not just the measured work.

use std::fs;
use std::time::Instant;

use thiserror::Error;

/// procfs file holding `VmRSS`
pub const PROC_STATUS: &str = "/proc/self/status";

/// Accounting failures
#[derive(Debug, Error)]
pub enum AccountingError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no VmRSS entry in process status")]
    MissingRss,

    #[error("malformed VmRSS entry: {0}")]
    Malformed(String),
}

/// A value with the resources spent producing it
#[derive(Debug, Clone, PartialEq)]
pub struct Measured<T> {
    pub value: T,
    /// Whole milliseconds
    pub elapsed_ms: u64,
    /// Resident memory in MiB, two decimals
    pub memory_mb: f64,
}

/// Time `f` and sample resident memory once it returns
pub fn measure<T, F>(f: F) -> Result<Measured<T>, AccountingError>
where
    F: FnOnce() -> T,
{
    let started = Instant::now();
    let value = f();
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let memory_mb = to_megabytes(resident_memory_bytes()?);
    Ok(Measured {
        value,
        elapsed_ms,
        memory_mb,
    })
}

/// Like [`measure`] for fallible work; memory is sampled only on success
pub fn try_measure<T, E, F>(f: F) -> Result<Measured<T>, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<AccountingError>,
{
    let started = Instant::now();
    let value = f()?;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let memory_mb = to_megabytes(resident_memory_bytes()?);
    Ok(Measured {
        value,
        elapsed_ms,
        memory_mb,
    })
}

/// Resident set size of this process, in bytes
pub fn resident_memory_bytes() -> Result<u64, AccountingError> {
    let status = fs::read_to_string(PROC_STATUS).map_err(|source| AccountingError::Io {
        path: PROC_STATUS,
        source,
    })?;
    parse_vm_rss(&status)
}

/// Extract `VmRSS` from `/proc/<pid>/status` text, in bytes
pub fn parse_vm_rss(status: &str) -> Result<u64, AccountingError> {
    let line = status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .ok_or(AccountingError::MissingRss)?;

    let mut parts = line["VmRSS:".len()..].split_whitespace();
    let kib: u64 = parts
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| AccountingError::Malformed(line.to_string()))?;
    match parts.next() {
        Some("kB") | None => Ok(kib.saturating_mul(1024)),
        Some(_) => Err(AccountingError::Malformed(line.to_string())),
    }
}

/// Bytes to MiB, rounded to two decimals
pub fn to_megabytes(bytes: u64) -> f64 {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    (mb * 100.0).round() / 100.0
}
