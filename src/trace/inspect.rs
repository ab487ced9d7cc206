//! Human-readable rendering of the binary streams.
//!
//! Decodes a stream file and prints one JSON object per record, so sidecars,
//! BB-vector files, and traces can be eyeballed or piped into `jq` while
//! debugging an instrumented build.

use std::io::Write;
use std::path::Path;

use crate::error::Error;
use crate::trace;

/// Dumps a sidecar file as JSON lines. Returns the record count.
pub fn dump_sidecar(path: &Path, mut out: impl Write) -> Result<usize, Error> {
    let records = trace::read_sidecar(path)?;
    for rec in &records {
        serde_json::to_writer(&mut out, rec).map_err(std::io::Error::from)?;
        writeln!(out)?;
    }
    Ok(records.len())
}

/// Dumps a SimPoint BB-vector file as JSON lines. Returns the window count.
pub fn dump_bb_windows(path: &Path, mut out: impl Write) -> Result<usize, Error> {
    let windows = trace::read_bb_windows(path)?;
    for w in &windows {
        serde_json::to_writer(&mut out, w).map_err(std::io::Error::from)?;
        writeln!(out)?;
    }
    Ok(windows.len())
}

/// Dumps an instruction-trace file as JSON lines. Returns the event count.
pub fn dump_trace(path: &Path, mut out: impl Write) -> Result<usize, Error> {
    let events = trace::read_trace(path)?;
    for ev in &events {
        serde_json::to_writer(&mut out, ev).map_err(std::io::Error::from)?;
        writeln!(out)?;
    }
    Ok(events.len())
}
