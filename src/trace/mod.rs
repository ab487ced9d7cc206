//! Stream framing, wire records, and decoding helpers for the three output
//! file kinds: the canonical-ID sidecar, SimPoint BB-vector streams, and
//! instruction-trace event streams.

pub mod inspect;
pub mod records;
pub mod stream;

use std::path::Path;

use crate::error::DecodeError;
use records::{BBWindow, CanonicalBBRecord, TraceEvent};
use stream::{RecordReader, BBVEC_MAGIC, TRACE_MAGIC, UID_MAGIC};

/// Decodes a whole canonical-ID sidecar file.
pub fn read_sidecar(path: &Path) -> Result<Vec<CanonicalBBRecord>, DecodeError> {
    let mut reader = RecordReader::open(path, UID_MAGIC)?;
    let mut records = Vec::new();
    while let Some(payload) = reader.next_record()? {
        records.push(CanonicalBBRecord::from_bytes(&payload)?);
    }
    Ok(records)
}

/// Decodes a whole SimPoint BB-vector file.
pub fn read_bb_windows(path: &Path) -> Result<Vec<BBWindow>, DecodeError> {
    let mut reader = RecordReader::open(path, BBVEC_MAGIC)?;
    let mut windows = Vec::new();
    while let Some(payload) = reader.next_record()? {
        windows.push(BBWindow::from_bytes(&payload)?);
    }
    Ok(windows)
}

/// Decodes a whole instruction-trace file.
pub fn read_trace(path: &Path) -> Result<Vec<TraceEvent>, DecodeError> {
    let mut reader = RecordReader::open(path, TRACE_MAGIC)?;
    let mut events = Vec::new();
    while let Some(payload) = reader.next_record()? {
        events.push(TraceEvent::from_bytes(&payload)?);
    }
    Ok(events)
}
