//! Length-prefixed record framing.
//!
//! ## Wire format
//!
//! ```text
//! Header: magic(4 bytes) | version(u8=1)
//! Then zero or more records: payload_len(u32 LE) | payload bytes
//! ```
//!
//! Each stream kind carries its own magic so a sidecar can never be decoded
//! as a trace by accident. Record payloads are encoded with the `Writer` /
//! `Reader` helpers below (little-endian integers, u32-length-prefixed UTF-8
//! strings, one-byte bools).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::DecodeError;

/// Canonical-ID sidecar stream.
pub const UID_MAGIC: [u8; 4] = *b"DGID";
/// SimPoint BB-vector stream.
pub const BBVEC_MAGIC: [u8; 4] = *b"DGBB";
/// Instruction-trace event stream.
pub const TRACE_MAGIC: [u8; 4] = *b"DGTE";

pub const STREAM_VERSION: u8 = 1;

// ── Record framing ──────────────────────────────────────────────────────────

/// Writes framed records to an underlying stream.
pub struct RecordWriter<W: Write> {
    inner: W,
}

impl RecordWriter<BufWriter<File>> {
    /// Creates the file at `path` and writes the stream header.
    pub fn create(path: &Path, magic: [u8; 4]) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), magic)
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(mut inner: W, magic: [u8; 4]) -> io::Result<Self> {
        inner.write_all(&magic)?;
        inner.write_all(&[STREAM_VERSION])?;
        Ok(Self { inner })
    }

    pub fn write_record(&mut self, payload: &[u8]) -> io::Result<()> {
        self.inner.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.inner.write_all(payload)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reads framed records from an underlying stream.
#[derive(Debug)]
pub struct RecordReader<R: Read> {
    inner: R,
}

impl RecordReader<BufReader<File>> {
    /// Opens the file at `path` and validates the stream header.
    pub fn open(path: &Path, magic: [u8; 4]) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), magic)
    }
}

impl<R: Read> RecordReader<R> {
    pub fn new(mut inner: R, magic: [u8; 4]) -> Result<Self, DecodeError> {
        let mut found = [0u8; 4];
        inner
            .read_exact(&mut found)
            .map_err(|_| DecodeError::Truncated { what: "stream magic" })?;
        if found != magic {
            return Err(DecodeError::BadMagic {
                expected: magic,
                found,
            });
        }
        let mut version = [0u8; 1];
        inner
            .read_exact(&mut version)
            .map_err(|_| DecodeError::Truncated { what: "stream version" })?;
        if version[0] != STREAM_VERSION {
            return Err(DecodeError::BadVersion { found: version[0] });
        }
        Ok(Self { inner })
    }

    /// Returns the next record payload, or `None` at a clean end of stream.
    /// A stream that ends inside a length prefix or payload is truncated.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        let mut first = [0u8; 1];
        match self.inner.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return self.next_record(),
            Err(e) => return Err(DecodeError::Io(e)),
        }
        let mut rest = [0u8; 3];
        self.inner
            .read_exact(&mut rest)
            .map_err(|_| DecodeError::Truncated { what: "record length" })?;
        let len_bytes = [first[0], rest[0], rest[1], rest[2]];
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        self.inner
            .read_exact(&mut payload)
            .map_err(|_| DecodeError::Truncated { what: "record payload" })?;
        Ok(Some(payload))
    }
}

// ── Payload encoding ─────────────────────────────────────────────────────────

pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    pub(crate) fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub(crate) fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub(crate) fn bool(&mut self, v: bool) {
        self.u8(if v { 1 } else { 0 });
    }
    pub(crate) fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub(crate) fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.data.len() {
            return Err(DecodeError::Truncated { what: "u8" });
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        if self.pos + 4 > self.data.len() {
            return Err(DecodeError::Truncated { what: "u32" });
        }
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub(crate) fn u64(&mut self) -> Result<u64, DecodeError> {
        if self.pos + 8 > self.data.len() {
            return Err(DecodeError::Truncated { what: "u64" });
        }
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    pub(crate) fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    pub(crate) fn str(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        if self.pos + len > self.data.len() {
            return Err(DecodeError::Truncated { what: "string" });
        }
        let s = std::str::from_utf8(&self.data[self.pos..self.pos + len])
            .map_err(|_| DecodeError::BadUtf8)?
            .to_owned();
        self.pos += len;
        Ok(s)
    }

    /// Fails if any payload bytes were left unconsumed.
    pub(crate) fn finish(self) -> Result<(), DecodeError> {
        if self.pos != self.data.len() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(())
    }
}
