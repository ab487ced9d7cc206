//! Wire records carried by the three framed streams: canonical-ID sidecar
//! blocks, SimPoint BB-vector windows, and instruction-trace events.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::DecodeError;
use crate::trace::stream::{Reader, Writer};

// ── Sidecar ─────────────────────────────────────────────────────────────────

/// One basic block of the canonical-ID sidecar, in module walk order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalBBRecord {
    pub function_name: String,
    pub bb_name: String,
    pub bb_id: u64,
    /// Canonical id of the block's first executable instruction. Consecutive
    /// records differ by exactly the executable-instruction count of the
    /// earlier block.
    pub first_inst_id: u64,
}

impl CanonicalBBRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.str(&self.function_name);
        w.str(&self.bb_name);
        w.u64(self.bb_id);
        w.u64(self.first_inst_id);
        w.into_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let rec = Self {
            function_name: r.str()?,
            bb_name: r.str()?,
            bb_id: r.u64()?,
            first_inst_id: r.u64()?,
        };
        r.finish()?;
        Ok(rec)
    }
}

// ── SimPoint windows ────────────────────────────────────────────────────────

/// Basic-block execution frequencies for one dynamic-instruction window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BBWindow {
    pub inst_start: u64,
    /// Inclusive.
    pub inst_end: u64,
    /// `BBId -> execution count`. Sorted so encoding is deterministic.
    pub freq: BTreeMap<u64, u64>,
}

impl BBWindow {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u64(self.inst_start);
        w.u64(self.inst_end);
        w.u32(self.freq.len() as u32);
        for (bb, count) in &self.freq {
            w.u64(*bb);
            w.u64(*count);
        }
        w.into_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let inst_start = r.u64()?;
        let inst_end = r.u64()?;
        let n = r.u32()?;
        let mut freq = BTreeMap::new();
        for _ in 0..n {
            let bb = r.u64()?;
            let count = r.u64()?;
            freq.insert(bb, count);
        }
        r.finish()?;
        Ok(Self {
            inst_start,
            inst_end,
            freq,
        })
    }
}

// ── Trace events ────────────────────────────────────────────────────────────

/// One frame of the shadow call stack as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BBFrame {
    pub bb_id: u64,
    pub num_retired: u64,
    /// Set in `CallStack` snapshots for frames that have called into the
    /// frame above them.
    pub is_call: bool,
}

const TAG_CALL_STACK: u8 = 0x01;
const TAG_STACK_ADJUSTMENT: u8 = 0x02;
const TAG_BB_ENTER: u8 = 0x03;
const TAG_CALL: u8 = 0x04;
const TAG_MEMORY: u8 = 0x05;

/// A dynamic event of the instruction trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TraceEvent {
    /// Full shadow-stack snapshot, innermost frame last. Emitted once at the
    /// first tick of each interval.
    CallStack { frames: Vec<BBFrame> },
    /// `num_popped` frames left the stack; `top_frame` is the state the
    /// popped callee had, and `new_frame`, when present, is the resumed
    /// caller's state after a folded block entry.
    StackAdjustment {
        top_frame: BBFrame,
        num_popped: u64,
        new_frame: Option<BBFrame>,
    },
    BBEnter { bb_id: u64 },
    Call { inst_id: u64 },
    Memory { inst_id: u64, address: u64 },
}

fn write_frame(w: &mut Writer, f: &BBFrame) {
    w.u64(f.bb_id);
    w.u64(f.num_retired);
    w.bool(f.is_call);
}

fn read_frame(r: &mut Reader<'_>) -> Result<BBFrame, DecodeError> {
    Ok(BBFrame {
        bb_id: r.u64()?,
        num_retired: r.u64()?,
        is_call: r.bool()?,
    })
}

impl TraceEvent {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            TraceEvent::CallStack { frames } => {
                w.u8(TAG_CALL_STACK);
                w.u32(frames.len() as u32);
                for f in frames {
                    write_frame(&mut w, f);
                }
            }
            TraceEvent::StackAdjustment {
                top_frame,
                num_popped,
                new_frame,
            } => {
                w.u8(TAG_STACK_ADJUSTMENT);
                write_frame(&mut w, top_frame);
                w.u64(*num_popped);
                w.bool(new_frame.is_some());
                if let Some(f) = new_frame {
                    write_frame(&mut w, f);
                }
            }
            TraceEvent::BBEnter { bb_id } => {
                w.u8(TAG_BB_ENTER);
                w.u64(*bb_id);
            }
            TraceEvent::Call { inst_id } => {
                w.u8(TAG_CALL);
                w.u64(*inst_id);
            }
            TraceEvent::Memory { inst_id, address } => {
                w.u8(TAG_MEMORY);
                w.u64(*inst_id);
                w.u64(*address);
            }
        }
        w.into_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let tag = r.u8()?;
        let event = match tag {
            TAG_CALL_STACK => {
                let n = r.u32()?;
                let mut frames = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    frames.push(read_frame(&mut r)?);
                }
                TraceEvent::CallStack { frames }
            }
            TAG_STACK_ADJUSTMENT => {
                let top_frame = read_frame(&mut r)?;
                let num_popped = r.u64()?;
                let new_frame = if r.bool()? {
                    Some(read_frame(&mut r)?)
                } else {
                    None
                };
                TraceEvent::StackAdjustment {
                    top_frame,
                    num_popped,
                    new_frame,
                }
            }
            TAG_BB_ENTER => TraceEvent::BBEnter { bb_id: r.u64()? },
            TAG_CALL => TraceEvent::Call { inst_id: r.u64()? },
            TAG_MEMORY => TraceEvent::Memory {
                inst_id: r.u64()?,
                address: r.u64()?,
            },
            tag => return Err(DecodeError::BadTag { tag }),
        };
        r.finish()?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_roundtrip() {
        let events = vec![
            TraceEvent::CallStack {
                frames: vec![
                    BBFrame { bb_id: 1, num_retired: 4, is_call: true },
                    BBFrame { bb_id: 9, num_retired: 0, is_call: false },
                ],
            },
            TraceEvent::StackAdjustment {
                top_frame: BBFrame { bb_id: 9, num_retired: 1, is_call: false },
                num_popped: 2,
                new_frame: Some(BBFrame { bb_id: 3, num_retired: 5, is_call: false }),
            },
            TraceEvent::StackAdjustment {
                top_frame: BBFrame { bb_id: 2, num_retired: 7, is_call: false },
                num_popped: 1,
                new_frame: None,
            },
            TraceEvent::BBEnter { bb_id: 17 },
            TraceEvent::Call { inst_id: 42 },
            TraceEvent::Memory { inst_id: 6, address: 0xdead_beef },
        ];
        for ev in events {
            assert_eq!(TraceEvent::from_bytes(&ev.to_bytes()).unwrap(), ev);
        }
    }

    #[test]
    fn window_roundtrip() {
        let mut freq = BTreeMap::new();
        freq.insert(3, 12);
        freq.insert(8, 1);
        let w = BBWindow { inst_start: 64, inst_end: 127, freq };
        assert_eq!(BBWindow::from_bytes(&w.to_bytes()).unwrap(), w);
    }

    #[test]
    fn bad_tag_rejected() {
        assert!(matches!(
            TraceEvent::from_bytes(&[0xff]).unwrap_err(),
            DecodeError::BadTag { tag: 0xff }
        ));
    }
}
