//! Instruction-trace runtime: shadow call stack, interval state machine,
//! and buffered event serialization.
//!
//! The instrumented program reports, for each executable instruction, any
//! op-specific callbacks followed by exactly one tick. Callbacks only stage
//! state in `CurTick`; the tick applies the staged state in a fixed order
//! (resolve returns, resolve block entry, snapshot at interval start, retire,
//! check the interval boundary) so the runtime sees a coherent picture of
//! the instant *before* the instruction executes.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{ConfigError, Error};
use crate::runtime::{lookup_env, parse_u64, require_var, EnvLookup, TickOutcome};
use crate::trace::records::{BBFrame, TraceEvent};
use crate::trace::stream::{RecordWriter, TRACE_MAGIC};
use crate::uid::{BBId, CallId, InstId};

pub const ENV_TRACE_PATH: &str = "DG_TRACE_PATH";
pub const ENV_INST_START: &str = "DG_INST_START";
pub const ENV_INST_MAX: &str = "DG_INST_MAX";
pub const ENV_SIMPOINT_PATH: &str = "DG_SIMPOINT_PATH";

/// Flush the event buffer at this size when the interval end is known.
const EVENT_BUFFER_CAP: usize = 1000;

// ── Intervals ───────────────────────────────────────────────────────────────

/// A range of dynamic-instruction ids inside which events are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstInterval {
    pub start: u64,
    /// Inclusive. `None` means the interval extends to program exit.
    pub end: Option<u64>,
}

impl InstInterval {
    pub fn open(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn closed(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        id >= self.start && self.end.map_or(true, |end| id <= end)
    }
}

impl std::fmt::Display for InstInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(f, "[{}, {}]", self.start, end),
            None => write!(f, "[{}, inf]", self.start),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstTraceConfig {
    pub trace_path: PathBuf,
    /// Non-overlapping, ordered by start.
    pub intervals: Vec<InstInterval>,
}

impl InstTraceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&lookup_env)
    }

    pub fn from_lookup(lookup: &EnvLookup<'_>) -> Result<Self, ConfigError> {
        let trace_path = PathBuf::from(require_var(lookup, ENV_TRACE_PATH)?);
        let intervals = derive_intervals(lookup)?;
        Ok(Self {
            trace_path,
            intervals,
        })
    }
}

/// Interval derivation precedence:
/// 1. `DG_INST_START` and/or `DG_INST_MAX` — a single interval.
/// 2. `DG_SIMPOINT_PATH` — one closed interval per line `start,end,weight`
///    (the third integer is ignored).
/// 3. Neither — a single open interval starting at 0.
fn derive_intervals(lookup: &EnvLookup<'_>) -> Result<Vec<InstInterval>, ConfigError> {
    let start_str = lookup(ENV_INST_START);
    let max_str = lookup(ENV_INST_MAX);
    if start_str.is_some() || max_str.is_some() {
        let start = match &start_str {
            Some(s) => parse_u64(ENV_INST_START, s)?,
            None => 0,
        };
        return Ok(match &max_str {
            Some(s) => {
                let max = parse_u64(ENV_INST_MAX, s)?;
                if max == 0 {
                    return Err(ConfigError::InvalidVar {
                        var: ENV_INST_MAX,
                        value: s.clone(),
                        detail: "instruction budget must be positive".into(),
                    });
                }
                vec![InstInterval::closed(start, start + max - 1)]
            }
            None => vec![InstInterval::open(start)],
        });
    }

    if let Some(path_str) = lookup(ENV_SIMPOINT_PATH) {
        let path = PathBuf::from(path_str);
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::SimPointFile {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        let mut intervals = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != 3 {
                return Err(ConfigError::InvalidSimPointLine { line: line.into() });
            }
            let mut ints = [0u64; 3];
            for (slot, field) in ints.iter_mut().zip(&fields) {
                *slot = field.trim().parse::<u64>().map_err(|_| {
                    ConfigError::InvalidSimPointLine { line: line.into() }
                })?;
            }
            intervals.push(InstInterval::closed(ints[0], ints[1]));
        }
        return Ok(intervals);
    }

    Ok(vec![InstInterval::open(0)])
}

// ── Interval cursor ─────────────────────────────────────────────────────────

/// Walks the interval list, owning the output stream of the active interval.
struct IntervalCursor {
    intervals: Vec<InstInterval>,
    base_path: PathBuf,
    idx: usize,
    out: Option<RecordWriter<BufWriter<File>>>,
    serialized_count: u64,
    /// When fast-forwarding toward the current interval began.
    time_ff: Instant,
    /// When the current interval's first tick was seen.
    time_start: Instant,
}

impl IntervalCursor {
    fn new(intervals: Vec<InstInterval>, base_path: PathBuf) -> io::Result<Self> {
        let now = Instant::now();
        let mut cursor = Self {
            intervals,
            base_path,
            idx: 0,
            out: None,
            serialized_count: 0,
            time_ff: now,
            time_start: now,
        };
        if !cursor.is_done() {
            cursor.out = Some(RecordWriter::create(&cursor.interval_path(0), TRACE_MAGIC)?);
        }
        Ok(cursor)
    }

    fn is_done(&self) -> bool {
        self.idx >= self.intervals.len()
    }

    fn current(&self) -> &InstInterval {
        &self.intervals[self.idx]
    }

    fn is_end_known(&self) -> bool {
        self.current().end.is_some()
    }

    fn contains(&self, id: u64) -> bool {
        self.current().contains(id)
    }

    /// Moves to the next interval, opening its output file. Returns `true`
    /// when no intervals remain.
    fn advance(&mut self) -> io::Result<bool> {
        assert!(!self.is_done());
        self.idx += 1;
        self.serialized_count = 0;
        if self.is_done() {
            self.out = None;
            return Ok(true);
        }
        self.out = Some(RecordWriter::create(
            &self.interval_path(self.idx),
            TRACE_MAGIC,
        )?);
        Ok(false)
    }

    /// Output path for interval `idx`: the index is spliced between the
    /// configured path's stem and extension (`trace.pb` -> `trace.0.pb`).
    fn interval_path(&self, idx: usize) -> PathBuf {
        let stem = self
            .base_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = match self.base_path.extension() {
            Some(ext) => format!("{}.{}.{}", stem, idx, ext.to_string_lossy()),
            None => format!("{}.{}", stem, idx),
        };
        match self.base_path.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }

    fn writer(&mut self) -> &mut RecordWriter<BufWriter<File>> {
        self.out.as_mut().expect("active interval has an open stream")
    }
}

// ── Shadow stack ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PendingCall {
    /// Canonical id of the call instruction.
    id: InstId,
    handle: CallId,
    /// Promoted to `true` when the callee's entry block is observed; stays
    /// `false` for callees that were never traced.
    is_real: bool,
}

#[derive(Debug, Clone, Copy)]
struct CallFrame {
    cur_bb: BBId,
    /// Executable instructions retired in `cur_bb` since it was entered.
    num_retired: u64,
    pending_call: Option<PendingCall>,
}

impl CallFrame {
    fn new(bb: BBId) -> Self {
        Self {
            cur_bb: bb,
            num_retired: 0,
            pending_call: None,
        }
    }

    fn wire_frame(&self) -> BBFrame {
        BBFrame {
            bb_id: self.cur_bb.0,
            num_retired: self.num_retired,
            is_call: self.pending_call.map_or(false, |p| p.is_real),
        }
    }
}

/// Callback state staged for the current tick. At most one of each kind can
/// fire per executable instruction.
#[derive(Debug, Default)]
struct CurTick {
    entered_bb: Option<(BBId, bool)>,
    ret: Option<(CallId, u64)>,
    call: Option<(InstId, CallId)>,
    memory: Option<(InstId, u64)>,
}

// ── Context ─────────────────────────────────────────────────────────────────

pub struct InstTraceContext {
    /// Dynamic-instruction counter; the id of the next instruction to retire.
    cur_inst: u64,
    next_call_handle: u64,
    cursor: IntervalCursor,
    stack: Vec<CallFrame>,
    cur_tick: CurTick,
    events: Vec<TraceEvent>,
    can_serialize: bool,
    time_all_start: Instant,
}

impl InstTraceContext {
    pub fn new(config: InstTraceConfig) -> Result<Self, Error> {
        info!("assigned intervals:");
        for (i, interval) in config.intervals.iter().enumerate() {
            info!("  {}. {}", i + 1, interval);
        }
        let cursor = IntervalCursor::new(config.intervals, config.trace_path)?;
        if cursor.is_done() {
            info!("no intervals to trace");
        }
        Ok(Self {
            cur_inst: 0,
            next_call_handle: CallId::FIRST.0,
            cursor,
            stack: Vec::new(),
            cur_tick: CurTick::default(),
            events: Vec::new(),
            can_serialize: false,
            time_all_start: Instant::now(),
        })
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::new(InstTraceConfig::from_env()?)
    }

    /// All intervals have been traced. True from birth when the interval
    /// list is empty.
    pub fn is_complete(&self) -> bool {
        self.cursor.is_done()
    }

    // ---- Staging callbacks (fire before the tick) ----

    pub fn get_call_site(&mut self, id: InstId) -> CallId {
        let handle = CallId(self.next_call_handle);
        self.next_call_handle += 1;
        self.cur_tick.call = Some((id, handle));
        handle
    }

    /// The invalid handle means the restore point was reached without a call
    /// having returned to it; nothing is staged.
    pub fn record_return_from_call(&mut self, handle: CallId, num_retired_in_bb: u64) {
        if handle != CallId::INVALID {
            self.cur_tick.ret = Some((handle, num_retired_in_bb));
        }
    }

    pub fn record_basic_block(&mut self, id: BBId, is_func_entry: bool) {
        self.cur_tick.entered_bb = Some((id, is_func_entry));
    }

    pub fn record_load_inst(&mut self, id: InstId, address: u64) {
        self.cur_tick.memory = Some((id, address));
    }

    pub fn record_store_inst(&mut self, id: InstId, address: u64) {
        self.cur_tick.memory = Some((id, address));
    }

    // ---- The tick ----

    pub fn inc_dynamic_inst_count(&mut self) -> io::Result<TickOutcome> {
        if self.cursor.is_done() {
            return Ok(TickOutcome::IntervalsComplete);
        }

        let cur_inst = self.cur_inst;
        self.cur_inst += 1;
        let next_inst = self.cur_inst;

        let is_first_in_interval = cur_inst == self.cursor.current().start;

        let staged_ret = self.cur_tick.ret.take();
        let mut staged_bb = self.cur_tick.entered_bb.take();
        let staged_call = self.cur_tick.call.take();
        let staged_mem = self.cur_tick.memory.take();

        // Step 1: resolve the effects of a return (plain return or exception
        // unwinding) that executed before this instruction.
        if let Some((ret_handle, ret_retired)) = staged_ret {
            assert!(!self.stack.is_empty(), "return with an empty shadow stack");

            let top_pending = self.stack.last().unwrap().pending_call;
            if top_pending.map(|p| p.handle) == Some(ret_handle) {
                // The callee was not traced: no frame was ever pushed.
                let top = self.stack.last_mut().unwrap();
                let pending = top.pending_call.take().unwrap();
                assert!(
                    !pending.is_real,
                    "untraced-callee return matched a promoted call"
                );
                debug_assert!(staged_bb.is_some() || top.num_retired == ret_retired);
            } else {
                // Unwind: pop until the frame holding this call site.
                let callee = *self.stack.last().unwrap();
                let mut num_popped: u64 = 0;
                while let Some(top) = self.stack.last() {
                    if top.pending_call.map(|p| p.handle) == Some(ret_handle) {
                        break;
                    }
                    self.stack.pop();
                    num_popped += 1;
                }
                assert!(
                    !self.stack.is_empty(),
                    "no frame owns call handle {} during unwind at instruction {}",
                    ret_handle,
                    cur_inst
                );

                let top = self.stack.last_mut().unwrap();
                let pending = top.pending_call.take().unwrap();
                assert!(pending.is_real, "unwound into a call that never entered");
                top.num_retired = ret_retired;

                if let Some((bb, is_entry)) = staged_bb {
                    // The resumption point opens a new block in the caller:
                    // fold the block entry into the stack adjustment.
                    assert!(!is_entry, "return folded with a function-entry block");
                    top.cur_bb = bb;
                    let new_frame = top.wire_frame();
                    staged_bb = None;
                    self.emit(TraceEvent::StackAdjustment {
                        top_frame: BBFrame {
                            bb_id: callee.cur_bb.0,
                            num_retired: callee.num_retired,
                            is_call: false,
                        },
                        num_popped,
                        new_frame: Some(new_frame),
                    })?;
                } else {
                    self.emit(TraceEvent::StackAdjustment {
                        top_frame: BBFrame {
                            bb_id: callee.cur_bb.0,
                            num_retired: callee.num_retired,
                            is_call: false,
                        },
                        num_popped,
                        new_frame: None,
                    })?;
                }
            }
        }

        // Step 2: resolve a basic-block entry (new call, branch, or the
        // normal/landing-pad destination of an invoke).
        if let Some((bb, is_entry)) = staged_bb {
            if is_entry {
                if let Some(top) = self.stack.last_mut() {
                    if let Some(pending) = top.pending_call.as_mut() {
                        pending.is_real = true;
                        let call_inst = pending.id;
                        self.emit(TraceEvent::Call {
                            inst_id: call_inst.0,
                        })?;
                    } else {
                        // Entering a function with no pending call: control
                        // moved from a global-initializer function to main.
                        // Replace the lone initializer frame.
                        assert!(
                            self.stack.len() == 1,
                            "frameless function entry with a deep stack"
                        );
                        let old = *self.stack.last().unwrap();
                        self.emit(TraceEvent::StackAdjustment {
                            top_frame: BBFrame {
                                bb_id: old.cur_bb.0,
                                num_retired: old.num_retired,
                                is_call: false,
                            },
                            num_popped: 1,
                            new_frame: None,
                        })?;
                        self.stack.pop();
                    }
                }
                self.stack.push(CallFrame::new(bb));
            } else {
                assert!(!self.stack.is_empty(), "block entry with an empty stack");
                let top = self.stack.last_mut().unwrap();
                assert!(
                    top.pending_call.is_none(),
                    "branched over an unresolved call site"
                );
                top.cur_bb = bb;
                top.num_retired = 0;
            }
            self.emit(TraceEvent::BBEnter { bb_id: bb.0 })?;
        }

        // Step 3: on the first tick of an interval, snapshot the call stack
        // before this instruction executes.
        if is_first_in_interval {
            let now = Instant::now();
            self.cursor.time_start = now;
            info!(
                interval = %self.cursor.current(),
                ff_secs = (now - self.cursor.time_ff).as_secs(),
                total_secs = (now - self.time_all_start).as_secs(),
                "entered interval"
            );
            self.dump_call_stack();

            self.can_serialize = true;
            self.serialize_call_stack()?;
        }

        // Step 4: retire this instruction and apply staged per-instruction
        // state.
        assert!(!self.stack.is_empty(), "retire with an empty shadow stack");
        let top = self.stack.last_mut().unwrap();
        top.num_retired += 1;

        if let Some((id, handle)) = staged_call {
            assert!(
                top.pending_call.is_none(),
                "call site fired while another is pending"
            );
            top.pending_call = Some(PendingCall {
                id,
                handle,
                is_real: false,
            });
        }

        if let Some((id, address)) = staged_mem {
            self.emit(TraceEvent::Memory {
                inst_id: id.0,
                address,
            })?;
        }

        // Step 5: interval boundary. Ticks before the interval maintain the
        // stack but emit nothing; the last tick inside closes the interval.
        if !self.cursor.contains(cur_inst) {
            return Ok(TickOutcome::Continue);
        }
        if !self.cursor.contains(next_inst) {
            self.flush_events()?;
            self.can_serialize = false;

            let now = Instant::now();
            info!(
                interval = %self.cursor.current(),
                serialized = self.cursor.serialized_count,
                trace_secs = (now - self.cursor.time_start).as_secs(),
                "finished interval"
            );

            if self.cursor.advance()? {
                info!("finished all intervals");
                return Ok(TickOutcome::IntervalsComplete);
            }
            self.cursor.time_ff = now;
        }

        Ok(TickOutcome::Continue)
    }

    // ---- Serialization ----

    fn serialize_call_stack(&mut self) -> io::Result<()> {
        assert!(self.can_serialize);
        let frames: Vec<BBFrame> = self.stack.iter().map(CallFrame::wire_frame).collect();
        self.events.push(TraceEvent::CallStack { frames });
        self.try_flush()
    }

    fn emit(&mut self, event: TraceEvent) -> io::Result<()> {
        if !self.can_serialize {
            return Ok(());
        }
        self.events.push(event);
        self.try_flush()
    }

    /// Open-ended intervals flush on every event; bounded ones batch up to
    /// the buffer cap.
    fn try_flush(&mut self) -> io::Result<()> {
        if !self.cursor.is_end_known() || self.events.len() >= EVENT_BUFFER_CAP {
            self.flush_events()?;
        }
        Ok(())
    }

    fn flush_events(&mut self) -> io::Result<()> {
        if self.events.is_empty() {
            return Ok(());
        }
        self.cursor.serialized_count += self.events.len() as u64;
        let events = std::mem::take(&mut self.events);
        let writer = self.cursor.writer();
        for event in &events {
            writer.write_record(&event.to_bytes())?;
        }
        writer.flush()
    }

    fn dump_call_stack(&self) {
        if self.stack.is_empty() {
            debug!("call stack: [empty]");
            return;
        }
        for (i, frame) in self.stack.iter().enumerate() {
            debug!(
                "call stack [{}]: bb {} retired {} pending {:?}",
                i, frame.cur_bb, frame.num_retired, frame.pending_call
            );
        }
    }
}

impl Drop for InstTraceContext {
    /// The traced program may exit while an interval is still open; flush
    /// whatever the buffer holds so the written prefix stays decodable.
    fn drop(&mut self) {
        if !self.cursor.is_done() {
            let _ = self.flush_events();
        }
    }
}
