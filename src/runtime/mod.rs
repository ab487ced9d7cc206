//! The runtime half of the tracer: mode dispatch, the singleton context,
//! and the extern-C callback surface the instrumented program links against.
//!
//! The traced program is single-threaded during traced regions by contract,
//! so the context lives in thread-local storage and no locking exists
//! anywhere on the callback path. For any instrumented instruction the
//! callback order is: op-specific `record*` calls, then
//! `incDynamicInstCount`, then the instruction itself.

pub mod inst_trace;
pub mod simpoint;

pub use inst_trace::{InstInterval, InstTraceConfig, InstTraceContext};
pub use simpoint::{SimPointConfig, SimPointContext};

use std::cell::RefCell;
use std::io;

use crate::error::{ConfigError, Error};
use crate::uid::{BBId, CallId, InstId};

pub const ENV_MODE: &str = "DG_MODE";

/// What a tick told the caller: keep running, or every interval has been
/// traced and the process should exit successfully.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    IntervalsComplete,
}

/// Environment lookup used by the config parsers. Tests substitute a map so
/// configuration is exercised without touching the process environment.
pub type EnvLookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

pub(crate) fn lookup_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

pub(crate) fn require_var(lookup: &EnvLookup<'_>, var: &'static str) -> Result<String, ConfigError> {
    lookup(var).ok_or(ConfigError::MissingVar { var })
}

pub(crate) fn parse_u64(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|e| ConfigError::InvalidVar {
        var,
        value: value.to_owned(),
        detail: e.to_string(),
    })
}

/// The tracing context: one of two variants selected by `DG_MODE` at first
/// callback.
pub enum TraceContext {
    SimPoint(SimPointContext),
    InstTrace(InstTraceContext),
}

impl TraceContext {
    /// Resolves the mode from the environment and builds the matching
    /// context. Absent or unknown `DG_MODE` is a configuration error.
    pub fn from_env() -> Result<Self, Error> {
        match lookup_env(ENV_MODE).as_deref() {
            Some("SimPoint") => Ok(TraceContext::SimPoint(SimPointContext::from_env()?)),
            Some("InstTrace") => Ok(TraceContext::InstTrace(InstTraceContext::from_env()?)),
            other => Err(ConfigError::UnknownMode {
                found: other.map(str::to_owned),
            }
            .into()),
        }
    }

    /// One executable instruction is about to execute.
    pub fn inc_dynamic_inst_count(&mut self) -> io::Result<TickOutcome> {
        match self {
            TraceContext::SimPoint(cx) => {
                cx.inc_dynamic_inst_count()?;
                Ok(TickOutcome::Continue)
            }
            TraceContext::InstTrace(cx) => cx.inc_dynamic_inst_count(),
        }
    }

    /// Allocates a call-site handle. SimPoint mode does not track calls and
    /// returns the invalid handle.
    pub fn get_call_site(&mut self, id: InstId) -> CallId {
        match self {
            TraceContext::SimPoint(_) => CallId::INVALID,
            TraceContext::InstTrace(cx) => cx.get_call_site(id),
        }
    }

    pub fn record_return_from_call(&mut self, handle: CallId, num_retired_in_bb: u64) {
        match self {
            TraceContext::SimPoint(_) => {}
            TraceContext::InstTrace(cx) => cx.record_return_from_call(handle, num_retired_in_bb),
        }
    }

    pub fn record_basic_block(&mut self, id: BBId, is_func_entry: bool) {
        match self {
            TraceContext::SimPoint(cx) => cx.record_basic_block(id),
            TraceContext::InstTrace(cx) => cx.record_basic_block(id, is_func_entry),
        }
    }

    pub fn record_load_inst(&mut self, id: InstId, address: u64) {
        match self {
            TraceContext::SimPoint(_) => {}
            TraceContext::InstTrace(cx) => cx.record_load_inst(id, address),
        }
    }

    pub fn record_store_inst(&mut self, id: InstId, address: u64) {
        match self {
            TraceContext::SimPoint(_) => {}
            TraceContext::InstTrace(cx) => cx.record_store_inst(id, address),
        }
    }

    /// True when an instruction-trace context has exhausted its intervals.
    pub fn is_complete(&self) -> bool {
        match self {
            TraceContext::SimPoint(_) => false,
            TraceContext::InstTrace(cx) => cx.is_complete(),
        }
    }
}

// ── Callback ABI ────────────────────────────────────────────────────────────

thread_local! {
    static CONTEXT: RefCell<Option<TraceContext>> = const { RefCell::new(None) };
}

/// Routes a callback to the singleton context, creating it on first use.
/// Configuration failures are fatal here: a half-configured tracer must not
/// let the program run on and produce a truncated or misleading trace.
fn with_context<R>(f: impl FnOnce(&mut TraceContext) -> R) -> R {
    CONTEXT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            match TraceContext::from_env() {
                Ok(cx) => {
                    if cx.is_complete() {
                        // Nothing to trace at all.
                        std::process::exit(0);
                    }
                    *slot = Some(cx);
                }
                Err(e) => {
                    eprintln!("dgtrace: {}", e);
                    std::process::exit(1);
                }
            }
        }
        f(slot.as_mut().expect("context initialized above"))
    })
}

fn exit_on_error<T>(result: io::Result<T>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("dgtrace: trace output failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn incDynamicInstCount() {
    let outcome = with_context(|cx| exit_on_error(cx.inc_dynamic_inst_count()));
    if outcome == TickOutcome::IntervalsComplete {
        std::process::exit(0);
    }
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn getCallSite(inst_id: u64) -> u64 {
    with_context(|cx| cx.get_call_site(InstId(inst_id))).0
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn recordReturnFromCall(handle: u64, num_retired_in_bb: u64) {
    with_context(|cx| cx.record_return_from_call(CallId(handle), num_retired_in_bb));
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn recordBasicBlock(bb_id: u64, is_func_entry: u8) {
    with_context(|cx| cx.record_basic_block(BBId(bb_id), is_func_entry != 0));
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn recordLoadInst(inst_id: u64, address: *const core::ffi::c_void) {
    with_context(|cx| cx.record_load_inst(InstId(inst_id), address as u64));
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn recordStoreInst(inst_id: u64, address: *const core::ffi::c_void) {
    with_context(|cx| cx.record_store_inst(InstId(inst_id), address as u64));
}
