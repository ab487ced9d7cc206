//! IR-level instrumentation and runtime tracing for micro-architectural
//! simulation.
//!
//! The crate has two halves. The compile-time half assigns stable canonical
//! ids to every basic block and executable instruction of a module
//! ([`uid`]), then rewrites the IR to call runtime callbacks at the right
//! program points ([`instrument`]): the SimPoint pass emits per-block entry
//! callbacks and a dynamic-instruction tick, the instruction-trace pass
//! additionally tracks memory accesses and call sites through per-function
//! handle slots. The run-time half ([`runtime`]) receives those callbacks —
//! in SimPoint mode it accumulates basic-block frequency vectors over
//! fixed-size instruction windows, in instruction-trace mode it maintains a
//! shadow call stack and serializes an event stream for each configured
//! dynamic-instruction interval.
//!
//! Output files use a common length-prefixed record framing ([`trace`]).
//! The [`interp`] module executes instrumented modules in-process, standing
//! in for a compiled-and-linked binary.

pub mod error;
pub mod exec;
pub mod instrument;
pub mod interp;
pub mod ir;
pub mod runtime;
pub mod trace;
pub mod uid;

pub use error::Error;
