use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the dgtrace pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("sidecar error: {0}")]
    Sidecar(#[from] SidecarError),

    #[error("pass error: {0}")]
    Pass(#[from] PassError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("interpreter error: {0}")]
    Interp(#[from] InterpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors raised while resolving the runtime environment. These are fatal at
/// the callback ABI boundary: the process exits with status 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {var}")]
    MissingVar { var: &'static str },

    #[error("invalid value '{value}' for {var}: {detail}")]
    InvalidVar {
        var: &'static str,
        value: String,
        detail: String,
    },

    #[error("unrecognized instrumentation mode: {found:?}")]
    UnknownMode { found: Option<String> },

    #[error("cannot read SimPoints file {path}: {detail}")]
    SimPointFile { path: PathBuf, detail: String },

    #[error("invalid SimPoints line '{line}': expected three comma-separated integers")]
    InvalidSimPointLine { line: String },
}

// ---------------------------------------------------------------------------
// Sidecar errors
// ---------------------------------------------------------------------------

/// Errors raised when reloading a canonical-ID sidecar against a module.
/// Any mismatch means the sidecar was produced from different IR.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("sidecar names unknown function '{function}'")]
    UnknownFunction { function: String },

    #[error("sidecar names unknown block '{block}' in function '{function}'")]
    UnknownBlock { function: String, block: String },

    #[error("block id mismatch at {function}:{block}: sidecar has {found}, walk gives {expected}")]
    BlockIdMismatch {
        function: String,
        block: String,
        expected: u64,
        found: u64,
    },

    #[error(
        "first-instruction id mismatch at {function}:{block}: sidecar has {found}, walk gives {expected}"
    )]
    InstStartMismatch {
        function: String,
        block: String,
        expected: u64,
        found: u64,
    },

    #[error("sidecar covers {found} blocks but the module has {expected}")]
    RecordCountMismatch { expected: usize, found: usize },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

// ---------------------------------------------------------------------------
// Pass errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PassError {
    #[error("instruction-trace pass requires a canonical-ID sidecar path")]
    MissingSidecar,

    #[error("unsupported instruction '{instr}' in function '{function}'")]
    UnsupportedInstr {
        function: String,
        instr: &'static str,
    },

    #[error(transparent)]
    Sidecar(#[from] SidecarError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Decode errors
// ---------------------------------------------------------------------------

/// Errors raised while decoding framed record streams.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported stream version {found}")]
    BadVersion { found: u8 },

    #[error("truncated input while reading {what}")]
    Truncated { what: &'static str },

    #[error("record payload is not valid UTF-8")]
    BadUtf8,

    #[error("unknown record tag {tag:#04x}")]
    BadTag { tag: u8 },

    #[error("trailing bytes after record payload")]
    TrailingBytes,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Interpreter errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum InterpError {
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("undefined value %{id}")]
    UndefinedValue { id: u32 },

    #[error("function '{name}' expects {expected} arguments, got {found}")]
    ArityMismatch {
        name: String,
        expected: u32,
        found: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("phi has no incoming value for the executed predecessor")]
    MissingPhiIncoming,

    #[error("reached an 'unreachable' terminator")]
    ReachedUnreachable,

    #[error("unwind escaped the outermost frame")]
    UnhandledUnwind,

    #[error("step limit exceeded")]
    StepLimit,

    #[error("call depth limit exceeded")]
    DepthLimit,

    #[error("unsupported: {detail}")]
    Unsupported { detail: String },

    #[error("trace output failed: {0}")]
    Io(#[from] std::io::Error),
}
