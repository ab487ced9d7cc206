//! SimPoint profiling runtime: accumulates basic-block execution
//! frequencies over fixed-size dynamic-instruction windows and emits one
//! BB-vector record per window.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;

use crate::error::{ConfigError, Error};
use crate::runtime::{lookup_env, parse_u64, require_var, EnvLookup};
use crate::trace::records::BBWindow;
use crate::trace::stream::{RecordWriter, BBVEC_MAGIC};
use crate::uid::BBId;

pub const ENV_BB_INTERVAL_SIZE: &str = "DG_BB_INTERVAL_SIZE";
pub const ENV_BB_INTERVAL_PATH: &str = "DG_BB_INTERVAL_PATH";

#[derive(Debug, Clone)]
pub struct SimPointConfig {
    /// Dynamic instructions per window. Must be positive.
    pub interval_size: u64,
    pub output_path: PathBuf,
}

impl SimPointConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&lookup_env)
    }

    pub fn from_lookup(lookup: &EnvLookup<'_>) -> Result<Self, ConfigError> {
        let size_str = require_var(lookup, ENV_BB_INTERVAL_SIZE)?;
        let interval_size = parse_u64(ENV_BB_INTERVAL_SIZE, &size_str)?;
        if interval_size == 0 {
            return Err(ConfigError::InvalidVar {
                var: ENV_BB_INTERVAL_SIZE,
                value: size_str,
                detail: "window size must be positive".into(),
            });
        }
        let output_path = PathBuf::from(require_var(lookup, ENV_BB_INTERVAL_PATH)?);
        Ok(Self {
            interval_size,
            output_path,
        })
    }
}

pub struct SimPointContext {
    interval_size: u64,
    /// Dynamic-instruction counter.
    cur_inst: u64,
    freq: BTreeMap<u64, u64>,
    out: RecordWriter<BufWriter<File>>,
}

impl SimPointContext {
    pub fn new(config: SimPointConfig) -> Result<Self, Error> {
        let out = RecordWriter::create(&config.output_path, BBVEC_MAGIC)?;
        Ok(Self {
            interval_size: config.interval_size,
            cur_inst: 0,
            freq: BTreeMap::new(),
            out,
        })
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::new(SimPointConfig::from_env()?)
    }

    /// One executable instruction retired. Closes and flushes a window at
    /// every `interval_size` boundary.
    pub fn inc_dynamic_inst_count(&mut self) -> io::Result<()> {
        self.cur_inst += 1;
        if self.cur_inst % self.interval_size == 0 {
            let window = BBWindow {
                inst_start: self.cur_inst - self.interval_size,
                inst_end: self.cur_inst - 1,
                freq: std::mem::take(&mut self.freq),
            };
            self.out.write_record(&window.to_bytes())?;
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn record_basic_block(&mut self, id: BBId) {
        *self.freq.entry(id.0).or_insert(0) += 1;
    }
}
