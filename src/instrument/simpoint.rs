//! SimPoint instrumentation: per-block entry callbacks plus a
//! dynamic-instruction tick before every executable instruction, and the
//! canonical-ID sidecar that maps BB ids back to source blocks.

use std::path::PathBuf;

use tracing::warn;

use crate::error::PassError;
use crate::exec;
use crate::instrument::{InstrumentationInterface, Pass};
use crate::ir::{BlockId, FunctionId, IrModule};
use crate::uid::CanonicalId;

pub struct SimPointPass {
    uid_file: Option<PathBuf>,
}

impl SimPointPass {
    pub fn new(uid_file: Option<PathBuf>) -> Self {
        Self { uid_file }
    }
}

impl Pass for SimPointPass {
    fn name(&self) -> &'static str {
        "instrument-simpoint"
    }

    fn run(&mut self, module: &mut IrModule) -> Result<(), PassError> {
        let ii = InstrumentationInterface::bind(module);
        let cid = CanonicalId::assign(module);

        for f in 0..module.functions().len() {
            let func_id = FunctionId(f as u32);
            let func = module.function_mut(func_id);
            for b in 0..func.blocks().len() {
                let block_id = BlockId(b as u32);
                let view = exec::executable_instrs(func.block(block_id).expect("indexed block"));
                let bb_id = cid.bb_id(func_id, block_id);

                func.insert_before(block_id, view[0], ii.bb_enter_call(bb_id, b == 0));
                for &instr in &view {
                    func.insert_before(block_id, instr, ii.tick_call());
                }
            }
        }

        match &self.uid_file {
            Some(path) => cid.serialize(module, path)?,
            None => warn!("canonical-ID sidecar path not set, sidecar not written"),
        }
        Ok(())
    }
}
