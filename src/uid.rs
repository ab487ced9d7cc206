//! Canonical 64-bit identifiers for basic blocks and executable
//! instructions, and the sidecar file that lets a later pass or an offline
//! consumer rebuild the same mapping against the same IR.
//!
//! Identifiers are assigned in a single walk of (function, block,
//! executable-instruction-in-block) in IR order. `0` is reserved as the
//! invalid sentinel in every id space; the first real id is `1`.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use crate::error::SidecarError;
use crate::exec;
use crate::ir::{BlockId, FunctionId, InstrId, IrModule};
use crate::trace;
use crate::trace::records::CanonicalBBRecord;
use crate::trace::stream::{RecordWriter, UID_MAGIC};

/// Canonical id of an executable instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstId(pub u64);

/// Canonical id of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BBId(pub u64);

/// Handle identifying one dynamic call site, issued by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallId(pub u64);

impl InstId {
    pub const INVALID: InstId = InstId(0);
    pub const FIRST: InstId = InstId(1);
}

impl BBId {
    pub const INVALID: BBId = BBId(0);
    pub const FIRST: BBId = BBId(1);
}

impl CallId {
    pub const INVALID: CallId = CallId(0);
    pub const FIRST: CallId = CallId(1);
}

impl std::fmt::Display for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for BBId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of an instruction: function, block, and stable handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrLoc {
    pub function: FunctionId,
    pub block: BlockId,
    pub instr: InstrId,
}

#[derive(Debug, Clone, Copy)]
struct BBMeta {
    function: FunctionId,
    block: BlockId,
    id: BBId,
    inst_start: InstId,
}

/// Bijective mapping between IR entities and dense canonical ids.
///
/// The maps reference IR entities by stable handles only; the module keeps
/// ownership of the IR and may be rewritten (insertion only) while a
/// `CanonicalId` is alive.
#[derive(Debug)]
pub struct CanonicalId {
    inst_to_id: HashMap<(FunctionId, InstrId), InstId>,
    bb_to_id: HashMap<(FunctionId, BlockId), BBId>,
    id_to_inst: HashMap<InstId, InstrLoc>,
    id_to_bb: HashMap<BBId, (FunctionId, BlockId)>,
    /// Serialization metadata, in walk order.
    bb_meta: Vec<BBMeta>,
}

impl CanonicalId {
    /// Assigns ids by walking the module in IR order.
    pub fn assign(module: &IrModule) -> Self {
        let mut this = Self::empty();
        let mut cur_inst = InstId::FIRST;
        let mut cur_bb = BBId::FIRST;
        for func in module.functions() {
            for block in func.blocks() {
                this.bb_meta.push(BBMeta {
                    function: func.id,
                    block: block.id,
                    id: cur_bb,
                    inst_start: cur_inst,
                });
                this.bb_to_id.insert((func.id, block.id), cur_bb);
                cur_bb.0 += 1;

                for instr in exec::executable_instrs(block) {
                    this.inst_to_id.insert((func.id, instr), cur_inst);
                    this.id_to_inst.insert(
                        cur_inst,
                        InstrLoc {
                            function: func.id,
                            block: block.id,
                            instr,
                        },
                    );
                    cur_inst.0 += 1;
                }
            }
        }
        this.build_reverse_bb_map();
        this
    }

    /// Rebuilds the mapping from a previously written sidecar.
    ///
    /// The record order must equal the natural IR walk order of `module`;
    /// ids are re-derived while asserting each record matches. Any mismatch
    /// means the sidecar belongs to different IR and is fatal.
    pub fn from_sidecar(module: &IrModule, path: &Path) -> Result<Self, SidecarError> {
        // Index the live IR by (function name, block label).
        let mut block_index: HashMap<&str, HashMap<String, (FunctionId, BlockId)>> =
            HashMap::new();
        let mut num_module_bbs = 0usize;
        for func in module.functions() {
            let by_label = block_index.entry(func.name.as_str()).or_default();
            for block in func.blocks() {
                by_label.insert(block.label(), (func.id, block.id));
                num_module_bbs += 1;
            }
        }

        let records = trace::read_sidecar(path)?;
        if records.len() != num_module_bbs {
            return Err(SidecarError::RecordCountMismatch {
                expected: num_module_bbs,
                found: records.len(),
            });
        }

        let mut this = Self::empty();
        let mut cur_inst = InstId::FIRST;
        let mut cur_bb = BBId::FIRST;
        for rec in &records {
            let by_label = block_index.get(rec.function_name.as_str()).ok_or_else(|| {
                SidecarError::UnknownFunction {
                    function: rec.function_name.clone(),
                }
            })?;
            let &(func_id, block_id) =
                by_label
                    .get(&rec.bb_name)
                    .ok_or_else(|| SidecarError::UnknownBlock {
                        function: rec.function_name.clone(),
                        block: rec.bb_name.clone(),
                    })?;

            if rec.bb_id != cur_bb.0 {
                return Err(SidecarError::BlockIdMismatch {
                    function: rec.function_name.clone(),
                    block: rec.bb_name.clone(),
                    expected: cur_bb.0,
                    found: rec.bb_id,
                });
            }
            if rec.first_inst_id != cur_inst.0 {
                return Err(SidecarError::InstStartMismatch {
                    function: rec.function_name.clone(),
                    block: rec.bb_name.clone(),
                    expected: cur_inst.0,
                    found: rec.first_inst_id,
                });
            }

            this.bb_meta.push(BBMeta {
                function: func_id,
                block: block_id,
                id: cur_bb,
                inst_start: cur_inst,
            });
            this.bb_to_id.insert((func_id, block_id), cur_bb);
            cur_bb.0 += 1;

            let func = module.function(func_id).expect("indexed function");
            let block = func.block(block_id).expect("indexed block");
            for instr in exec::executable_instrs(block) {
                this.inst_to_id.insert((func_id, instr), cur_inst);
                this.id_to_inst.insert(
                    cur_inst,
                    InstrLoc {
                        function: func_id,
                        block: block_id,
                        instr,
                    },
                );
                cur_inst.0 += 1;
            }
        }
        this.build_reverse_bb_map();
        Ok(this)
    }

    fn empty() -> Self {
        Self {
            inst_to_id: HashMap::new(),
            bb_to_id: HashMap::new(),
            id_to_inst: HashMap::new(),
            id_to_bb: HashMap::new(),
            bb_meta: Vec::new(),
        }
    }

    fn build_reverse_bb_map(&mut self) {
        for (&key, &id) in &self.bb_to_id {
            self.id_to_bb.insert(id, key);
        }
    }

    /// Canonical id of an executable instruction. Panics on unknown input.
    pub fn inst_id(&self, function: FunctionId, instr: InstrId) -> InstId {
        *self
            .inst_to_id
            .get(&(function, instr))
            .unwrap_or_else(|| panic!("no canonical id for instruction {}", instr))
    }

    /// Canonical id of a basic block. Panics on unknown input.
    pub fn bb_id(&self, function: FunctionId, block: BlockId) -> BBId {
        *self
            .bb_to_id
            .get(&(function, block))
            .unwrap_or_else(|| panic!("no canonical id for block {}", block))
    }

    /// Inverse lookup. Panics on an id outside the assigned range.
    pub fn get_inst(&self, id: InstId) -> InstrLoc {
        *self
            .id_to_inst
            .get(&id)
            .unwrap_or_else(|| panic!("invalid instruction id {}", id))
    }

    /// Inverse lookup. Panics on an id outside the assigned range.
    pub fn get_bb(&self, id: BBId) -> (FunctionId, BlockId) {
        *self
            .id_to_bb
            .get(&id)
            .unwrap_or_else(|| panic!("invalid block id {}", id))
    }

    pub fn has_inst(&self, id: InstId) -> bool {
        self.id_to_inst.contains_key(&id)
    }

    pub fn has_bb(&self, id: BBId) -> bool {
        self.id_to_bb.contains_key(&id)
    }

    pub fn num_insts(&self) -> u64 {
        self.inst_to_id.len() as u64
    }

    pub fn num_bbs(&self) -> u64 {
        self.bb_to_id.len() as u64
    }

    /// Writes the sidecar: one record per block, in walk order.
    pub fn serialize(&self, module: &IrModule, path: &Path) -> io::Result<()> {
        let mut writer = RecordWriter::create(path, UID_MAGIC)?;
        for meta in &self.bb_meta {
            let func = module.function(meta.function).expect("walked function");
            let block = func.block(meta.block).expect("walked block");
            let record = CanonicalBBRecord {
                function_name: func.name.clone(),
                bb_name: block.label(),
                bb_id: meta.id.0,
                first_inst_id: meta.inst_start.0,
            };
            writer.write_record(&record.to_bytes())?;
        }
        writer.flush()
    }
}
