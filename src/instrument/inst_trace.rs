//! Instruction-trace instrumentation.
//!
//! Rewrites every function so the runtime can reconstruct the dynamic call
//! stack and memory stream. Two phases per function, because inserting
//! instructions must never disturb the instruction lists being walked:
//!
//! 1. With all executable views cached up front: insert the BB-enter
//!    callback at each block's first executable instruction, memory
//!    callbacks before loads and stores, and the call-return restore
//!    prelude at the resumption point of every call site (the next
//!    executable instruction for a call, the first executable instruction
//!    of both successors for an invoke). The per-function `CSHandle` slot is
//!    materialized lazily at the first site.
//! 2. Insert `getCallSite` + slot store at each site and the
//!    dynamic-instruction tick before every executable instruction.
//!
//! The resulting order for any instrumented instruction I is:
//! all `record*` callbacks for I, then `incDynamicInstCount`, then I.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;

use crate::error::PassError;
use crate::exec;
use crate::instrument::{InstrumentationInterface, Pass};
use crate::ir::{BlockId, InstrId, InstrKind, IrFunction, IrModule, Operand, ValueId};
use crate::uid::{CallId, CanonicalId};

pub struct InstTracePass {
    uid_file: Option<PathBuf>,
}

impl InstTracePass {
    pub fn new(uid_file: Option<PathBuf>) -> Self {
        Self { uid_file }
    }
}

#[derive(Default)]
struct FunctionMeta {
    /// Result of the materialized call-site slot alloca.
    cs_handle: Option<ValueId>,
    /// Instructions already carrying a restore prelude. A successor shared
    /// by several invokes receives the prelude at most once.
    restore_anchors: HashSet<InstrId>,
}

/// What phase-specific work an executable instruction needs.
enum OpClass {
    Load(Operand),
    Store(Operand),
    /// A call whose callee may be traced: direct non-intrinsic or indirect.
    CallSite,
    InvokeSite {
        normal_dest: BlockId,
        unwind_dest: BlockId,
    },
    /// Direct call to an intrinsic: never enters the shadow stack.
    IgnoredCall(String),
    Unsupported(&'static str),
    Other,
}

fn classify(kind: &InstrKind) -> OpClass {
    match kind {
        InstrKind::Load { addr, .. } => OpClass::Load(*addr),
        InstrKind::Store { addr, .. } => OpClass::Store(*addr),
        InstrKind::Call { callee, .. } => {
            if callee.is_intrinsic() {
                let name = callee.direct_name().expect("intrinsics are direct").to_owned();
                OpClass::IgnoredCall(name)
            } else {
                OpClass::CallSite
            }
        }
        InstrKind::Invoke {
            normal_dest,
            unwind_dest,
            ..
        } => OpClass::InvokeSite {
            normal_dest: *normal_dest,
            unwind_dest: *unwind_dest,
        },
        InstrKind::CallBr
        | InstrKind::CatchSwitch
        | InstrKind::CatchRet
        | InstrKind::CatchPad
        | InstrKind::CleanupPad
        | InstrKind::CleanupRet => OpClass::Unsupported(kind.mnemonic()),
        _ => OpClass::Other,
    }
}

impl Pass for InstTracePass {
    fn name(&self) -> &'static str {
        "instrument-inst-trace"
    }

    fn run(&mut self, module: &mut IrModule) -> Result<(), PassError> {
        let uid_file = self.uid_file.as_ref().ok_or(PassError::MissingSidecar)?;

        let ii = InstrumentationInterface::bind(module);
        let cid = CanonicalId::from_sidecar(module, uid_file)?;

        for f in 0..module.functions().len() {
            let func = module.function_mut(crate::ir::FunctionId(f as u32));
            instrument_function(func, &ii, &cid)?;
        }
        Ok(())
    }
}

fn instrument_function(
    func: &mut IrFunction,
    ii: &InstrumentationInterface,
    cid: &CanonicalId,
) -> Result<(), PassError> {
    let func_id = func.id;
    // Cache every block's executable view before any rewriting; inserted
    // instructions must never appear in a view.
    let views: Vec<Vec<InstrId>> = func.blocks().iter().map(exec::executable_instrs).collect();
    let mut meta = FunctionMeta::default();

    // Phase 1: BB-enter callbacks and op-specific instrumentation.
    for b in 0..views.len() {
        let block_id = BlockId(b as u32);
        let view = &views[b];

        func.insert_before(
            block_id,
            view[0],
            ii.bb_enter_call(cid.bb_id(func_id, block_id), b == 0),
        );

        for (idx, &iid) in view.iter().enumerate() {
            let class = classify(&instr_kind(func, block_id, iid));
            match class {
                OpClass::Load(addr) => {
                    let id = cid.inst_id(func_id, iid);
                    func.insert_before(block_id, iid, ii.load_call(id, addr));
                }
                OpClass::Store(addr) => {
                    let id = cid.inst_id(func_id, iid);
                    func.insert_before(block_id, iid, ii.store_call(id, addr));
                }
                OpClass::CallSite => {
                    init_cs_handle(func, &mut meta);
                    // Calls are not terminators, so a next executable
                    // instruction always exists in the same block.
                    let next = view[idx + 1];
                    insert_restore(func, ii, &mut meta, block_id, next, (idx + 1) as u64);
                }
                OpClass::InvokeSite {
                    normal_dest,
                    unwind_dest,
                } => {
                    init_cs_handle(func, &mut meta);
                    for dest in [normal_dest, unwind_dest] {
                        let anchor = views[dest.0 as usize][0];
                        insert_restore(func, ii, &mut meta, dest, anchor, 0);
                    }
                }
                OpClass::IgnoredCall(name) => {
                    debug!(callee = %name, function = %func.name, "ignored intrinsic call");
                }
                OpClass::Unsupported(instr) => {
                    return Err(PassError::UnsupportedInstr {
                        function: func.name.clone(),
                        instr,
                    });
                }
                OpClass::Other => {}
            }
        }
    }

    // Phase 2: call-site handle acquisition and the per-instruction tick.
    for b in 0..views.len() {
        let block_id = BlockId(b as u32);
        for &iid in &views[b] {
            match classify(&instr_kind(func, block_id, iid)) {
                OpClass::CallSite | OpClass::InvokeSite { .. } => {
                    let slot = meta
                        .cs_handle
                        .expect("call-site slot is materialized in the first phase");
                    let handle = func.fresh_value();
                    let inst_id = cid.inst_id(func_id, iid);
                    func.insert_before(block_id, iid, ii.get_call_site_call(handle, inst_id));
                    func.insert_before(
                        block_id,
                        iid,
                        InstrKind::Store {
                            addr: Operand::Value(slot),
                            value: Operand::Value(handle),
                        },
                    );
                }
                _ => {}
            }
            func.insert_before(block_id, iid, ii.tick_call());
        }
    }

    Ok(())
}

fn instr_kind(func: &IrFunction, block: BlockId, iid: InstrId) -> InstrKind {
    func.block(block)
        .expect("indexed block")
        .instr(iid)
        .expect("cached instruction")
        .kind
        .clone()
}

/// Materializes the per-function call-site slot: an alloca at the very head
/// of the entry block, initialized to the invalid handle immediately after
/// the leading allocas.
fn init_cs_handle(func: &mut IrFunction, meta: &mut FunctionMeta) {
    if meta.cs_handle.is_some() {
        return;
    }
    let slot = func.fresh_value();
    func.insert_at_front(BlockId(0), InstrKind::Alloca { result: slot });

    let anchor = func
        .entry_block()
        .instrs
        .iter()
        .find(|i| {
            !matches!(
                i.kind,
                InstrKind::Phi { .. } | InstrKind::DbgMarker | InstrKind::Alloca { .. }
            )
        })
        .map(|i| i.id)
        .expect("entry block ends in a terminator");
    func.insert_before(
        BlockId(0),
        anchor,
        InstrKind::Store {
            addr: Operand::Value(slot),
            value: Operand::Imm(CallId::INVALID.0),
        },
    );
    meta.cs_handle = Some(slot);
}

/// Inserts the restore prelude before `anchor`: load the slot, report the
/// return with the retire offset of the anchor, reset the slot.
fn insert_restore(
    func: &mut IrFunction,
    ii: &InstrumentationInterface,
    meta: &mut FunctionMeta,
    block: BlockId,
    anchor: InstrId,
    num_retired: u64,
) {
    if !meta.restore_anchors.insert(anchor) {
        return;
    }
    let slot = meta.cs_handle.expect("slot is materialized before preludes");
    let loaded = func.fresh_value();
    func.insert_before(
        block,
        anchor,
        InstrKind::Load {
            result: loaded,
            addr: Operand::Value(slot),
        },
    );
    func.insert_before(
        block,
        anchor,
        ii.return_from_call_call(Operand::Value(loaded), num_retired),
    );
    func.insert_before(
        block,
        anchor,
        InstrKind::Store {
            addr: Operand::Value(slot),
            value: Operand::Imm(CallId::INVALID.0),
        },
    );
}
