//! Scalar promotion of the call-site slots the trace pass materialized.
//!
//! The slots are plain allocas whose addresses never escape a direct load or
//! store, so within a block every load that follows a store to the same slot
//! can read the stored value directly. Loads satisfied this way are deleted
//! and their uses rewritten; once a slot has no loads left anywhere, its
//! stores and the alloca itself are removed.
//!
//! Loads reachable only across block boundaries (the restore preludes at
//! invoke successors) keep the memory slot. Promoting those would require
//! phi insertion, which the runtime contract does not need.

use std::collections::{HashMap, HashSet};

use crate::error::PassError;
use crate::instrument::Pass;
use crate::ir::{FunctionId, InstrId, InstrKind, IrFunction, IrModule, Operand, ValueId};

pub struct PromoteSlotsPass;

impl Pass for PromoteSlotsPass {
    fn name(&self) -> &'static str {
        "promote-slots"
    }

    fn run(&mut self, module: &mut IrModule) -> Result<(), PassError> {
        for f in 0..module.functions().len() {
            promote_function(module.function_mut(FunctionId(f as u32)));
        }
        Ok(())
    }
}

fn promote_function(func: &mut IrFunction) {
    let candidates = promotable_slots(func);
    if candidates.is_empty() {
        return;
    }

    // Forward in-block stores to subsequent loads.
    let mut replacements: HashMap<ValueId, Operand> = HashMap::new();
    let mut dead_loads: HashSet<InstrId> = HashSet::new();
    for block in &func.blocks {
        let mut known: HashMap<ValueId, Operand> = HashMap::new();
        for instr in &block.instrs {
            match &instr.kind {
                InstrKind::Store {
                    addr: Operand::Value(slot),
                    value,
                } if candidates.contains(slot) => {
                    known.insert(*slot, resolve(&replacements, *value));
                }
                InstrKind::Load {
                    result,
                    addr: Operand::Value(slot),
                } if candidates.contains(slot) => {
                    if let Some(value) = known.get(slot) {
                        replacements.insert(*result, *value);
                        dead_loads.insert(instr.id);
                    }
                }
                _ => {}
            }
        }
    }

    // Rewrite uses of the forwarded loads, then drop the loads.
    if !replacements.is_empty() {
        for block in &mut func.blocks {
            for instr in &mut block.instrs {
                instr.kind.for_each_operand_mut(|op| {
                    if let Operand::Value(v) = op {
                        if let Some(replacement) = replacements.get(v) {
                            *op = resolve(&replacements, *replacement);
                        }
                    }
                });
            }
            block.instrs.retain(|i| !dead_loads.contains(&i.id));
        }
    }

    // A slot with no remaining loads is dead: remove its stores and alloca.
    let mut live: HashSet<ValueId> = HashSet::new();
    for block in &func.blocks {
        for instr in &block.instrs {
            if let InstrKind::Load {
                addr: Operand::Value(slot),
                ..
            } = &instr.kind
            {
                if candidates.contains(slot) {
                    live.insert(*slot);
                }
            }
        }
    }
    for block in &mut func.blocks {
        block.instrs.retain(|i| match &i.kind {
            InstrKind::Alloca { result } => !(candidates.contains(result) && !live.contains(result)),
            InstrKind::Store {
                addr: Operand::Value(slot),
                ..
            } => !(candidates.contains(slot) && !live.contains(slot)),
            _ => true,
        });
    }
}

/// Allocas whose address is only ever used as the direct target of a load or
/// store. Anything else (call argument, stored value, branch condition)
/// makes the slot unpromotable.
fn promotable_slots(func: &IrFunction) -> HashSet<ValueId> {
    let mut slots: HashSet<ValueId> = HashSet::new();
    for block in &func.blocks {
        for instr in &block.instrs {
            if let InstrKind::Alloca { result } = &instr.kind {
                slots.insert(*result);
            }
        }
    }
    if slots.is_empty() {
        return slots;
    }

    let mut escaped: HashSet<ValueId> = HashSet::new();
    for block in &func.blocks {
        for instr in &block.instrs {
            match &instr.kind {
                InstrKind::Load { addr, .. } => {
                    // Address position: fine. Nothing else to check.
                    let _ = addr;
                }
                InstrKind::Store { addr: _, value } => {
                    if let Operand::Value(v) = value {
                        escaped.insert(*v);
                    }
                }
                other => {
                    let mut kind = other.clone();
                    kind.for_each_operand_mut(|op| {
                        if let Operand::Value(v) = op {
                            escaped.insert(*v);
                        }
                    });
                }
            }
        }
    }
    slots.retain(|s| !escaped.contains(s));
    slots
}

fn resolve(replacements: &HashMap<ValueId, Operand>, mut op: Operand) -> Operand {
    while let Operand::Value(v) = op {
        match replacements.get(&v) {
            Some(next) => op = *next,
            None => break,
        }
    }
    op
}
