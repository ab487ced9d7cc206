//! The runtime callback surface as seen from the IR.
//!
//! Binds the extern-C callback symbols into a module and builds the call
//! instructions the passes insert. Signatures (see `runtime`):
//!
//! | symbol                 | signature                          |
//! |------------------------|------------------------------------|
//! | `incDynamicInstCount`  | `() -> void`                       |
//! | `getCallSite`          | `(u64 inst_id) -> u64 handle`      |
//! | `recordReturnFromCall` | `(u64 handle, u64 retired) -> void`|
//! | `recordBasicBlock`     | `(u64 bb_id, u8 is_entry) -> void` |
//! | `recordLoadInst`       | `(u64 inst_id, ptr addr) -> void`  |
//! | `recordStoreInst`      | `(u64 inst_id, ptr addr) -> void`  |

use crate::ir::{Callee, FnDecl, InstrKind, IrModule, Operand, ValueId};
use crate::uid::{BBId, InstId};

pub const INC_DYNAMIC_INST_COUNT: &str = "incDynamicInstCount";
pub const GET_CALL_SITE: &str = "getCallSite";
pub const RECORD_RETURN_FROM_CALL: &str = "recordReturnFromCall";
pub const RECORD_BASIC_BLOCK: &str = "recordBasicBlock";
pub const RECORD_LOAD_INST: &str = "recordLoadInst";
pub const RECORD_STORE_INST: &str = "recordStoreInst";

/// Declares the callback symbols in a module and constructs calls to them.
pub struct InstrumentationInterface;

impl InstrumentationInterface {
    /// Binds all six callback declarations into `module`. Idempotent.
    pub fn bind(module: &mut IrModule) -> Self {
        let decls = [
            (INC_DYNAMIC_INST_COUNT, 0, false),
            (GET_CALL_SITE, 1, true),
            (RECORD_RETURN_FROM_CALL, 2, false),
            (RECORD_BASIC_BLOCK, 2, false),
            (RECORD_LOAD_INST, 2, false),
            (RECORD_STORE_INST, 2, false),
        ];
        for (name, num_params, returns_value) in decls {
            module
                .declare(FnDecl {
                    name: name.to_owned(),
                    num_params,
                    returns_value,
                })
                .expect("callback declarations never conflict");
        }
        Self
    }

    pub fn tick_call(&self) -> InstrKind {
        InstrKind::Call {
            result: None,
            callee: Callee::Direct(INC_DYNAMIC_INST_COUNT.to_owned()),
            args: vec![],
        }
    }

    pub fn get_call_site_call(&self, result: ValueId, inst_id: InstId) -> InstrKind {
        InstrKind::Call {
            result: Some(result),
            callee: Callee::Direct(GET_CALL_SITE.to_owned()),
            args: vec![Operand::Imm(inst_id.0)],
        }
    }

    pub fn return_from_call_call(&self, handle: Operand, num_retired: u64) -> InstrKind {
        InstrKind::Call {
            result: None,
            callee: Callee::Direct(RECORD_RETURN_FROM_CALL.to_owned()),
            args: vec![handle, Operand::Imm(num_retired)],
        }
    }

    pub fn bb_enter_call(&self, bb_id: BBId, is_func_entry: bool) -> InstrKind {
        InstrKind::Call {
            result: None,
            callee: Callee::Direct(RECORD_BASIC_BLOCK.to_owned()),
            args: vec![Operand::Imm(bb_id.0), Operand::Imm(is_func_entry as u64)],
        }
    }

    pub fn load_call(&self, inst_id: InstId, addr: Operand) -> InstrKind {
        InstrKind::Call {
            result: None,
            callee: Callee::Direct(RECORD_LOAD_INST.to_owned()),
            args: vec![Operand::Imm(inst_id.0), addr],
        }
    }

    pub fn store_call(&self, inst_id: InstId, addr: Operand) -> InstrKind {
        InstrKind::Call {
            result: None,
            callee: Callee::Direct(RECORD_STORE_INST.to_owned()),
            args: vec![Operand::Imm(inst_id.0), addr],
        }
    }
}

/// Returns `true` if `name` is one of the runtime callback symbols.
pub fn is_callback_symbol(name: &str) -> bool {
    matches!(
        name,
        INC_DYNAMIC_INST_COUNT
            | GET_CALL_SITE
            | RECORD_RETURN_FROM_CALL
            | RECORD_BASIC_BLOCK
            | RECORD_LOAD_INST
            | RECORD_STORE_INST
    )
}
