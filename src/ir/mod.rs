pub mod block;
pub mod function;
pub mod instr;
pub mod module;
pub mod value;

pub use block::{BlockId, IrBlock};
pub use function::{FunctionId, IrFunction};
pub use instr::{BinOp, Callee, Instr, InstrId, InstrKind};
pub use module::{FnDecl, IrFunctionBuilder, IrModule};
pub use value::{Operand, ValueId};
