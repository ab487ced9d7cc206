use crate::ir::instr::{Instr, InstrId};

/// An opaque index identifying a basic block within an `IrFunction`.
///
/// Blocks are never inserted or removed by the rewriting passes, so these
/// indices stay stable for the lifetime of a pass pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A basic block.
///
/// Invariants enforced by `IrFunctionBuilder::build()`:
/// 1. `instrs` is non-empty — at minimum a terminator must be present.
/// 2. Exactly one terminator exists and it is always the last element.
#[derive(Debug, Clone)]
pub struct IrBlock {
    pub id: BlockId,
    /// Optional display name. The printed label (see [`IrBlock::label`]) is
    /// what identifies this block in the canonical-ID sidecar.
    pub name: Option<String>,
    /// Instructions in program order. Terminator is last.
    pub instrs: Vec<Instr>,
}

impl IrBlock {
    pub fn new(id: BlockId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            instrs: Vec::new(),
        }
    }

    /// The printed label of this block: its name if present, otherwise the
    /// positional form `bb<index>`. Unique within a function either way.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}", self.id),
        }
    }

    /// Returns the terminator instruction if the block is sealed.
    pub fn terminator(&self) -> Option<&Instr> {
        self.instrs.last().filter(|i| i.kind.is_terminator())
    }

    /// A block is sealed when it ends with a terminator.
    pub fn is_sealed(&self) -> bool {
        self.terminator().is_some()
    }

    /// Looks up an instruction by its stable handle.
    pub fn instr(&self, id: InstrId) -> Option<&Instr> {
        self.instrs.iter().find(|i| i.id == id)
    }

    /// Returns the current position of an instruction within this block.
    pub fn position_of(&self, id: InstrId) -> Option<usize> {
        self.instrs.iter().position(|i| i.id == id)
    }
}
