use std::collections::HashMap;

use crate::ir::block::{BlockId, IrBlock};
use crate::ir::function::{FunctionId, IrFunction};
use crate::ir::instr::{Instr, InstrId, InstrKind};
use crate::ir::value::ValueId;

/// An extern function declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FnDecl {
    pub name: String,
    pub num_params: u32,
    pub returns_value: bool,
}

/// The top-level IR container.
///
/// Invariants:
/// - Function names are unique within a module.
/// - `FunctionId(n)` always indexes `functions[n]`.
#[derive(Debug, Default)]
pub struct IrModule {
    pub name: String,
    pub(crate) functions: Vec<IrFunction>,
    pub(crate) function_index: HashMap<String, FunctionId>,
    /// Extern declarations, including the runtime callback symbols bound by
    /// the instrumentation interface.
    pub(crate) declarations: Vec<FnDecl>,
}

impl IrModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            function_index: HashMap::new(),
            declarations: Vec::new(),
        }
    }

    pub fn function(&self, id: FunctionId) -> Option<&IrFunction> {
        self.functions.get(id.0 as usize)
    }

    pub(crate) fn function_mut(&mut self, id: FunctionId) -> &mut IrFunction {
        &mut self.functions[id.0 as usize]
    }

    pub fn function_by_name(&self, name: &str) -> Option<&IrFunction> {
        let id = self.function_index.get(name)?;
        self.functions.get(id.0 as usize)
    }

    pub fn functions(&self) -> &[IrFunction] {
        &self.functions
    }

    /// Seals and registers a function built by `IrFunctionBuilder`.
    /// Returns `Err` if the name is already taken.
    pub fn add_function(&mut self, mut func: IrFunction) -> Result<FunctionId, String> {
        if self.function_index.contains_key(&func.name) {
            return Err(format!("function '{}' already defined", func.name));
        }
        let id = FunctionId(self.functions.len() as u32);
        func.id = id;
        self.function_index.insert(func.name.clone(), id);
        self.functions.push(func);
        Ok(id)
    }

    /// Registers an extern declaration. Re-declaring the same signature is a
    /// no-op; a conflicting signature is an error.
    pub fn declare(&mut self, decl: FnDecl) -> Result<(), String> {
        if let Some(existing) = self.declaration(&decl.name) {
            if *existing == decl {
                return Ok(());
            }
            return Err(format!("conflicting declaration for '{}'", decl.name));
        }
        self.declarations.push(decl);
        Ok(())
    }

    pub fn declaration(&self, name: &str) -> Option<&FnDecl> {
        self.declarations.iter().find(|d| d.name == name)
    }

    pub fn declarations(&self) -> &[FnDecl] {
        &self.declarations
    }
}

/// Builder for constructing an `IrFunction` incrementally.
///
/// Call order:
/// 1. `create_block()` — allocate one or more blocks
/// 2. `set_current_block()` — point the cursor at a block
/// 3. `push()` — emit instructions into the current block
/// 4. `build()` — consume the builder and return the completed `IrFunction`
///
/// `build()` panics if any block lacks a terminator.
pub struct IrFunctionBuilder {
    func: IrFunction,
    current_block: Option<BlockId>,
}

impl IrFunctionBuilder {
    pub fn new(name: impl Into<String>, num_params: u32) -> Self {
        let mut func = IrFunction {
            id: FunctionId(0), // reassigned by IrModule::add_function
            name: name.into(),
            param_values: Vec::new(),
            blocks: Vec::new(),
            next_value: 0,
            next_instr: 0,
        };
        for _ in 0..num_params {
            let v = func.fresh_value();
            func.param_values.push(v);
        }
        Self {
            func,
            current_block: None,
        }
    }

    /// Returns the `ValueId` of the i-th parameter.
    pub fn param(&self, index: usize) -> ValueId {
        self.func.param_values[index]
    }

    /// Creates a new block and returns its `BlockId`.
    pub fn create_block(&mut self, name: Option<&str>) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func
            .blocks
            .push(IrBlock::new(id, name.map(str::to_owned)));
        id
    }

    /// Sets the current insertion block.
    pub fn set_current_block(&mut self, block: BlockId) {
        self.current_block = Some(block);
    }

    /// Allocates a fresh `ValueId` for an instruction result.
    pub fn fresh_value(&mut self) -> ValueId {
        self.func.fresh_value()
    }

    /// Appends an instruction to the current block and returns its handle.
    ///
    /// Panics if no current block is set or the block is already sealed.
    pub fn push(&mut self, kind: InstrKind) -> InstrId {
        let block_id = self
            .current_block
            .expect("IrFunctionBuilder: no current block set before push");
        let block = &self.func.blocks[block_id.0 as usize];
        assert!(
            !block.is_sealed(),
            "push called on already-sealed block {}",
            block_id
        );
        let id = InstrId(self.func.next_instr);
        self.func.next_instr += 1;
        self.func.blocks[block_id.0 as usize]
            .instrs
            .push(Instr { id, kind });
        id
    }

    /// Consumes the builder and returns the completed `IrFunction`.
    ///
    /// Panics if any block is not sealed (lacks a terminator).
    pub fn build(self) -> IrFunction {
        for block in &self.func.blocks {
            assert!(
                block.is_sealed(),
                "build() called with unsealed block {} ('{:?}')",
                block.id,
                block.name
            );
        }
        self.func
    }
}
