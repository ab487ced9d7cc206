//! Tree-walking interpreter for instrumented modules.
//!
//! Executes IR directly so a rewritten module can be driven against a live
//! [`TraceContext`] in-process: direct calls to the six runtime callback
//! symbols dispatch into the context instead of executing IR, exactly as the
//! callback ABI would in a compiled binary. When the context reports that
//! every interval has been traced, execution stops with
//! [`RunOutcome::IntervalsComplete`] — the in-process analogue of the
//! runtime's `exit(0)`.
//!
//! Values are bare 64-bit words. Memory is a sparse word map fed by a bump
//! allocator, which is all the materialized slots and test programs need.
//! Indirect call targets are function-table indices; any other target value
//! behaves as an uninstrumented extern returning 0.

use std::collections::HashMap;

use crate::error::InterpError;
use crate::instrument::interface;
use crate::ir::{BinOp, BlockId, Callee, InstrKind, IrFunction, IrModule, Operand, ValueId};
use crate::runtime::{TickOutcome, TraceContext};
use crate::uid::{BBId, CallId, InstId};

#[derive(Debug, Clone, Copy)]
pub struct InterpOptions {
    pub max_steps: u64,
    pub max_depth: usize,
}

impl Default for InterpOptions {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_depth: 128,
        }
    }
}

/// How a top-level run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The entry function returned normally.
    Finished(Option<u64>),
    /// The tracing context completed all intervals mid-run.
    IntervalsComplete,
}

/// Runs `name` from `module` with default options.
pub fn run_function(
    module: &IrModule,
    name: &str,
    args: &[u64],
    ctx: &mut TraceContext,
) -> Result<RunOutcome, InterpError> {
    run_function_opts(module, name, args, ctx, InterpOptions::default())
}

pub fn run_function_opts(
    module: &IrModule,
    name: &str,
    args: &[u64],
    ctx: &mut TraceContext,
    opts: InterpOptions,
) -> Result<RunOutcome, InterpError> {
    let func = module
        .function_by_name(name)
        .ok_or_else(|| InterpError::UnknownFunction { name: name.into() })?;
    let mut interp = Interp {
        module,
        ctx,
        mem: HashMap::new(),
        next_addr: 0x1000,
        steps: 0,
        opts,
    };
    match interp.exec_function(func, args, 0)? {
        ExecResult::Return(v) => Ok(RunOutcome::Finished(v)),
        ExecResult::Unwind => Err(InterpError::UnhandledUnwind),
        ExecResult::Complete => Ok(RunOutcome::IntervalsComplete),
    }
}

enum ExecResult {
    Return(Option<u64>),
    /// An exception is unwinding through this frame.
    Unwind,
    Complete,
}

enum CallResult {
    Value(Option<u64>),
    Unwind,
    Complete,
}

struct Interp<'m, 'c> {
    module: &'m IrModule,
    ctx: &'c mut TraceContext,
    mem: HashMap<u64, u64>,
    next_addr: u64,
    steps: u64,
    opts: InterpOptions,
}

fn eval(vals: &HashMap<ValueId, u64>, op: Operand) -> Result<u64, InterpError> {
    match op {
        Operand::Imm(v) => Ok(v),
        Operand::Value(id) => vals
            .get(&id)
            .copied()
            .ok_or(InterpError::UndefinedValue { id: id.0 }),
    }
}

fn eval_binop(op: BinOp, lhs: u64, rhs: u64) -> Result<u64, InterpError> {
    let (l, r) = (lhs as i64, rhs as i64);
    let v = match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::Rem => {
            if r == 0 {
                return Err(InterpError::DivisionByZero);
            }
            l.wrapping_rem(r)
        }
        BinOp::CmpEq => (l == r) as i64,
        BinOp::CmpNe => (l != r) as i64,
        BinOp::CmpLt => (l < r) as i64,
    };
    Ok(v as u64)
}

impl<'m, 'c> Interp<'m, 'c> {
    fn exec_function(
        &mut self,
        func: &'m IrFunction,
        args: &[u64],
        depth: usize,
    ) -> Result<ExecResult, InterpError> {
        if depth > self.opts.max_depth {
            return Err(InterpError::DepthLimit);
        }
        if args.len() != func.num_params() as usize {
            return Err(InterpError::ArityMismatch {
                name: func.name.clone(),
                expected: func.num_params(),
                found: args.len(),
            });
        }

        let mut vals: HashMap<ValueId, u64> = HashMap::new();
        for (i, &arg) in args.iter().enumerate() {
            vals.insert(func.param(i), arg);
        }

        let mut block_id = BlockId(0);
        let mut prev: Option<BlockId> = None;
        'blocks: loop {
            let block = func.block(block_id).expect("branch to existing block");

            // Leading phis are parallel copies from the edge just taken.
            let mut phi_updates = Vec::new();
            for instr in &block.instrs {
                let InstrKind::Phi { result, incoming } = &instr.kind else {
                    break;
                };
                let pred = prev.ok_or(InterpError::MissingPhiIncoming)?;
                let (_, op) = incoming
                    .iter()
                    .find(|(b, _)| *b == pred)
                    .ok_or(InterpError::MissingPhiIncoming)?;
                phi_updates.push((*result, eval(&vals, *op)?));
            }
            for (v, x) in phi_updates {
                vals.insert(v, x);
            }

            for instr in &block.instrs {
                self.steps += 1;
                if self.steps > self.opts.max_steps {
                    return Err(InterpError::StepLimit);
                }
                match &instr.kind {
                    InstrKind::Phi { .. }
                    | InstrKind::DbgMarker
                    | InstrKind::LifetimeStart { .. }
                    | InstrKind::LifetimeEnd { .. } => {}
                    InstrKind::LandingPad { result } => {
                        vals.insert(*result, 0);
                    }
                    InstrKind::BinOp {
                        result,
                        op,
                        lhs,
                        rhs,
                    } => {
                        let l = eval(&vals, *lhs)?;
                        let r = eval(&vals, *rhs)?;
                        vals.insert(*result, eval_binop(*op, l, r)?);
                    }
                    InstrKind::Alloca { result } => {
                        let addr = self.next_addr;
                        self.next_addr += 8;
                        vals.insert(*result, addr);
                    }
                    InstrKind::Load { result, addr } => {
                        let a = eval(&vals, *addr)?;
                        vals.insert(*result, self.mem.get(&a).copied().unwrap_or(0));
                    }
                    InstrKind::Store { addr, value } => {
                        let a = eval(&vals, *addr)?;
                        let v = eval(&vals, *value)?;
                        self.mem.insert(a, v);
                    }
                    InstrKind::Call {
                        result,
                        callee,
                        args,
                    } => {
                        let mut argv = Vec::with_capacity(args.len());
                        for a in args {
                            argv.push(eval(&vals, *a)?);
                        }
                        match self.do_call(callee, &vals, &argv, depth)? {
                            CallResult::Value(v) => {
                                if let Some(r) = result {
                                    vals.insert(*r, v.unwrap_or(0));
                                }
                            }
                            CallResult::Unwind => return Ok(ExecResult::Unwind),
                            CallResult::Complete => return Ok(ExecResult::Complete),
                        }
                    }
                    InstrKind::Invoke {
                        result,
                        callee,
                        args,
                        normal_dest,
                        unwind_dest,
                    } => {
                        let mut argv = Vec::with_capacity(args.len());
                        for a in args {
                            argv.push(eval(&vals, *a)?);
                        }
                        match self.do_call(callee, &vals, &argv, depth)? {
                            CallResult::Value(v) => {
                                if let Some(r) = result {
                                    vals.insert(*r, v.unwrap_or(0));
                                }
                                prev = Some(block_id);
                                block_id = *normal_dest;
                                continue 'blocks;
                            }
                            CallResult::Unwind => {
                                prev = Some(block_id);
                                block_id = *unwind_dest;
                                continue 'blocks;
                            }
                            CallResult::Complete => return Ok(ExecResult::Complete),
                        }
                    }
                    InstrKind::Br { dest } => {
                        prev = Some(block_id);
                        block_id = *dest;
                        continue 'blocks;
                    }
                    InstrKind::CondBr {
                        cond,
                        then_dest,
                        else_dest,
                    } => {
                        let c = eval(&vals, *cond)?;
                        prev = Some(block_id);
                        block_id = if c != 0 { *then_dest } else { *else_dest };
                        continue 'blocks;
                    }
                    InstrKind::Ret { value } => {
                        let v = match value {
                            Some(op) => Some(eval(&vals, *op)?),
                            None => None,
                        };
                        return Ok(ExecResult::Return(v));
                    }
                    InstrKind::Resume { .. } => return Ok(ExecResult::Unwind),
                    InstrKind::Unreachable => return Err(InterpError::ReachedUnreachable),
                    other => {
                        return Err(InterpError::Unsupported {
                            detail: format!("cannot execute '{}'", other.mnemonic()),
                        })
                    }
                }
            }
            unreachable!("sealed blocks end in a terminator");
        }
    }

    fn do_call(
        &mut self,
        callee: &Callee,
        vals: &HashMap<ValueId, u64>,
        argv: &[u64],
        depth: usize,
    ) -> Result<CallResult, InterpError> {
        let target = match callee {
            Callee::Direct(name) => {
                if interface::is_callback_symbol(name) {
                    return self.dispatch_callback(name, argv);
                }
                match self.module.function_by_name(name) {
                    Some(func) => func,
                    // Unknown extern: uninstrumented, returns 0.
                    None => return Ok(CallResult::Value(Some(0))),
                }
            }
            Callee::Indirect(op) => {
                let v = eval(vals, *op)?;
                match self.module.functions().get(v as usize) {
                    Some(func) => func,
                    None => return Ok(CallResult::Value(Some(0))),
                }
            }
        };
        match self.exec_function(target, argv, depth + 1)? {
            ExecResult::Return(v) => Ok(CallResult::Value(v)),
            ExecResult::Unwind => Ok(CallResult::Unwind),
            ExecResult::Complete => Ok(CallResult::Complete),
        }
    }

    /// The in-process callback ABI: routes a callback call into the borrowed
    /// tracing context.
    fn dispatch_callback(&mut self, name: &str, argv: &[u64]) -> Result<CallResult, InterpError> {
        match name {
            interface::INC_DYNAMIC_INST_COUNT => match self.ctx.inc_dynamic_inst_count()? {
                TickOutcome::Continue => Ok(CallResult::Value(None)),
                TickOutcome::IntervalsComplete => Ok(CallResult::Complete),
            },
            interface::GET_CALL_SITE => {
                let handle = self.ctx.get_call_site(InstId(argv[0]));
                Ok(CallResult::Value(Some(handle.0)))
            }
            interface::RECORD_RETURN_FROM_CALL => {
                self.ctx.record_return_from_call(CallId(argv[0]), argv[1]);
                Ok(CallResult::Value(None))
            }
            interface::RECORD_BASIC_BLOCK => {
                self.ctx.record_basic_block(BBId(argv[0]), argv[1] != 0);
                Ok(CallResult::Value(None))
            }
            interface::RECORD_LOAD_INST => {
                self.ctx.record_load_inst(InstId(argv[0]), argv[1]);
                Ok(CallResult::Value(None))
            }
            interface::RECORD_STORE_INST => {
                self.ctx.record_store_inst(InstId(argv[0]), argv[1]);
                Ok(CallResult::Value(None))
            }
            _ => unreachable!("is_callback_symbol covers every callback"),
        }
    }
}
